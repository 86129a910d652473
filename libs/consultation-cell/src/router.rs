// libs/consultation-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::actor_middleware;

use crate::handlers;

pub fn consultation_routes(state: Arc<AppConfig>) -> Router {
    // Every consultation operation acts on behalf of a gateway-resolved actor
    let protected_routes = Router::new()
        .route("/", post(handlers::book_consultation))
        .route("/", get(handlers::list_consultations))
        .route("/free-slots", get(handlers::free_slots))
        .route("/{consultation_id}", get(handlers::get_consultation))
        .route("/{consultation_id}/cancel", post(handlers::cancel_consultation))
        .route("/{consultation_id}/respond", post(handlers::respond_consultation))
        .layer(middleware::from_fn(actor_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
