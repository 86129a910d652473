use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use consultation_cell::router::consultation_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Careline consultation API is running!" }))
        .nest("/consultations", consultation_routes(state))
}
