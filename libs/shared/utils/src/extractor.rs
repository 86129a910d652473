use std::str::FromStr;

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use shared_models::actor::{Actor, ActorRole};
use shared_models::error::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

// Middleware resolving the caller identity the gateway forwards. Token
// verification happens at the gateway; by the time a request lands here the
// identity headers are authoritative.
pub async fn actor_middleware(
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let actor = actor_from_headers(request.headers())?;

    // Add actor to request extensions
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let id_header = headers
        .get(ACTOR_ID_HEADER)
        .ok_or_else(|| AppError::Auth("Missing x-actor-id header".to_string()))?;

    let id = id_header
        .to_str()
        .ok()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| AppError::Auth("Invalid x-actor-id header".to_string()))?;

    let role_header = headers
        .get(ACTOR_ROLE_HEADER)
        .ok_or_else(|| AppError::Auth("Missing x-actor-role header".to_string()))?;

    let role = role_header
        .to_str()
        .ok()
        .and_then(|raw| ActorRole::from_str(raw).ok())
        .ok_or_else(|| AppError::Auth("Invalid x-actor-role header".to_string()))?;

    Ok(Actor::new(id, role))
}
