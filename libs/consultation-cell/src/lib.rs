pub mod handlers;
pub mod models;
pub mod repository;
pub mod router;
pub mod services;
pub mod slots;

// Re-export the models and services other crates reach for
pub use models::*;
pub use services::*;
pub use router::consultation_routes;
