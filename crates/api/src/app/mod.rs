//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: job submission service and queue wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use taskq_infra::queue::JobQueue;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(queue: Arc<dyn JobQueue>) -> Router {
    let service = Arc::new(services::JobService::new(queue));

    routes::router()
        .layer(Extension(service))
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(middleware::log_requests)))
}
