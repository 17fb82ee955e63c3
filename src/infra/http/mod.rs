//! JSON HTTP surface for class list reports.

mod error;
mod handlers;
mod middleware;

pub use error::{ApiError, codes};

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::application::report::ClassListService;

use middleware::log_responses;

#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<ClassListService>,
}

impl HttpState {
    pub fn new(service: Arc<ClassListService>) -> Self {
        Self { service }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/classlist", get(handlers::class_list))
        .route("/api/classlist/options", get(handlers::filter_options))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
}
