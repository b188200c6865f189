pub mod api;
mod health;
mod middleware;

pub use api::{AdminToken, ApiState, build_api_router};
pub use middleware::{METRIC_HTTP_REQUEST_MS, REQUEST_ID_HEADER, RequestContext};

use axum::{Router, middleware as axum_middleware, routing::get};

/// Full application router: health probe plus the JSON API.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health/", get(health::health_check))
        .merge(build_api_router(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
