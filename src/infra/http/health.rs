use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use storefront_api_types::HealthStatus;

use crate::application::error::ErrorReport;

use super::api::ApiState;

/// 200 while every critical component is up, 503 once any reports `down`.
pub async fn health_check(State(state): State<ApiState>) -> Response {
    let report = state.health.check().await;
    let status = match report.status {
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
    };

    let failing: Vec<String> = [
        ("database", &report.checks.database),
        ("cache", &report.checks.cache),
        ("disk", &report.checks.disk),
        ("memory", &report.checks.memory),
    ]
    .into_iter()
    .filter(|(_, check)| check.status == HealthStatus::Down)
    .map(|(component, check)| {
        format!(
            "{component}: {}",
            check.detail.as_deref().unwrap_or("down")
        )
    })
    .collect();

    let mut response = (status, Json(report)).into_response();
    if !failing.is_empty() {
        ErrorReport::from_message("infra::http::health", status, failing.join("; "))
            .attach(&mut response);
    }
    response
}
