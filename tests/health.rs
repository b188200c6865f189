mod support;

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use storefront::infra::http::build_router;
use storefront_api_types::{HealthResponse, HealthStatus};
use tower::ServiceExt;

use support::{FailingCache, FixedProbe, Harness, memory_cache};

async fn check_health(harness: &Harness) -> (StatusCode, HealthResponse) {
    let response = build_router(harness.state.clone())
        .oneshot(
            Request::builder()
                .uri("/health/")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("health response");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let report = serde_json::from_slice(&body).expect("health json");
    (status, report)
}

#[tokio::test]
async fn everything_up_reports_ok() {
    let harness = Harness::new();
    let (status, report) = check_health(&harness).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report.status, HealthStatus::Ok);
    assert_eq!(report.checks.database.status, HealthStatus::Ok);
    assert_eq!(report.checks.cache.status, HealthStatus::Ok);
    assert_eq!(
        report.checks.disk.detail.as_deref(),
        Some("40.0% used")
    );
}

#[tokio::test]
async fn store_down_returns_service_unavailable() {
    let harness = Harness::new();
    harness.store.set_down(true);

    let (status, report) = check_health(&harness).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(report.status, HealthStatus::Down);
    assert_eq!(report.checks.database.status, HealthStatus::Down);
    assert!(report.checks.database.detail.is_some());
}

#[tokio::test]
async fn failing_cache_only_degrades() {
    let harness = Harness::with_cache(Arc::new(FailingCache));

    let (status, report) = check_health(&harness).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.checks.cache.status, HealthStatus::Degraded);
    assert_eq!(report.checks.database.status, HealthStatus::Ok);
}

#[tokio::test]
async fn low_resources_degrade() {
    let probe_readings = FixedProbe {
        disk_percent: 97.5,
        memory_mb: 64,
    };
    let harness = Harness::build(memory_cache(), probe_readings, None);

    let (status, report) = check_health(&harness).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.checks.disk.status, HealthStatus::Degraded);
    assert_eq!(report.checks.memory.status, HealthStatus::Degraded);
}
