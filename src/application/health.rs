//! Component health probes.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use storefront_api_types::{HealthCheck, HealthChecks, HealthResponse, HealthStatus};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::timeout;

use crate::application::repos::StoreHealthRepo;
use crate::cache::CacheStore;

pub const METRIC_HEALTH_PROBE_MS: &str = "storefront_health_probe_ms";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no mounted disk contains `{0}`")]
    UnknownPath(String),
    #[error("system probe failed: {0}")]
    Failed(String),
}

/// Host resource readings.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn disk_usage_percent(&self, path: &Path) -> Result<f64, ProbeError>;

    async fn available_memory_mb(&self) -> Result<u64, ProbeError>;
}

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub probe_timeout: Duration,
    pub disk_path: PathBuf,
    pub disk_max_percent: f64,
    pub memory_min_mb: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(2000),
            disk_path: PathBuf::from("/"),
            disk_max_percent: 90.0,
            memory_min_mb: 256,
        }
    }
}

pub struct HealthService {
    store: Arc<dyn StoreHealthRepo>,
    cache: Arc<dyn CacheStore>,
    system: Arc<dyn SystemProbe>,
    policy: HealthPolicy,
}

impl HealthService {
    pub fn new(
        store: Arc<dyn StoreHealthRepo>,
        cache: Arc<dyn CacheStore>,
        system: Arc<dyn SystemProbe>,
        policy: HealthPolicy,
    ) -> Self {
        Self {
            store,
            cache,
            system,
            policy,
        }
    }

    /// Run every probe concurrently; the overall status is the worst component.
    pub async fn check(&self) -> HealthResponse {
        let (database, cache, disk, memory) = tokio::join!(
            self.probe("database", self.database()),
            self.probe("cache", self.cache()),
            self.probe("disk", self.disk()),
            self.probe("memory", self.memory()),
        );

        let status = [&database, &cache, &disk, &memory]
            .into_iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Ok);

        HealthResponse {
            status,
            checks: HealthChecks {
                database,
                cache,
                disk,
                memory,
            },
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    async fn probe<F>(&self, component: &'static str, check: F) -> HealthCheck
    where
        F: Future<Output = HealthCheck>,
    {
        let started = Instant::now();
        let result = match timeout(self.policy.probe_timeout, check).await {
            Ok(result) => result,
            Err(_) => down(format!(
                "timed out after {}ms",
                self.policy.probe_timeout.as_millis()
            )),
        };
        histogram!(METRIC_HEALTH_PROBE_MS, "component" => component)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn database(&self) -> HealthCheck {
        match self.store.ping().await {
            Ok(()) => ok(None),
            Err(err) => down(err.to_string()),
        }
    }

    async fn cache(&self) -> HealthCheck {
        match self.cache.ping().await {
            Ok(()) => ok(None),
            Err(err) => HealthCheck {
                status: HealthStatus::Degraded,
                detail: Some(err.to_string()),
            },
        }
    }

    async fn disk(&self) -> HealthCheck {
        match self.system.disk_usage_percent(&self.policy.disk_path).await {
            Ok(used) if used >= self.policy.disk_max_percent => HealthCheck {
                status: HealthStatus::Degraded,
                detail: Some(format!(
                    "{used:.1}% used, limit {:.1}%",
                    self.policy.disk_max_percent
                )),
            },
            Ok(used) => ok(Some(format!("{used:.1}% used"))),
            Err(err) => down(err.to_string()),
        }
    }

    async fn memory(&self) -> HealthCheck {
        match self.system.available_memory_mb().await {
            Ok(available) if available < self.policy.memory_min_mb => HealthCheck {
                status: HealthStatus::Degraded,
                detail: Some(format!(
                    "{available} MiB available, minimum {} MiB",
                    self.policy.memory_min_mb
                )),
            },
            Ok(available) => ok(Some(format!("{available} MiB available"))),
            Err(err) => down(err.to_string()),
        }
    }
}

fn ok(detail: Option<String>) -> HealthCheck {
    HealthCheck {
        status: HealthStatus::Ok,
        detail,
    }
}

fn down(detail: String) -> HealthCheck {
    HealthCheck {
        status: HealthStatus::Down,
        detail: Some(detail),
    }
}
