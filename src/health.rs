//! Health aggregation across configured locations.
//!
//! Every location whose adapter asks to be probed on each check is probed
//! concurrently (bounded fan-out).  Cloud locations are only sampled: once
//! the concurrent pass is done, exactly one of them is picked at random and
//! probed, which keeps the cost of a check flat no matter how many cloud
//! locations are configured.

use futures::StreamExt;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::location::LocationRegistry;
use crate::storage::backend::{DataBackend, HealthPolicy};

/// Status reported by a backend when it has no dependency to verify.
pub const HEALTHY_CODE: u16 = 200;
pub const HEALTHY_MESSAGE: &str = "OK";

/// Message reported for a cloud bucket with versioning enabled.
pub const VERSIONING_OK_MESSAGE: &str = "Congrats! You own the bucket";

/// Error reported for a cloud bucket with versioning absent or suspended.
pub const VERSIONING_REQUIRED_ERROR: &str = "Versioning must be enabled";

/// Outcome of probing one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LocationHealth {
    /// Backend answered its probe.
    Healthy { code: u16, message: String },

    /// Cloud bucket reachable with versioning enabled.
    Versioned {
        #[serde(rename = "versioningStatus")]
        versioning_status: String,
        message: String,
    },

    /// Cloud bucket reachable but versioning absent or suspended.
    VersioningMisconfigured {
        #[serde(rename = "versioningStatus")]
        versioning_status: Option<String>,
        error: String,
    },

    /// Probe failed.
    Unreachable { error: String },
}

impl LocationHealth {
    /// Fixed healthy status.
    pub fn ok() -> Self {
        LocationHealth::Healthy {
            code: HEALTHY_CODE,
            message: HEALTHY_MESSAGE.to_string(),
        }
    }

    pub fn unreachable(error: impl std::fmt::Display) -> Self {
        LocationHealth::Unreachable {
            error: error.to_string(),
        }
    }

    /// Whether this outcome reports a problem.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            LocationHealth::VersioningMisconfigured { .. } | LocationHealth::Unreachable { .. }
        )
    }
}

/// Result of a full health check, keyed by location name.
pub type HealthReport = BTreeMap<String, LocationHealth>;

/// Probe the registry's locations.
///
/// At most `concurrency` probes are in flight during the first pass.  A
/// failing probe is recorded for its own location and never affects the
/// others.
pub async fn check_locations(registry: &LocationRegistry, concurrency: usize) -> HealthReport {
    let mut sampled: Vec<(String, Arc<dyn DataBackend>)> = Vec::new();
    let mut checks: Vec<Pin<Box<dyn Future<Output = (String, LocationHealth)> + Send>>> =
        Vec::new();

    for (name, location) in registry.iter() {
        let name = name.to_string();
        let backend = location.backend.clone();
        match backend.health_policy() {
            HealthPolicy::EveryCheck => checks.push(Box::pin(async move {
                let health = backend.healthcheck().await;
                (name, health)
            })),
            HealthPolicy::Sampled => sampled.push((name, backend)),
        }
    }

    let mut report: HealthReport = futures::stream::iter(checks)
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let candidate = sampled.choose(&mut rand::thread_rng()).cloned();
    if let Some((name, backend)) = candidate {
        debug!(
            "sampling cloud location {} for health check ({} candidates)",
            name,
            sampled.len()
        );
        let health = backend.healthcheck().await;
        report.insert(name, health);
    }

    for (name, health) in &report {
        if health.is_error() {
            warn!(location = %name, status = ?health, "location unhealthy");
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{BackendType, LocationConstraint};
    use crate::storage::backend::{BackendError, BackendResult, BackendStream, StoredData};
    use crate::types::{ByteRange, KeyContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_healthy_serialization() {
        let json = serde_json::to_value(LocationHealth::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"code": 200, "message": "OK"}));
    }

    #[test]
    fn test_versioning_serialization() {
        let ok = LocationHealth::Versioned {
            versioning_status: "Enabled".to_string(),
            message: VERSIONING_OK_MESSAGE.to_string(),
        };
        let json = serde_json::to_value(ok).unwrap();
        assert_eq!(json["versioningStatus"], "Enabled");
        assert_eq!(json["message"], VERSIONING_OK_MESSAGE);

        let bad = LocationHealth::VersioningMisconfigured {
            versioning_status: Some("Suspended".to_string()),
            error: VERSIONING_REQUIRED_ERROR.to_string(),
        };
        assert!(bad.is_error());
        let json = serde_json::to_value(bad).unwrap();
        assert_eq!(json["versioningStatus"], "Suspended");
        assert_eq!(json["error"], VERSIONING_REQUIRED_ERROR);
    }

    #[test]
    fn test_unreachable_serialization() {
        let json = serde_json::to_value(LocationHealth::unreachable("connection refused")).unwrap();
        assert_eq!(json, serde_json::json!({"error": "connection refused"}));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let report = check_locations(&LocationRegistry::new(), 4).await;
        assert!(report.is_empty());
    }

    /// Backend whose health check takes a while and records how many checks
    /// overlap.
    struct SlowBackend {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl DataBackend for SlowBackend {
        fn backend_type(&self) -> BackendType {
            BackendType::Native
        }

        fn put(
            &self,
            _stream: BackendStream,
            _size: u64,
            _key_context: &KeyContext,
        ) -> Pin<Box<dyn Future<Output = BackendResult<StoredData>> + Send + '_>> {
            Box::pin(async { Err(BackendError::Other(anyhow::anyhow!("unused"))) })
        }

        fn get(
            &self,
            _key: &str,
            _range: Option<ByteRange>,
        ) -> Pin<Box<dyn Future<Output = BackendResult<BackendStream>> + Send + '_>> {
            Box::pin(async { Err(BackendError::Other(anyhow::anyhow!("unused"))) })
        }

        fn delete(&self, _key: &str) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn healthcheck(&self) -> Pin<Box<dyn Future<Output = LocationHealth> + Send + '_>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                LocationHealth::ok()
            })
        }
    }

    #[tokio::test]
    async fn test_health_fan_out_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = LocationRegistry::new();
        for i in 0..6 {
            registry.register(
                LocationConstraint::new(format!("ring-{i}"), BackendType::Native),
                Arc::new(SlowBackend {
                    in_flight: in_flight.clone(),
                    peak: peak.clone(),
                }),
            );
        }

        let report = check_locations(&registry, 2).await;

        assert_eq!(report.len(), 6);
        assert!(report.values().all(|h| *h == LocationHealth::ok()));
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_check_locations_future_is_send() {
        let mut registry = LocationRegistry::new();
        registry.register(
            LocationConstraint::new("mem", BackendType::Memory),
            Arc::new(crate::storage::memory::MemoryBackend::new()),
        );
        let registry = Arc::new(registry);
        let report = tokio::spawn(async move { check_locations(&registry, 4).await })
            .await
            .unwrap();
        assert_eq!(report["mem"], LocationHealth::ok());
    }
}
