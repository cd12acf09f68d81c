use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use grid_domain::{Builder, BuilderId, ResourceGauges};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StoreError;

/// Default heartbeat period assumed when deriving `stale_threshold` (spec.md
/// §4.3: `2x` the heartbeat period, floor 30s).
const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(15);
const MIN_STALE_THRESHOLD: Duration = Duration::from_secs(30);
const DEFAULT_DROP_THRESHOLD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default)]
struct Inner {
    builders: HashMap<BuilderId, Builder>,
}

/// Tracks the live set of builders: registration, heartbeats, load and
/// health. Held primarily in memory as the authoritative view; static
/// builder declarations are additionally write-through persisted by the
/// caller (via the Job store's backend) for restart recovery.
#[derive(Debug, Clone)]
pub struct BuilderRegistry {
    inner: Arc<RwLock<Inner>>,
    stale_threshold: Duration,
    drop_threshold: Duration,
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::with_thresholds(
            (DEFAULT_HEARTBEAT_PERIOD * 2).max(MIN_STALE_THRESHOLD),
            DEFAULT_DROP_THRESHOLD,
        )
    }

    pub fn with_thresholds(stale_threshold: Duration, drop_threshold: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            stale_threshold,
            drop_threshold,
        }
    }

    /// Re-registering an already-healthy builder at the same endpoint is a
    /// conflict; at a different endpoint it replaces the entry (the builder
    /// moved, e.g. re-provisioned behind a new address).
    pub async fn register(&self, builder: Builder) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.builders.get(&builder.id) {
            if existing.healthy && existing.endpoint == builder.endpoint {
                return Err(StoreError::BuilderConflict(builder.id.to_string()));
            }
        }
        info!(builder_id = %builder.id, endpoint = %builder.endpoint, "builder registered");
        guard.builders.insert(builder.id.clone(), builder);
        Ok(())
    }

    /// An unknown id is a silent no-op per spec.md §4.3.
    pub async fn heartbeat(&self, builder_id: &BuilderId, gauges: ResourceGauges) {
        let mut guard = self.inner.write().await;
        if let Some(builder) = guard.builders.get_mut(builder_id) {
            builder.last_heartbeat = Utc::now();
            builder.gauges = gauges;
            if !builder.healthy {
                info!(builder_id = %builder_id, "builder recovered on heartbeat");
            }
            builder.healthy = true;
        }
    }

    /// Adjusts load by `delta`, saturating at `0` and at `capacity`.
    pub async fn set_load(&self, builder_id: &BuilderId, delta: i32) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let builder = guard
            .builders
            .get_mut(builder_id)
            .ok_or_else(|| StoreError::BuilderNotFound(builder_id.to_string()))?;
        let next = builder.load as i64 + delta as i64;
        builder.load = next.clamp(0, builder.capacity as i64) as u32;
        Ok(())
    }

    pub async fn record_completion(&self, builder_id: &BuilderId, succeeded: bool) {
        let mut guard = self.inner.write().await;
        if let Some(builder) = guard.builders.get_mut(builder_id) {
            builder.counters.total += 1;
            if succeeded {
                builder.counters.success += 1;
            } else {
                builder.counters.failed += 1;
            }
        }
    }

    /// Builders whose `enabled ∧ healthy ∧ architecture = arg ∧ load < capacity`,
    /// sorted by ascending load ratio, then ascending failure rate, then
    /// ascending id for determinism.
    pub async fn eligible(&self, architecture: &str) -> Vec<Builder> {
        let guard = self.inner.read().await;
        let mut matches: Vec<Builder> = guard
            .builders
            .values()
            .filter(|b| b.is_eligible(architecture))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.load_ratio()
                .partial_cmp(&b.load_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.counters
                        .failure_rate()
                        .partial_cmp(&b.counters.failure_rate())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        matches
    }

    pub async fn get(&self, builder_id: &BuilderId) -> Result<Builder, StoreError> {
        let guard = self.inner.read().await;
        guard
            .builders
            .get(builder_id)
            .cloned()
            .ok_or_else(|| StoreError::BuilderNotFound(builder_id.to_string()))
    }

    pub async fn list(&self) -> Vec<Builder> {
        let guard = self.inner.read().await;
        guard.builders.values().cloned().collect()
    }

    pub async fn mark_unhealthy(&self, builder_id: &BuilderId) {
        let mut guard = self.inner.write().await;
        if let Some(builder) = guard.builders.get_mut(builder_id) {
            builder.healthy = false;
        }
    }

    /// One pass of the staleness sweep: mark builders whose heartbeat is
    /// older than `stale_threshold` unhealthy, and drop builders that have
    /// been unhealthy for longer than `drop_threshold`.
    async fn sweep_once(&self) {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        let mut to_drop = Vec::new();
        for builder in guard.builders.values_mut() {
            let age = now.signed_duration_since(builder.last_heartbeat);
            let age = age.to_std().unwrap_or(Duration::ZERO);
            if age > self.stale_threshold && builder.healthy {
                warn!(builder_id = %builder.id, "builder marked unhealthy: heartbeat stale");
                builder.healthy = false;
            }
            if !builder.healthy && age > self.drop_threshold {
                to_drop.push(builder.id.clone());
            }
        }
        for id in to_drop {
            warn!(builder_id = %id, "dropping builder: unhealthy beyond drop threshold");
            guard.builders.remove(&id);
        }
    }

    /// Spawn the background staleness sweep, running every `interval`.
    pub fn spawn_sweep(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::BuilderCounters;

    fn sample_builder(id: &str, arch: &str, capacity: u32) -> Builder {
        Builder {
            id: BuilderId::new(id),
            endpoint: format!("http://{id}.local:9000"),
            architecture: arch.to_string(),
            capacity,
            load: 0,
            enabled: true,
            healthy: true,
            last_heartbeat: Utc::now(),
            counters: BuilderCounters::default(),
            gauges: ResourceGauges::default(),
        }
    }

    #[tokio::test]
    async fn register_conflict_when_healthy() {
        let registry = BuilderRegistry::new();
        registry.register(sample_builder("b1", "amd64", 2)).await.unwrap();
        let err = registry
            .register(sample_builder("b1", "amd64", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BuilderConflict(_)));
    }

    #[tokio::test]
    async fn register_replaces_when_endpoint_changes() {
        let registry = BuilderRegistry::new();
        registry.register(sample_builder("b1", "amd64", 2)).await.unwrap();
        let mut moved = sample_builder("b1", "amd64", 2);
        moved.endpoint = "http://b1-new.local:9000".to_string();
        registry.register(moved).await.unwrap();
        assert_eq!(
            registry.get(&BuilderId::new("b1")).await.unwrap().endpoint,
            "http://b1-new.local:9000"
        );
    }

    #[tokio::test]
    async fn heartbeat_unknown_id_is_noop() {
        let registry = BuilderRegistry::new();
        registry
            .heartbeat(&BuilderId::new("ghost"), ResourceGauges::default())
            .await;
        assert!(registry.get(&BuilderId::new("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn eligible_filters_by_arch_health_capacity() {
        let registry = BuilderRegistry::new();
        registry.register(sample_builder("b1", "amd64", 2)).await.unwrap();
        registry.register(sample_builder("b2", "arm64", 2)).await.unwrap();
        registry.register(sample_builder("b3", "amd64", 0)).await.unwrap();

        let eligible = registry.eligible("amd64").await;
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id.as_str(), "b1");
    }

    #[tokio::test]
    async fn eligible_sorted_by_load_ratio_then_failure_rate_then_id() {
        let registry = BuilderRegistry::new();
        let mut b1 = sample_builder("b1", "amd64", 4);
        b1.load = 2; // ratio 0.5
        let mut b2 = sample_builder("b2", "amd64", 4);
        b2.load = 1; // ratio 0.25
        registry.register(b1).await.unwrap();
        registry.register(b2).await.unwrap();

        let eligible = registry.eligible("amd64").await;
        assert_eq!(eligible[0].id.as_str(), "b2");
        assert_eq!(eligible[1].id.as_str(), "b1");
    }

    #[tokio::test]
    async fn set_load_saturates_at_bounds() {
        let registry = BuilderRegistry::new();
        registry.register(sample_builder("b1", "amd64", 2)).await.unwrap();
        registry.set_load(&BuilderId::new("b1"), -5).await.unwrap();
        assert_eq!(registry.get(&BuilderId::new("b1")).await.unwrap().load, 0);
        registry.set_load(&BuilderId::new("b1"), 10).await.unwrap();
        assert_eq!(registry.get(&BuilderId::new("b1")).await.unwrap().load, 2);
    }

    #[tokio::test]
    async fn stale_heartbeat_marks_unhealthy_and_drop_removes() {
        let registry =
            BuilderRegistry::with_thresholds(Duration::from_millis(1), Duration::from_millis(1));
        registry.register(sample_builder("b1", "amd64", 2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.sweep_once().await;
        assert!(!registry.get(&BuilderId::new("b1")).await.unwrap().healthy);
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.sweep_once().await;
        assert!(registry.get(&BuilderId::new("b1")).await.is_err());
    }
}
