use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grid_domain::{BuilderId, Job, JobId, JobStatus};
use grid_store::{AuditEvent, BuilderRegistry, EventLog, JobStore};
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;

/// Per-call timeout for outbound dispatch/cancel requests to builders
/// (spec.md §5's 10 s suspension-point bound).
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
const BASE_BACKOFF: Duration = Duration::from_secs(10);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Open Question (spec.md §9): how many times a failed job retries
    /// before it is left `failed` for good. Resolved at 5 — generous
    /// enough to absorb a flaky builder without masking a broken bundle.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            max_retries: 5,
        }
    }
}

/// Single logical dispatch loop: one outstanding selection decision per
/// queued job, processed in submission order. Holds no durable state of its
/// own — the job store and builder registry are the source of truth, so a
/// restart simply resumes from whatever is `queued`.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    registry: Arc<BuilderRegistry>,
    events: Arc<dyn EventLog>,
    http: Client,
    config: SchedulerConfig,
    retry_after: Mutex<HashMap<JobId, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: Arc<BuilderRegistry>,
        events: Arc<dyn EventLog>,
        config: SchedulerConfig,
    ) -> Self {
        let http = Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            store,
            registry,
            events,
            http,
            config,
            retry_after: Mutex::new(HashMap::new()),
        }
    }

    /// Runs until the process is shut down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                warn!(error = %e, "scheduler tick failed");
            }
        }
    }

    async fn tick(&self) -> Result<(), SchedulerError> {
        self.requeue_due_retries().await?;

        let mut queued: Vec<Job> = self
            .store
            .list(None)
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        // Submission order: a job cannot be overtaken by one submitted later.
        queued.sort_by_key(|j| j.created_at);

        for job in queued {
            self.dispatch_one(&job).await?;
        }
        Ok(())
    }

    /// Jobs that failed with retry budget left get re-queued after an
    /// exponential backoff (base 10 s, factor 2, cap 5 min) measured from
    /// the failure, not from this tick — `retry_after` records the target
    /// time once and is consulted, not recomputed, on every later tick.
    async fn requeue_due_retries(&self) -> Result<(), SchedulerError> {
        let failed: Vec<Job> = self
            .store
            .list(None)
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Failed && j.retry_count < self.config.max_retries)
            .collect();

        let now = Utc::now();
        let mut pending = self.retry_after.lock().await;
        pending.retain(|id, _| failed.iter().any(|j| &j.id == id));

        for job in &failed {
            let due = *pending.entry(job.id.clone()).or_insert_with(|| {
                let backoff = BASE_BACKOFF
                    .saturating_mul(2u32.saturating_pow(job.retry_count.min(16)))
                    .min(MAX_BACKOFF);
                now + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero())
            });
            if now >= due {
                self.store.retry(&job.id).await?;
                pending.remove(&job.id);
            }
        }
        Ok(())
    }

    async fn dispatch_one(&self, job: &Job) -> Result<(), SchedulerError> {
        let arch = job.bundle.metadata.target_arch.clone();
        loop {
            let eligible = self.registry.eligible(&arch).await;
            let Some(builder) = eligible.into_iter().next() else {
                // No immediate slot; the Capacity manager watches queue depth
                // independently via the job store, so nothing to notify here.
                return Ok(());
            };

            if self.registry.set_load(&builder.id, 1).await.is_err() {
                continue; // builder vanished since the `eligible` snapshot
            }
            if self.store.transition(&job.id, JobStatus::Assigned).await.is_err() {
                self.registry.set_load(&builder.id, -1).await.ok();
                continue; // lost the race with a concurrent cancel
            }
            self.store.set_assigned_builder(&job.id, &builder.id).await?;
            self.events
                .append(AuditEvent::JobAssigned {
                    id: Uuid::new_v4(),
                    at: Utc::now(),
                    job_id: job.id.clone(),
                    builder_id: builder.id.clone(),
                })
                .await?;

            match self.post_dispatch(&builder.endpoint, job).await {
                Ok(()) => {
                    self.events
                        .append(AuditEvent::JobDispatched {
                            id: Uuid::new_v4(),
                            at: Utc::now(),
                            job_id: job.id.clone(),
                            builder_id: builder.id.clone(),
                        })
                        .await?;
                    info!(job_id = %job.id, builder_id = %builder.id, "job dispatched");
                    return Ok(());
                }
                Err(e) => {
                    warn!(job_id = %job.id, builder_id = %builder.id, error = %e, "dispatch failed; reselecting");
                    self.roll_back_dispatch(&job.id, &builder.id).await;
                    continue;
                }
            }
        }
    }

    async fn roll_back_dispatch(&self, job_id: &JobId, builder_id: &BuilderId) {
        self.registry.set_load(builder_id, -1).await.ok();
        self.registry.mark_unhealthy(builder_id).await;
        self.store.transition(job_id, JobStatus::Queued).await.ok();
    }

    async fn post_dispatch(&self, endpoint: &str, job: &Job) -> Result<(), SchedulerError> {
        let url = format!("{}/dispatch", endpoint.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(job)
            .send()
            .await
            .map_err(|e| SchedulerError::Dispatch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SchedulerError::Dispatch(format!(
                "builder returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Client-initiated cancel: best-effort notification to the assigned
    /// builder, load released on acknowledgement or after the dispatch
    /// timeout elapses.
    pub async fn cancel(&self, job_id: &JobId) -> Result<(), SchedulerError> {
        let job = self.store.get(job_id).await?;
        let was_in_flight = matches!(job.status, JobStatus::Assigned | JobStatus::Building);
        self.store.transition(job_id, JobStatus::Cancelled).await?;

        if was_in_flight {
            if let Some(builder_id) = &job.assigned_builder {
                if let Ok(builder) = self.registry.get(builder_id).await {
                    let url = format!("{}/cancel/{}", builder.endpoint.trim_end_matches('/'), job_id);
                    let _ = tokio::time::timeout(DISPATCH_TIMEOUT, self.http.post(&url).send()).await;
                }
                self.registry.set_load(builder_id, -1).await.ok();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_domain::{Atom, BundleMetadata, PackageSpec, PortageConfig};
    use grid_store::{BuilderRegistry, InMemoryEventLog, InMemoryJobStore};

    fn sample_bundle(arch: &str) -> grid_domain::Bundle {
        grid_domain::Bundle {
            config: PortageConfig::default(),
            packages: vec![PackageSpec::new(Atom::parse("dev-lang/python").unwrap())],
            metadata: BundleMetadata {
                user_id: "alice".into(),
                target_arch: arch.into(),
                profile: "default/linux/amd64/23.0".into(),
                created_at: Utc::now(),
                description: "test".into(),
            },
        }
    }

    #[tokio::test]
    async fn dispatch_with_no_eligible_builder_leaves_job_queued() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(BuilderRegistry::new());
        let events: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let scheduler = Scheduler::new(store.clone(), registry, events, SchedulerConfig::default());

        let id = store.create(sample_bundle("amd64")).await.unwrap();
        scheduler.tick().await.unwrap();

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn cancel_queued_job_transitions_without_builder_call() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(BuilderRegistry::new());
        let events: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let scheduler = Scheduler::new(store.clone(), registry, events, SchedulerConfig::default());

        let id = store.create(sample_bundle("amd64")).await.unwrap();
        scheduler.cancel(&id).await.unwrap();

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn requeue_due_retries_respects_backoff_window() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let registry = Arc::new(BuilderRegistry::new());
        let events: Arc<dyn EventLog> = Arc::new(InMemoryEventLog::new());
        let scheduler = Scheduler::new(store.clone(), registry, events, SchedulerConfig::default());

        let id = store.create(sample_bundle("amd64")).await.unwrap();
        store.transition(&id, JobStatus::Assigned).await.unwrap();
        store.transition(&id, JobStatus::Building).await.unwrap();
        store.transition(&id, JobStatus::Failed).await.unwrap();

        scheduler.requeue_due_retries().await.unwrap();
        // Backoff has not elapsed yet; job should still be failed.
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }
}
