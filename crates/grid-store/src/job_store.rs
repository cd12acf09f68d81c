use async_trait::async_trait;
use chrono::Utc;
use grid_domain::{Bundle, Job, JobId, JobStatus};

use crate::error::StoreError;

/// Owns all job records: creation, status transitions, log accumulation.
///
/// All mutating operations are serialized per job-id by the implementation;
/// concurrent reads never block. See the state machine on [`JobStatus`].
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn create(&self, bundle: Bundle) -> Result<JobId, StoreError>;
    async fn get(&self, job_id: &JobId) -> Result<Job, StoreError>;
    /// Most recently created first, clamped to 200 and defaulting to 50.
    async fn list(&self, limit: Option<u32>) -> Result<Vec<Job>, StoreError>;
    async fn transition(&self, job_id: &JobId, target: JobStatus) -> Result<Job, StoreError>;
    async fn append_log(&self, job_id: &JobId, chunk: &str) -> Result<(), StoreError>;
    async fn set_error(&self, job_id: &JobId, message: &str) -> Result<(), StoreError>;
    async fn set_artifact_locator(&self, job_id: &JobId, locator: &str) -> Result<(), StoreError>;
    /// Only permitted from `queued -> assigned`.
    async fn set_assigned_builder(
        &self,
        job_id: &JobId,
        builder_id: &grid_domain::BuilderId,
    ) -> Result<(), StoreError>;
    /// Re-queue a failed job for retry: clears the builder assignment,
    /// increments the retry counter, transitions back to `queued`.
    async fn retry(&self, job_id: &JobId) -> Result<Job, StoreError>;
}

pub(crate) fn clamp_limit(limit: Option<u32>) -> usize {
    limit.unwrap_or(50).min(200) as usize
}

pub(crate) fn apply_transition(job: &mut Job, target: JobStatus) -> Result<(), StoreError> {
    if !job.status.can_transition_to(target) {
        return Err(StoreError::IllegalTransition {
            job_id: job.id.clone(),
            from: job.status.to_string(),
            to: target.to_string(),
        });
    }
    let now = Utc::now();
    job.status = target;
    job.updated_at = now;
    if target == JobStatus::Building {
        job.started_at = Some(now);
    }
    if target.is_terminal() {
        job.finished_at = Some(now);
    }
    Ok(())
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use grid_domain::{Bundle, BuilderId, Job, JobId, JobStatus};
    use tokio::sync::RwLock;

    use super::{apply_transition, clamp_limit, JobStore};
    use crate::error::StoreError;

    #[derive(Debug, Default)]
    struct Inner {
        jobs: HashMap<JobId, Job>,
        /// Creation order, oldest first.
        order: Vec<JobId>,
    }

    /// In-memory [`JobStore`]. All data is lost on process exit — suitable for
    /// tests and ephemeral bootstrap.
    #[derive(Debug, Clone, Default)]
    pub struct InMemoryJobStore {
        inner: Arc<RwLock<Inner>>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn create(&self, bundle: Bundle) -> Result<JobId, StoreError> {
            let id = JobId::new(uuid::Uuid::new_v4().to_string());
            let job = Job::new(id.clone(), bundle, Utc::now());
            let mut guard = self.inner.write().await;
            guard.order.push(id.clone());
            guard.jobs.insert(id.clone(), job);
            Ok(id)
        }

        async fn get(&self, job_id: &JobId) -> Result<Job, StoreError> {
            let guard = self.inner.read().await;
            guard
                .jobs
                .get(job_id)
                .cloned()
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))
        }

        async fn list(&self, limit: Option<u32>) -> Result<Vec<Job>, StoreError> {
            let limit = clamp_limit(limit);
            let guard = self.inner.read().await;
            Ok(guard
                .order
                .iter()
                .rev()
                .take(limit)
                .filter_map(|id| guard.jobs.get(id).cloned())
                .collect())
        }

        async fn transition(&self, job_id: &JobId, target: JobStatus) -> Result<Job, StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            apply_transition(job, target)?;
            Ok(job.clone())
        }

        async fn append_log(&self, job_id: &JobId, chunk: &str) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            job.log.push_str(chunk);
            Ok(())
        }

        async fn set_error(&self, job_id: &JobId, message: &str) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            job.error = Some(message.to_string());
            Ok(())
        }

        async fn set_artifact_locator(
            &self,
            job_id: &JobId,
            locator: &str,
        ) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            if job.status != JobStatus::Success {
                return Err(StoreError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: job.status.to_string(),
                    to: "artifact-recorded".into(),
                });
            }
            job.artifact_locator = Some(locator.to_string());
            Ok(())
        }

        async fn set_assigned_builder(
            &self,
            job_id: &JobId,
            builder_id: &BuilderId,
        ) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            if job.status != JobStatus::Assigned {
                return Err(StoreError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: job.status.to_string(),
                    to: "assigned-builder-set".into(),
                });
            }
            job.assigned_builder = Some(builder_id.clone());
            Ok(())
        }

        async fn retry(&self, job_id: &JobId) -> Result<Job, StoreError> {
            let mut guard = self.inner.write().await;
            let job = guard
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            apply_transition(job, JobStatus::Queued)?;
            job.assigned_builder = None;
            job.retry_count += 1;
            Ok(job.clone())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::Utc;
        use grid_domain::{Atom, BundleMetadata, PackageSpec, PortageConfig};

        fn sample_bundle() -> Bundle {
            Bundle {
                config: PortageConfig::default(),
                packages: vec![PackageSpec::new(Atom::parse("dev-lang/python").unwrap())],
                metadata: BundleMetadata {
                    user_id: "alice".into(),
                    target_arch: "amd64".into(),
                    profile: "default/linux/amd64/23.0".into(),
                    created_at: Utc::now(),
                    description: "test".into(),
                },
            }
        }

        #[tokio::test]
        async fn create_and_get() {
            let store = InMemoryJobStore::new();
            let id = store.create(sample_bundle()).await.unwrap();
            let job = store.get(&id).await.unwrap();
            assert_eq!(job.status, JobStatus::Queued);
        }

        #[tokio::test]
        async fn list_is_most_recent_first_and_clamped() {
            let store = InMemoryJobStore::new();
            for _ in 0..5 {
                store.create(sample_bundle()).await.unwrap();
            }
            let listed = store.list(Some(2)).await.unwrap();
            assert_eq!(listed.len(), 2);
            let listed_default = store.list(None).await.unwrap();
            assert_eq!(listed_default.len(), 5);
            let listed_clamped = store.list(Some(10_000)).await.unwrap();
            assert_eq!(listed_clamped.len(), 5);
        }

        #[tokio::test]
        async fn illegal_transition_is_rejected() {
            let store = InMemoryJobStore::new();
            let id = store.create(sample_bundle()).await.unwrap();
            let err = store.transition(&id, JobStatus::Building).await.unwrap_err();
            assert!(matches!(err, StoreError::IllegalTransition { .. }));
        }

        #[tokio::test]
        async fn retry_requeues_and_increments_counter() {
            let store = InMemoryJobStore::new();
            let id = store.create(sample_bundle()).await.unwrap();
            store.transition(&id, JobStatus::Assigned).await.unwrap();
            store
                .set_assigned_builder(&id, &BuilderId::new("b1"))
                .await
                .unwrap();
            store.transition(&id, JobStatus::Building).await.unwrap();
            store.transition(&id, JobStatus::Failed).await.unwrap();

            let job = store.retry(&id).await.unwrap();
            assert_eq!(job.status, JobStatus::Queued);
            assert_eq!(job.retry_count, 1);
            assert!(job.assigned_builder.is_none());
        }

        #[tokio::test]
        async fn artifact_locator_requires_success_status() {
            let store = InMemoryJobStore::new();
            let id = store.create(sample_bundle()).await.unwrap();
            let err = store
                .set_artifact_locator(&id, "blob://x")
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::IllegalTransition { .. }));
        }
    }
}

pub mod redb_backed {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use grid_domain::{Bundle, BuilderId, Job, JobId, JobStatus};
    use redb::{Database, ReadableTable, TableDefinition};

    use super::{apply_transition, clamp_limit, JobStore};
    use crate::error::StoreError;

    const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");
    const JOB_ORDER: TableDefinition<u64, &str> = TableDefinition::new("job_order");
    const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

    fn internal<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Internal(e.to_string())
    }

    /// Durable [`JobStore`] backed by a redb database file. Survives restarts —
    /// the default store `grid-cli bootstrap` wires up.
    #[derive(Clone)]
    pub struct RedbJobStore {
        db: Arc<Database>,
    }

    impl RedbJobStore {
        pub fn open(path: &Path) -> Result<Self, StoreError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(internal)?;
            }
            let db = Database::create(path).map_err(internal)?;
            {
                let wtxn = db.begin_write().map_err(internal)?;
                wtxn.open_table(JOBS).map_err(internal)?;
                wtxn.open_table(JOB_ORDER).map_err(internal)?;
                wtxn.open_table(META).map_err(internal)?;
                wtxn.commit().map_err(internal)?;
            }
            Ok(Self { db: Arc::new(db) })
        }

        fn read_job(&self, job_id: &JobId) -> Result<Job, StoreError> {
            let rtxn = self.db.begin_read().map_err(internal)?;
            let table = rtxn.open_table(JOBS).map_err(internal)?;
            let bytes = table
                .get(job_id.as_str())
                .map_err(internal)?
                .ok_or_else(|| StoreError::JobNotFound(job_id.clone()))?;
            Ok(serde_json::from_slice(bytes.value())?)
        }

        fn write_job(&self, job: &Job) -> Result<(), StoreError> {
            let bytes = serde_json::to_vec(job)?;
            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut table = wtxn.open_table(JOBS).map_err(internal)?;
                table
                    .insert(job.id.as_str(), bytes.as_slice())
                    .map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
            Ok(())
        }
    }

    #[async_trait]
    impl JobStore for RedbJobStore {
        async fn create(&self, bundle: Bundle) -> Result<JobId, StoreError> {
            let id = JobId::new(uuid::Uuid::new_v4().to_string());
            let job = Job::new(id.clone(), bundle, chrono::Utc::now());

            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut meta = wtxn.open_table(META).map_err(internal)?;
                let seq = meta
                    .get("job_seq")
                    .map_err(internal)?
                    .map(|g| g.value())
                    .unwrap_or(0);
                let new_seq = seq + 1;
                meta.insert("job_seq", new_seq).map_err(internal)?;

                let mut order = wtxn.open_table(JOB_ORDER).map_err(internal)?;
                order
                    .insert(new_seq, job.id.as_str())
                    .map_err(internal)?;

                let mut jobs = wtxn.open_table(JOBS).map_err(internal)?;
                let bytes = serde_json::to_vec(&job)?;
                jobs.insert(job.id.as_str(), bytes.as_slice())
                    .map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
            Ok(id)
        }

        async fn get(&self, job_id: &JobId) -> Result<Job, StoreError> {
            self.read_job(job_id)
        }

        async fn list(&self, limit: Option<u32>) -> Result<Vec<Job>, StoreError> {
            let limit = clamp_limit(limit);
            let rtxn = self.db.begin_read().map_err(internal)?;
            let order_table = rtxn.open_table(JOB_ORDER).map_err(internal)?;
            let jobs_table = rtxn.open_table(JOBS).map_err(internal)?;

            let mut ids: Vec<String> = Vec::new();
            for entry in order_table.iter().map_err(internal)? {
                let (_seq, id) = entry.map_err(internal)?;
                ids.push(id.value().to_string());
            }
            ids.reverse();
            ids.truncate(limit);

            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(bytes) = jobs_table.get(id.as_str()).map_err(internal)? {
                    jobs.push(serde_json::from_slice(bytes.value())?);
                }
            }
            Ok(jobs)
        }

        async fn transition(&self, job_id: &JobId, target: JobStatus) -> Result<Job, StoreError> {
            let mut job = self.read_job(job_id)?;
            apply_transition(&mut job, target)?;
            self.write_job(&job)?;
            Ok(job)
        }

        async fn append_log(&self, job_id: &JobId, chunk: &str) -> Result<(), StoreError> {
            let mut job = self.read_job(job_id)?;
            job.log.push_str(chunk);
            self.write_job(&job)
        }

        async fn set_error(&self, job_id: &JobId, message: &str) -> Result<(), StoreError> {
            let mut job = self.read_job(job_id)?;
            job.error = Some(message.to_string());
            self.write_job(&job)
        }

        async fn set_artifact_locator(
            &self,
            job_id: &JobId,
            locator: &str,
        ) -> Result<(), StoreError> {
            let mut job = self.read_job(job_id)?;
            if job.status != JobStatus::Success {
                return Err(StoreError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: job.status.to_string(),
                    to: "artifact-recorded".into(),
                });
            }
            job.artifact_locator = Some(locator.to_string());
            self.write_job(&job)
        }

        async fn set_assigned_builder(
            &self,
            job_id: &JobId,
            builder_id: &BuilderId,
        ) -> Result<(), StoreError> {
            let mut job = self.read_job(job_id)?;
            if job.status != JobStatus::Assigned {
                return Err(StoreError::IllegalTransition {
                    job_id: job_id.clone(),
                    from: job.status.to_string(),
                    to: "assigned-builder-set".into(),
                });
            }
            job.assigned_builder = Some(builder_id.clone());
            self.write_job(&job)
        }

        async fn retry(&self, job_id: &JobId) -> Result<Job, StoreError> {
            let mut job = self.read_job(job_id)?;
            apply_transition(&mut job, JobStatus::Queued)?;
            job.assigned_builder = None;
            job.retry_count += 1;
            self.write_job(&job)?;
            Ok(job)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::Utc;
        use grid_domain::{Atom, BundleMetadata, PackageSpec, PortageConfig};
        use tempfile::TempDir;

        fn sample_bundle() -> Bundle {
            Bundle {
                config: PortageConfig::default(),
                packages: vec![PackageSpec::new(Atom::parse("dev-lang/python").unwrap())],
                metadata: BundleMetadata {
                    user_id: "alice".into(),
                    target_arch: "amd64".into(),
                    profile: "default/linux/amd64/23.0".into(),
                    created_at: Utc::now(),
                    description: "test".into(),
                },
            }
        }

        #[tokio::test]
        async fn persistence_survives_reopen() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("jobs.redb");

            let id = {
                let store = RedbJobStore::open(&path).unwrap();
                store.create(sample_bundle()).await.unwrap()
            };

            let store = RedbJobStore::open(&path).unwrap();
            let job = store.get(&id).await.unwrap();
            assert_eq!(job.status, JobStatus::Queued);
        }

        #[tokio::test]
        async fn list_order_and_clamp() {
            let dir = TempDir::new().unwrap();
            let store = RedbJobStore::open(&dir.path().join("jobs.redb")).unwrap();
            let mut ids = Vec::new();
            for _ in 0..3 {
                ids.push(store.create(sample_bundle()).await.unwrap());
            }
            let listed = store.list(None).await.unwrap();
            assert_eq!(listed.len(), 3);
            assert_eq!(listed[0].id, *ids.last().unwrap());
        }
    }
}
