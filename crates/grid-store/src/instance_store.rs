use async_trait::async_trait;
use grid_domain::{Instance, InstanceId};

use crate::error::StoreError;
use crate::state::IacRun;

/// Owns the Instance fleet and its IaC run history. Used exclusively by the
/// Capacity manager — no other component reads this store's private state.
#[async_trait]
pub trait InstanceStore: Send + Sync + 'static {
    async fn upsert(&self, instance: &Instance) -> Result<(), StoreError>;
    async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError>;
    async fn list(&self) -> Result<Vec<Instance>, StoreError>;
    async fn delete(&self, id: &InstanceId) -> Result<(), StoreError>;

    async fn append_iac_run(&self, run: &IacRun) -> Result<(), StoreError>;
    /// Most recent runs first, for one instance.
    async fn list_iac_runs(&self, instance_id: &InstanceId) -> Result<Vec<IacRun>, StoreError>;
}

pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use grid_domain::{Instance, InstanceId};
    use tokio::sync::RwLock;

    use super::InstanceStore;
    use crate::error::StoreError;
    use crate::state::IacRun;

    #[derive(Debug, Default)]
    struct Inner {
        instances: HashMap<InstanceId, Instance>,
        runs: HashMap<InstanceId, Vec<IacRun>>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct InMemoryInstanceStore {
        inner: Arc<RwLock<Inner>>,
    }

    impl InMemoryInstanceStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl InstanceStore for InMemoryInstanceStore {
        async fn upsert(&self, instance: &Instance) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.instances.insert(instance.id.clone(), instance.clone());
            Ok(())
        }

        async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError> {
            let guard = self.inner.read().await;
            guard
                .instances
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::InstanceNotFound(id.to_string()))
        }

        async fn list(&self) -> Result<Vec<Instance>, StoreError> {
            let guard = self.inner.read().await;
            Ok(guard.instances.values().cloned().collect())
        }

        async fn delete(&self, id: &InstanceId) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard.instances.remove(id);
            Ok(())
        }

        async fn append_iac_run(&self, run: &IacRun) -> Result<(), StoreError> {
            let mut guard = self.inner.write().await;
            guard
                .runs
                .entry(run.instance_id.clone())
                .or_default()
                .push(run.clone());
            Ok(())
        }

        async fn list_iac_runs(&self, instance_id: &InstanceId) -> Result<Vec<IacRun>, StoreError> {
            let guard = self.inner.read().await;
            let mut runs = guard.runs.get(instance_id).cloned().unwrap_or_default();
            runs.reverse();
            Ok(runs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::state::{IacOperation, IacRunStatus};
        use chrono::Utc;
        use grid_domain::{CloudProvider, ProvisioningState};
        use uuid::Uuid;

        fn sample_instance(id: &str) -> Instance {
            Instance {
                id: InstanceId::new(id),
                provider: CloudProvider::Aws,
                architecture: "amd64".into(),
                state: ProvisioningState::Pending,
                public_ip: None,
                private_ip: None,
                builder_id: None,
                last_heartbeat: None,
                workspace_dir: format!("/var/lib/grid/instances/{id}"),
                created_at: Utc::now(),
                last_error: None,
                desired_hash: None,
            }
        }

        #[tokio::test]
        async fn upsert_get_delete_round_trips() {
            let store = InMemoryInstanceStore::new();
            store.upsert(&sample_instance("i1")).await.unwrap();
            assert!(store.get(&InstanceId::new("i1")).await.is_ok());
            store.delete(&InstanceId::new("i1")).await.unwrap();
            assert!(store.get(&InstanceId::new("i1")).await.is_err());
        }

        #[tokio::test]
        async fn iac_runs_most_recent_first() {
            let store = InMemoryInstanceStore::new();
            let iid = InstanceId::new("i1");
            store.upsert(&sample_instance("i1")).await.unwrap();
            for i in 0..3 {
                store
                    .append_iac_run(&IacRun {
                        id: Uuid::new_v4(),
                        instance_id: iid.clone(),
                        operation: IacOperation::Provision,
                        started_at: Utc::now(),
                        finished_at: None,
                        status: IacRunStatus::Running,
                        exit_code: None,
                        log: format!("run {i}"),
                    })
                    .await
                    .unwrap();
            }
            let runs = store.list_iac_runs(&iid).await.unwrap();
            assert_eq!(runs.len(), 3);
            assert_eq!(runs[0].log, "run 2");
        }
    }
}

pub mod redb_backed {
    use std::path::Path;
    use std::sync::Arc;

    use async_trait::async_trait;
    use grid_domain::{Instance, InstanceId};
    use redb::{Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition};

    use super::InstanceStore;
    use crate::error::StoreError;
    use crate::state::IacRun;

    const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
    const IAC_RUNS: MultimapTableDefinition<&str, &[u8]> = MultimapTableDefinition::new("iac_runs");

    fn internal<E: std::fmt::Display>(e: E) -> StoreError {
        StoreError::Internal(e.to_string())
    }

    /// Durable [`InstanceStore`] backed by a redb database file.
    #[derive(Clone)]
    pub struct RedbInstanceStore {
        db: Arc<Database>,
    }

    impl RedbInstanceStore {
        pub fn open(path: &Path) -> Result<Self, StoreError> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(internal)?;
            }
            let db = Database::create(path).map_err(internal)?;
            {
                let wtxn = db.begin_write().map_err(internal)?;
                wtxn.open_table(INSTANCES).map_err(internal)?;
                wtxn.open_multimap_table(IAC_RUNS).map_err(internal)?;
                wtxn.commit().map_err(internal)?;
            }
            Ok(Self { db: Arc::new(db) })
        }
    }

    #[async_trait]
    impl InstanceStore for RedbInstanceStore {
        async fn upsert(&self, instance: &Instance) -> Result<(), StoreError> {
            let bytes = serde_json::to_vec(instance)?;
            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut table = wtxn.open_table(INSTANCES).map_err(internal)?;
                table
                    .insert(instance.id.as_str(), bytes.as_slice())
                    .map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
            Ok(())
        }

        async fn get(&self, id: &InstanceId) -> Result<Instance, StoreError> {
            let rtxn = self.db.begin_read().map_err(internal)?;
            let table = rtxn.open_table(INSTANCES).map_err(internal)?;
            let bytes = table
                .get(id.as_str())
                .map_err(internal)?
                .ok_or_else(|| StoreError::InstanceNotFound(id.to_string()))?;
            Ok(serde_json::from_slice(bytes.value())?)
        }

        async fn list(&self) -> Result<Vec<Instance>, StoreError> {
            let rtxn = self.db.begin_read().map_err(internal)?;
            let table = rtxn.open_table(INSTANCES).map_err(internal)?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(internal)? {
                let (_k, v) = entry.map_err(internal)?;
                out.push(serde_json::from_slice(v.value())?);
            }
            Ok(out)
        }

        async fn delete(&self, id: &InstanceId) -> Result<(), StoreError> {
            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut table = wtxn.open_table(INSTANCES).map_err(internal)?;
                table.remove(id.as_str()).map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
            Ok(())
        }

        async fn append_iac_run(&self, run: &IacRun) -> Result<(), StoreError> {
            let bytes = serde_json::to_vec(run)?;
            let wtxn = self.db.begin_write().map_err(internal)?;
            {
                let mut table = wtxn.open_multimap_table(IAC_RUNS).map_err(internal)?;
                table
                    .insert(run.instance_id.as_str(), bytes.as_slice())
                    .map_err(internal)?;
            }
            wtxn.commit().map_err(internal)?;
            Ok(())
        }

        async fn list_iac_runs(&self, instance_id: &InstanceId) -> Result<Vec<IacRun>, StoreError> {
            let rtxn = self.db.begin_read().map_err(internal)?;
            let table = rtxn.open_multimap_table(IAC_RUNS).map_err(internal)?;
            let mut runs = Vec::new();
            for entry in table.get(instance_id.as_str()).map_err(internal)? {
                let v = entry.map_err(internal)?;
                runs.push(serde_json::from_slice::<IacRun>(v.value())?);
            }
            runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            Ok(runs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::state::{IacOperation, IacRunStatus};
        use chrono::Utc;
        use grid_domain::{CloudProvider, ProvisioningState};
        use tempfile::TempDir;
        use uuid::Uuid;

        fn sample_instance(id: &str) -> Instance {
            Instance {
                id: InstanceId::new(id),
                provider: CloudProvider::Gcp,
                architecture: "arm64".into(),
                state: ProvisioningState::Active,
                public_ip: Some("203.0.113.5".into()),
                private_ip: Some("10.0.0.5".into()),
                builder_id: None,
                last_heartbeat: None,
                workspace_dir: format!("/var/lib/grid/instances/{id}"),
                created_at: Utc::now(),
                last_error: None,
                desired_hash: None,
            }
        }

        #[tokio::test]
        async fn persists_across_reopen() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("instances.redb");
            {
                let store = RedbInstanceStore::open(&path).unwrap();
                store.upsert(&sample_instance("i1")).await.unwrap();
            }
            let store = RedbInstanceStore::open(&path).unwrap();
            let instance = store.get(&InstanceId::new("i1")).await.unwrap();
            assert_eq!(instance.architecture, "arm64");
        }

        #[tokio::test]
        async fn iac_runs_recorded_per_instance() {
            let dir = TempDir::new().unwrap();
            let store = RedbInstanceStore::open(&dir.path().join("instances.redb")).unwrap();
            let iid = InstanceId::new("i1");
            store.upsert(&sample_instance("i1")).await.unwrap();
            store
                .append_iac_run(&IacRun {
                    id: Uuid::new_v4(),
                    instance_id: iid.clone(),
                    operation: IacOperation::Provision,
                    started_at: Utc::now(),
                    finished_at: None,
                    status: IacRunStatus::Succeeded,
                    exit_code: Some(0),
                    log: "ok".into(),
                })
                .await
                .unwrap();
            let runs = store.list_iac_runs(&iid).await.unwrap();
            assert_eq!(runs.len(), 1);
        }
    }
}
