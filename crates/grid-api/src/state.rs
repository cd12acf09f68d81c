use std::sync::Arc;

use grid_scheduler::Scheduler;
use grid_sinks::{BlobStore, Notifier, Signer};
use grid_store::{BuilderRegistry, EventLog, InstanceStore, JobStore};

#[derive(Clone)]
pub struct AppState {
    pub job_store: Arc<dyn JobStore>,
    pub instance_store: Arc<dyn InstanceStore>,
    pub registry: Arc<BuilderRegistry>,
    pub events: Arc<dyn EventLog>,
    pub scheduler: Arc<Scheduler>,
    pub blobs: Arc<dyn BlobStore>,
    pub signer: Arc<dyn Signer>,
    pub notifier: Arc<dyn Notifier>,
    pub auth_token: Arc<String>,
}
