pub mod error;
pub mod events;
pub mod instance_store;
pub mod job_store;
pub mod postgres_job_store;
pub mod registry;
pub mod state;

pub use error::StoreError;
pub use events::{EventLog, InMemoryEventLog};
pub use instance_store::memory::InMemoryInstanceStore;
pub use instance_store::redb_backed::RedbInstanceStore;
pub use instance_store::InstanceStore;
pub use job_store::memory::InMemoryJobStore;
pub use job_store::redb_backed::RedbJobStore;
pub use job_store::JobStore;
pub use postgres_job_store::PostgresJobStore;
pub use registry::BuilderRegistry;
pub use state::{compute_desired_hash, AuditEvent, IacOperation, IacRun, IacRunStatus};
