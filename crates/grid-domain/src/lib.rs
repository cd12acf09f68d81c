pub mod error;
pub mod types;

pub use error::DomainError;
pub use types::{
    Atom, Bundle, BundleMetadata, Builder, BuilderCounters, BuilderId, CloudProvider, Instance,
    InstanceId, Job, JobId, JobStatus, PackageSpec, PortageConfig, ProvisioningState, RepoConfig,
    ResourceGauges, SyncType, UseFlag,
};
