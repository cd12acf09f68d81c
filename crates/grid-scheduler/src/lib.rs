pub mod capacity;
pub mod dispatch;
pub mod error;

pub use capacity::{CapacityConfig, CapacityManager, ProvisioningTemplate};
pub use dispatch::{Scheduler, SchedulerConfig};
pub use error::SchedulerError;
