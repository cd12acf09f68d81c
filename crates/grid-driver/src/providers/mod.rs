pub mod aliyun;
pub mod aws;
pub mod gcp;
pub mod pve;

pub use aliyun::{AliyunDriver, AliyunDriverConfig};
pub use aws::{AwsDriver, AwsDriverConfig};
pub use gcp::{GcpDriver, GcpDriverConfig};
pub use pve::{PveDriver, PveDriverConfig};
