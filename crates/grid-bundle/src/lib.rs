pub mod codec;
pub mod error;
pub mod system_config;

pub use codec::{decode, encode, read_from_path, write_to_path};
pub use error::BundleError;
pub use system_config::read_system_config;
