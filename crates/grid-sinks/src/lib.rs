pub mod blob;
pub mod error;
pub mod notifier;
pub mod signer;

pub use blob::{BlobStore, FsBlobStore, Locator};
pub use error::SinkError;
pub use notifier::{Event, LogNotifier, Notifier};
pub use signer::{Ed25519Signer, Signature, Signer};
