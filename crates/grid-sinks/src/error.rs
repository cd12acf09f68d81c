use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
