use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("unknown field in bundle.json: {0}")]
    UnknownField(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("domain error: {0}")]
    Domain(#[from] grid_domain::DomainError),

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
