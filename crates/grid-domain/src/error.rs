use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid atom: {0}")]
    InvalidAtom(String),

    #[error("invalid use-flag token: {0}")]
    InvalidUseFlag(String),

    #[error("duplicate repo name: {0}")]
    DuplicateRepoName(String),

    #[error("negative repo priority for '{0}'")]
    NegativeRepoPriority(String),

    #[error("empty package list")]
    EmptyPackageList,

    #[error("illegal job status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
