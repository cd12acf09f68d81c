use grid_driver::DriverError;
use grid_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("dispatch failed: {0}")]
    Dispatch(String),
}
