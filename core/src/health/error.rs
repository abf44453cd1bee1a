//! Error types for health checking operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during health check operations
#[derive(Error, Debug)]
pub enum HealthError {
    /// The health check timed out
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// TCP connection failed
    #[error("tcp connection failed: {0}")]
    Tcp(#[from] std::io::Error),

    /// The exec probe could not run or exited unsuccessfully
    #[error("exec probe failed: {0}")]
    ExecFailed(String),

    /// The probe configuration cannot be used
    #[error("invalid probe: {0}")]
    InvalidProbe(String),
}
