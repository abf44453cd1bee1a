//! Daemon error types

use thiserror::Error;
use trellis_core::CoreError;

/// Daemon-specific error types
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Failure reported by the supervision machinery
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Daemon could not set itself up
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Unexpected failure in the monitoring loop
    #[error("Fatal supervisor error: {0}")]
    Fatal(String),
}

impl DaemonError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::Core(inner) => inner.code(),
            DaemonError::Startup(_) => "DAEMON001",
            DaemonError::Fatal(_) => "DAEMON002",
        }
    }

    /// Whether the run ended before any service was launched
    pub fn is_startup_fatal(&self) -> bool {
        match self {
            DaemonError::Core(inner) => inner.is_startup_fatal(),
            DaemonError::Startup(_) => true,
            DaemonError::Fatal(_) => false,
        }
    }

    /// Process exit status for this error
    ///
    /// Every failure that reaches the entry point exits with 1; a clean
    /// shutdown exits with 0.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

/// Daemon-specific result type
pub type Result<T> = std::result::Result<T, DaemonError>;
