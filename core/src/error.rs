//! Core error types and utilities

use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment misconfiguration: {0}")]
    EnvironmentMisconfiguration(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Build timed out after {0:?}")]
    BuildTimeout(std::time::Duration),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::EnvironmentMisconfiguration(_) => "CORE003",
            CoreError::InitializationError(_) => "CORE004",
            CoreError::BuildFailed(_) => "CORE005",
            CoreError::BuildTimeout(_) => "CORE006",
            CoreError::ProcessSpawn(_) => "CORE007",
            CoreError::ProcessSignal(_) => "CORE008",
            CoreError::ProcessWait(_) => "CORE009",
            CoreError::IoError(_) => "CORE010",
        }
    }

    /// Whether this error aborts startup before any service is launched
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::ConfigurationError(_)
                | CoreError::ValidationError(_)
                | CoreError::EnvironmentMisconfiguration(_)
                | CoreError::BuildFailed(_)
                | CoreError::BuildTimeout(_)
        )
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

