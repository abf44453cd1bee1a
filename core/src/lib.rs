//! Core functionality for trellis
//!
//! This crate contains the supervision machinery shared by the daemon:
//! process control, the per-service restart loop, shutdown coordination,
//! health probes, the dependency build step and stack configuration.

pub mod build;
pub mod config;
pub mod error;
pub mod health;
#[cfg(unix)]
pub mod process;
pub mod shutdown;
pub mod supervisor;

#[cfg(test)]
mod error_tests;

// Re-export schema types for convenience
pub use schema::*;

pub use build::{existing_artifact, run_build, BuildArtifact};
pub use config::{check_environment, load_stack_from_toml_path, StackConfig};
pub use error::{CoreError, Result};
pub use shutdown::{install_signal_handlers, ShutdownCoordinator, ShutdownSignal, TeardownReport};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level` when it is set.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
