//! Core trait for health checking

use super::HealthError;
use async_trait::async_trait;

/// A single liveness check against a running service
///
/// Implementations must bound their own runtime with the configured timeout
/// and must not restart or signal the service they observe.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Execute the health check
    ///
    /// Returns `Ok(())` if the check passes, or an error describing what went wrong.
    async fn check(&self) -> Result<(), HealthError>;

    /// Short description used in log lines, e.g. `tcp 127.0.0.1:5432`
    fn describe(&self) -> String;
}
