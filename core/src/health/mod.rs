//! Health checking and probing functionality
//!
//! This module provides TCP and exec probes plus the periodic
//! [`HealthMonitor`]. Probes back both the monitor's liveness pass and the
//! orchestrator's readiness gate for the foundational service.
//!
//! ## Types
//!
//! - [`Probe`]: The main trait for health check implementations
//! - [`TcpProbe`]: TCP connection-based health checking
//! - [`ExecProbe`]: command exit-status health checking
//! - [`HealthMonitor`]: sweep of registered processes
//! - [`HealthError`]: Error types for health check failures

pub mod error;
pub mod exec;
pub mod monitor;
pub mod tcp;
pub mod types;

pub use error::HealthError;
pub use exec::ExecProbe;
pub use monitor::{HealthMonitor, HealthReport, DEFAULT_HEALTH_INTERVAL};
pub use tcp::TcpProbe;
pub use types::Probe;

use schema::{HealthCheck, HealthCheckType};

/// Create a probe from a schema health check
pub fn create_probe(health_check: &HealthCheck) -> Result<Box<dyn Probe>, HealthError> {
    let timeout = health_check.timeout();
    match &health_check.check_type {
        HealthCheckType::Tcp { port } => Ok(Box::new(TcpProbe::local(*port, timeout))),
        HealthCheckType::Exec { command } => Ok(Box::new(ExecProbe::new(command.clone(), timeout)?)),
    }
}

/// Create and immediately run the probe for `health_check`
pub async fn run_probe(health_check: &HealthCheck) -> Result<(), HealthError> {
    create_probe(health_check)?.check().await
}
