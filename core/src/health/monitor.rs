//! Periodic liveness sweep over the registered processes
//!
//! The monitor only observes. A dead process found here is already on its
//! way through its supervision loop's restart path; an unhealthy probe result
//! is logged and nothing else.

use super::run_probe;
use crate::supervisor::ProcessRegistry;
use schema::HealthCheck;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const LOG_TARGET: &str = "trellis::health";

/// Default time between sweeps
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Result of one monitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Registered services whose process has already exited
    pub dead: Vec<String>,
    /// Live services whose health check failed
    pub unhealthy: Vec<String>,
}

/// Liveness sweep plus optional per-service probes
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    interval: Duration,
    checks: HashMap<String, HealthCheck>,
    next_due: Option<Instant>,
}

impl HealthMonitor {
    /// Create a monitor that runs every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            checks: HashMap::new(),
            next_due: None,
        }
    }

    /// Probe `service` with `check` on every pass
    pub fn with_check(mut self, service: impl Into<String>, check: HealthCheck) -> Self {
        self.checks.insert(service.into(), check);
        self
    }

    /// Configured interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Names of registered services whose exit status is already known
    pub fn sweep(&self, registry: &ProcessRegistry) -> Vec<String> {
        let mut dead = Vec::new();
        for entry in registry.snapshot() {
            if let Some(exit) = entry.process.exit_status() {
                warn!(
                    target: LOG_TARGET,
                    service = %entry.service,
                    pid = exit.pid,
                    "'{}' is registered but its process exited ({})",
                    entry.service,
                    exit.describe()
                );
                dead.push(entry.service);
            }
        }
        dead
    }

    /// Run the configured health checks of every live registered service
    ///
    /// Returns the names whose check failed.
    pub async fn probe(&self, registry: &ProcessRegistry) -> Vec<String> {
        let mut unhealthy = Vec::new();
        for entry in registry.snapshot() {
            let Some(check) = self.checks.get(&entry.service) else {
                continue;
            };
            if !entry.process.is_alive() {
                continue;
            }
            match run_probe(check).await {
                Ok(()) => debug!(target: LOG_TARGET, "'{}' is healthy", entry.service),
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        service = %entry.service,
                        "Health check for '{}' failed: {}",
                        entry.service,
                        e
                    );
                    unhealthy.push(entry.service);
                }
            }
        }
        unhealthy
    }

    /// Sweep and probe if the interval has elapsed since the last pass
    ///
    /// The first call only schedules the first pass one interval out.
    pub async fn tick(&mut self, registry: &ProcessRegistry) -> Option<HealthReport> {
        let now = Instant::now();
        match self.next_due {
            None => {
                self.next_due = Some(now + self.interval);
                None
            }
            Some(due) if now < due => None,
            Some(_) => {
                self.next_due = Some(now + self.interval);
                Some(HealthReport {
                    dead: self.sweep(registry),
                    unhealthy: self.probe(registry).await,
                })
            }
        }
    }
}
