//! Service supervisor implementation
//!
//! This module provides the per-service supervision loop together with the
//! pieces it is built from: process adapters, the restart budget and backoff,
//! and the active-process registry shared with the health monitor and the
//! shutdown coordinator.
//!
//! ## Architecture
//!
//! Each service gets its own tokio task running a [`ServiceSupervisor`]. The
//! task owns the service's [`ManagedProcess`] while it runs and registers it
//! in the [`ProcessRegistry`] so teardown can reach it:
//!
//! ```text
//! spawn_supervisor ─► ServiceSupervisor::run ─► SupervisionOutcome
//!                         │ insert/remove
//!                         ▼
//!                   ProcessRegistry ◄── HealthMonitor, ShutdownCoordinator
//! ```
//!
//! ## Components
//!
//! - [`SupervisorHandle`]: join handle plus state subscription for one loop
//! - [`ProcessAdapter`]: Trait for abstracting process management
//! - [`ServiceSupervisor`]: Per-service task managing state transitions
//! - [`RestartState`] / [`BackoffPolicy`]: restart budget and delays

use crate::shutdown::ShutdownSignal;
use schema::{ServiceEvent, ServiceSpec, ServiceState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

pub mod adapters;
pub mod registry;
pub mod restart_policy;
pub mod service_task;

#[cfg(test)]
mod supervisor_restart_tests;

pub use adapters::*;
pub use registry::*;
pub use restart_policy::*;
pub use service_task::*;

/// Configuration for spawning a supervisor
#[derive(Clone)]
pub struct SupervisorConfig {
    /// Service specification
    pub spec: ServiceSpec,
    /// Process adapter for spawning and managing processes
    pub process_adapter: Arc<dyn ProcessAdapter>,
    /// Restart budget (number of exits tolerated before giving up)
    pub max_restarts: u32,
    /// Delay policy between restarts
    pub backoff: BackoffPolicy,
    /// Grace period used if the loop has to stop its own process
    pub grace: Duration,
    /// Shared shutdown signal
    pub shutdown: ShutdownSignal,
    /// Shared active-process map
    pub registry: ProcessRegistry,
    /// Event broadcaster for emitting service events
    pub event_tx: broadcast::Sender<ServiceEvent>,
}

/// Handle for a running supervision loop
#[derive(Debug)]
pub struct SupervisorHandle {
    /// Service name
    pub service: String,
    task: JoinHandle<SupervisionOutcome>,
    state_rx: watch::Receiver<ServiceState>,
}

impl SupervisorHandle {
    /// Wait until the service reaches `state` or any terminal state
    pub async fn wait_for_state(&self, state: ServiceState) -> ServiceState {
        let mut rx = self.state_rx.clone();
        let observed = match rx
            .wait_for(|current| *current == state || current.is_terminal())
            .await
        {
            Ok(current) => *current,
            // Sender gone: the loop ended, report what it last published
            Err(_) => *self.state_rx.borrow(),
        };
        observed
    }

    /// Split into the join handle and the state receiver
    pub fn into_parts(self) -> (JoinHandle<SupervisionOutcome>, watch::Receiver<ServiceState>) {
        (self.task, self.state_rx)
    }
}

/// Spawn a supervision loop for the given service
///
/// The loop enters `Starting` immediately and runs until it reaches a
/// terminal state, which the join handle yields as a [`SupervisionOutcome`].
pub fn spawn_supervisor(config: SupervisorConfig) -> SupervisorHandle {
    let (state_tx, state_rx) = watch::channel(ServiceState::Starting);
    let service = config.spec.name.clone();

    info!(target: "trellis::supervisor", "Spawning supervisor for service '{}'", service);

    let supervisor = ServiceSupervisor::new(config, state_tx);
    let task = tokio::spawn(supervisor.run());

    SupervisorHandle {
        service,
        task,
        state_rx,
    }
}
