//! Service supervisor task implementation
//!
//! This module contains the [`ServiceSupervisor`] which runs the restart state
//! machine for a single service:
//!
//! ```text
//! Starting → Running → (ExitedClean | Crashed) → Backoff → Starting
//!                                       │                  │
//!                                       ├→ StoppedBudgetExceeded
//!                                       └→ StoppedByRequest ←┘
//! ```
//!
//! Spawn failures take the same path as a crash. The loop only observes the
//! shutdown signal; stopping processes during teardown is the coordinator's
//! job, except when shutdown lands between spawn and registration.

use super::{
    ManagedProcess, ProcessAdapter, ProcessRegistry, RestartAction, RestartState, SupervisorConfig,
};
use crate::shutdown::{stop_process, ShutdownSignal};
use schema::{ServiceEvent, ServiceExit, ServiceSpec, ServiceState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

const LOG_TARGET: &str = "trellis::supervisor";

/// Terminal result of a supervision loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionOutcome {
    /// Service name
    pub service: String,
    /// Terminal state the loop ended in
    pub final_state: ServiceState,
    /// Number of successful spawns
    pub starts: u32,
    /// Number of exits and spawn failures counted against the budget
    pub restarts: u32,
}

/// Service supervisor task managing the lifecycle of a single service
pub struct ServiceSupervisor {
    spec: ServiceSpec,
    state: ServiceState,
    process_adapter: Arc<dyn ProcessAdapter>,
    restart_state: RestartState,
    shutdown: ShutdownSignal,
    registry: ProcessRegistry,
    grace: Duration,
    event_tx: broadcast::Sender<ServiceEvent>,
    state_tx: watch::Sender<ServiceState>,
    starts: u32,
}

impl ServiceSupervisor {
    /// Create a new service supervisor
    pub fn new(config: SupervisorConfig, state_tx: watch::Sender<ServiceState>) -> Self {
        Self {
            restart_state: RestartState::new(config.max_restarts, config.backoff),
            spec: config.spec,
            state: ServiceState::Starting,
            process_adapter: config.process_adapter,
            shutdown: config.shutdown,
            registry: config.registry,
            grace: config.grace,
            event_tx: config.event_tx,
            state_tx,
            starts: 0,
        }
    }

    /// Run until a terminal state is reached
    pub async fn run(mut self) -> SupervisionOutcome {
        info!(
            target: LOG_TARGET,
            service = %self.spec.name,
            max_restarts = self.restart_state.max_restarts(),
            "Supervising '{}': {}",
            self.spec.name,
            self.spec.display_command()
        );

        let final_state = loop {
            if self.state != ServiceState::Starting {
                self.transition(ServiceState::Starting, None);
            }
            if self.shutdown.is_set() {
                break self.stop_by_request("shutdown in effect before start");
            }

            let process = match self.process_adapter.spawn(&self.spec).await {
                Ok(process) => process,
                Err(e) => {
                    let attempt = self.restart_state.restart_count() + 1;
                    error!(
                        target: LOG_TARGET,
                        service = %self.spec.name,
                        attempt,
                        "Failed to spawn '{}': {}",
                        self.spec.name,
                        e
                    );
                    self.emit(ServiceEvent::spawn_failed(
                        self.spec.name.clone(),
                        attempt,
                        e.to_string(),
                    ));
                    self.transition(ServiceState::Crashed, Some(format!("spawn failed: {e}")));
                    match self.after_exit().await {
                        Some(terminal) => break terminal,
                        None => continue,
                    }
                }
            };

            let exit = match self.supervise(process).await {
                Ok(exit) => exit,
                Err(terminal) => break terminal,
            };

            if self.shutdown.is_set() {
                info!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    "'{}' exited during shutdown ({})",
                    self.spec.name,
                    exit.describe()
                );
                break self.transition(ServiceState::StoppedByRequest, Some(exit.describe()));
            }

            if exit.is_failure() {
                warn!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    pid = exit.pid,
                    attempt = self.restart_state.restart_count() + 1,
                    "'{}' crashed ({})",
                    self.spec.name,
                    exit.describe()
                );
                self.transition(ServiceState::Crashed, Some(exit.describe()));
            } else {
                info!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    pid = exit.pid,
                    "'{}' exited cleanly; it is expected to run until stopped",
                    self.spec.name
                );
                self.transition(ServiceState::ExitedClean, Some(exit.describe()));
            }

            if let Some(terminal) = self.after_exit().await {
                break terminal;
            }
        };

        SupervisionOutcome {
            service: self.spec.name.clone(),
            final_state,
            starts: self.starts,
            restarts: self.restart_state.restart_count(),
        }
    }

    /// Register a freshly spawned process and wait for it to exit
    ///
    /// Returns the terminal state instead when shutdown arrived before the
    /// process could be handed to the coordinator.
    async fn supervise(
        &mut self,
        process: Arc<dyn ManagedProcess>,
    ) -> std::result::Result<ServiceExit, ServiceState> {
        let pid = process.pid();
        self.starts += 1;
        self.registry.insert(&self.spec.name, process.clone());
        self.emit(ServiceEvent::process_started(
            self.spec.name.clone(),
            pid,
            self.spec.command.clone(),
        ));

        if self.shutdown.is_set() {
            warn!(
                target: LOG_TARGET,
                service = %self.spec.name,
                pid,
                "Shutdown arrived while '{}' was starting; stopping it",
                self.spec.name
            );
            stop_process(&self.spec.name, &process, self.grace).await;
            self.registry.remove_if_pid(&self.spec.name, pid);
            return Err(self.stop_by_request("shutdown during start"));
        }

        self.transition(ServiceState::Running, Some(format!("pid {pid}")));

        let exit = match process.wait().await {
            Ok(exit) => exit,
            Err(e) => {
                error!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    pid,
                    "Lost track of '{}': {}",
                    self.spec.name,
                    e
                );
                ServiceExit {
                    pid,
                    exit_code: None,
                    signal: None,
                    timestamp: ServiceEvent::current_timestamp(),
                }
            }
        };
        self.registry.remove_if_pid(&self.spec.name, pid);
        self.emit(ServiceEvent::process_exited(self.spec.name.clone(), exit.clone()));
        Ok(exit)
    }

    /// Count the exit against the budget and wait out the backoff
    ///
    /// `None` means start again; `Some` is the terminal state.
    async fn after_exit(&mut self) -> Option<ServiceState> {
        match self.restart_state.record_crash() {
            RestartAction::GiveUp { attempts } => {
                error!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    attempt = attempts,
                    "'{}' failed {} times; restart budget exhausted, giving up",
                    self.spec.name,
                    attempts
                );
                Some(self.transition(
                    ServiceState::StoppedBudgetExceeded,
                    Some(format!("{attempts} failures")),
                ))
            }
            RestartAction::Restart { attempt, delay } => {
                info!(
                    target: LOG_TARGET,
                    service = %self.spec.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Restarting '{}' in {:.2}s (attempt {}/{})",
                    self.spec.name,
                    delay.as_secs_f64(),
                    attempt,
                    self.restart_state.max_restarts()
                );
                self.emit(ServiceEvent::restart_scheduled(
                    self.spec.name.clone(),
                    attempt,
                    delay.as_millis() as u64,
                ));
                self.transition(
                    ServiceState::Backoff,
                    Some(format!("{}ms", delay.as_millis())),
                );

                let shutdown = self.shutdown.clone();
                let interrupted = tokio::select! {
                    biased;
                    _ = shutdown.wait() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if interrupted {
                    Some(self.stop_by_request("shutdown during backoff"))
                } else {
                    None
                }
            }
        }
    }

    fn stop_by_request(&mut self, reason: &str) -> ServiceState {
        info!(
            target: LOG_TARGET,
            service = %self.spec.name,
            "Stopping supervision of '{}': {}",
            self.spec.name,
            reason
        );
        self.transition(ServiceState::StoppedByRequest, Some(reason.to_string()))
    }

    /// Move to `to`, publish it and return it
    fn transition(&mut self, to: ServiceState, reason: Option<String>) -> ServiceState {
        let from = self.state;
        self.state = to;
        let attempt = self.restart_state.restart_count();

        info!(
            target: LOG_TARGET,
            service = %self.spec.name,
            attempt,
            from = %from,
            to = %to,
            reason = reason.as_deref().unwrap_or(""),
            "'{}' {} -> {}",
            self.spec.name,
            from,
            to
        );
        self.state_tx.send_replace(to);
        self.emit(ServiceEvent::state_changed(
            self.spec.name.clone(),
            from,
            to,
            attempt,
            reason,
        ));
        to
    }

    fn emit(&self, event: ServiceEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
