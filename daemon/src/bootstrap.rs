//! Daemon bootstrap: bring the stack up in order and keep it running
//!
//! The [`Orchestrator`] checks the required environment, runs the build,
//! starts the foundational service, waits for it to become ready, starts the
//! dependent service and then watches both until shutdown is requested.
//! Whatever happens after the first process is spawned, teardown runs before
//! [`Orchestrator::run`] returns.

use schema::{ServiceEvent, ServiceSpec, ServiceState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};
use trellis_core::config::StackConfig;
use trellis_core::health::{run_probe, HealthMonitor};
use trellis_core::supervisor::{
    spawn_supervisor, BackoffPolicy, ProcessAdapter, ProcessRegistry, SupervisionOutcome,
    SupervisorConfig, UnixProcessAdapter,
};
use trellis_core::{
    check_environment, existing_artifact, run_build, BuildArtifact, ShutdownCoordinator,
    ShutdownSignal, TeardownReport,
};

use crate::{DaemonError, Result};

const LOG_TARGET: &str = "trellis::orchestrator";

/// Time between readiness probes of the foundational service
const READINESS_POLL: Duration = Duration::from_millis(250);

/// Capacity of the service event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owns every moving part of one supervised run
#[allow(missing_debug_implementations)]
pub struct Orchestrator {
    config: StackConfig,
    adapter: Arc<dyn ProcessAdapter>,
    registry: ProcessRegistry,
    shutdown: ShutdownSignal,
    event_tx: broadcast::Sender<ServiceEvent>,
    tasks: HashMap<String, JoinHandle<SupervisionOutcome>>,
    states: HashMap<String, watch::Receiver<ServiceState>>,
    finished: Vec<SupervisionOutcome>,
    skip_build: bool,
}

impl Orchestrator {
    /// Create an orchestrator that spawns real processes
    pub fn new(config: StackConfig) -> Self {
        Self::with_adapter(config, Arc::new(UnixProcessAdapter::new()))
    }

    /// Create an orchestrator using `adapter` to spawn services
    pub fn with_adapter(config: StackConfig, adapter: Arc<dyn ProcessAdapter>) -> Self {
        let (event_tx, _event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            adapter,
            registry: ProcessRegistry::new(),
            shutdown: ShutdownSignal::new(),
            event_tx,
            tasks: HashMap::new(),
            states: HashMap::new(),
            finished: Vec::new(),
            skip_build: false,
        }
    }

    /// Reuse the existing artifact instead of running the build command
    pub fn skip_build(mut self, skip: bool) -> Self {
        self.skip_build = skip;
        self
    }

    /// The signal that ends this run; hand it to the OS signal handlers
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Processes currently registered as running
    pub fn registry(&self) -> ProcessRegistry {
        self.registry.clone()
    }

    /// Subscribe to lifecycle events of every service
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.event_tx.subscribe()
    }

    /// Last published state of `service`, if it was ever started
    pub fn service_state(&self, service: &str) -> Option<ServiceState> {
        self.states.get(service).map(|rx| *rx.borrow())
    }

    /// Run the stack until shutdown
    ///
    /// Environment and build failures return before anything is spawned. A
    /// shutdown requested during the build returns an empty report. Any
    /// error after that point sets the shutdown signal and tears down before
    /// it is returned.
    pub async fn run(&mut self) -> Result<TeardownReport> {
        info!(
            target: LOG_TARGET,
            "Starting stack: foundation '{}', dependent '{}'",
            self.config.foundation.name,
            self.config.dependent.name
        );

        check_environment(&self.config.environment)?;

        let shutdown = self.shutdown.clone();
        let artifact = tokio::select! {
            biased;
            _ = shutdown.wait() => {
                info!(target: LOG_TARGET, "Shutdown requested before the stack started");
                return Ok(TeardownReport::default());
            }
            result = self.build() => result?,
        };

        let result = self.start_and_monitor(&artifact).await;
        if let Err(e) = &result {
            error!(target: LOG_TARGET, "Supervisor failed: {}", e);
            self.shutdown.trigger(format!("fatal: {e}"));
        }

        let report = self.teardown().await;
        result.map(|()| report)
    }

    async fn build(&self) -> Result<BuildArtifact> {
        let artifact = if self.skip_build {
            existing_artifact(&self.config.build)?
        } else {
            run_build(&self.config.build).await?
        };
        Ok(artifact)
    }

    async fn start_and_monitor(&mut self, artifact: &BuildArtifact) -> Result<()> {
        let foundation = self.config.foundation.clone();
        self.start_service(foundation);

        if !self.await_foundation().await {
            info!(target: LOG_TARGET, "Shutdown requested during startup; dependent not started");
            return Ok(());
        }

        let dependent = self.config.dependent.spec(artifact);
        self.start_service(dependent);

        self.monitor().await
    }

    fn start_service(&mut self, spec: ServiceSpec) {
        let settings = &self.config.supervisor;
        let name = spec.name.clone();
        info!(target: LOG_TARGET, "Starting '{}': {}", name, spec.display_command());

        let handle = spawn_supervisor(SupervisorConfig {
            spec,
            process_adapter: Arc::clone(&self.adapter),
            max_restarts: settings.max_restarts,
            backoff: BackoffPolicy::from_config(&settings.backoff),
            grace: settings.grace_timeout(),
            shutdown: self.shutdown.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
        });
        let (task, state_rx) = handle.into_parts();
        self.tasks.insert(name.clone(), task);
        self.states.insert(name, state_rx);
    }

    /// Wait for the foundational service to become ready
    ///
    /// Returns `false` if shutdown was requested while waiting. A readiness
    /// timeout, or a foundation whose loop has already given up, is logged
    /// and treated as ready.
    async fn await_foundation(&self) -> bool {
        let settings = &self.config.supervisor;
        let name = &self.config.foundation.name;

        let Some(check) = &self.config.foundation.health_check else {
            debug!(
                target: LOG_TARGET,
                "Waiting {:?} for '{}' to settle",
                settings.settle_delay(),
                name
            );
            return tokio::select! {
                biased;
                _ = self.shutdown.wait() => false,
                _ = sleep(settings.settle_delay()) => true,
            };
        };

        let deadline = Instant::now() + settings.readiness_timeout();
        loop {
            if self.shutdown.is_set() {
                return false;
            }
            if let Some(state) = self.service_state(name).filter(ServiceState::is_terminal) {
                warn!(
                    target: LOG_TARGET,
                    "'{}' ended in {} before becoming ready; starting dependent anyway",
                    name,
                    state
                );
                return true;
            }
            match run_probe(check).await {
                Ok(()) => {
                    info!(target: LOG_TARGET, "'{}' is ready", name);
                    return true;
                }
                Err(e) => debug!(target: LOG_TARGET, "'{}' not ready yet: {}", name, e),
            }
            if Instant::now() >= deadline {
                warn!(
                    target: LOG_TARGET,
                    "'{}' not ready after {:?}; starting dependent anyway",
                    name,
                    settings.readiness_timeout()
                );
                return true;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => return false,
                _ = sleep(READINESS_POLL) => {}
            }
        }
    }

    /// Watch the stack until the shutdown signal is set
    async fn monitor(&mut self) -> Result<()> {
        let settings = &self.config.supervisor;
        let tick = settings.monitor_tick();
        let mut monitor = HealthMonitor::new(settings.health_interval());
        for (name, check) in [
            (&self.config.foundation.name, &self.config.foundation.health_check),
            (&self.config.dependent.name, &self.config.dependent.health_check),
        ] {
            if let Some(check) = check {
                monitor = monitor.with_check(name.clone(), check.clone());
            }
        }

        info!(target: LOG_TARGET, "Stack running; monitoring every {:?}", monitor.interval());
        loop {
            if timeout(tick, self.shutdown.wait()).await.is_ok() {
                info!(
                    target: LOG_TARGET,
                    "Shutdown requested ({})",
                    self.shutdown.reason().unwrap_or("unknown")
                );
                return Ok(());
            }
            if let Some(report) = monitor.tick(&self.registry).await {
                debug!(
                    target: LOG_TARGET,
                    dead = report.dead.len(),
                    unhealthy = report.unhealthy.len(),
                    "Health pass complete"
                );
            }
            self.reap_finished().await?;
        }
    }

    /// Collect supervision tasks that reached a terminal state
    async fn reap_finished(&mut self) -> Result<()> {
        let done: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in done {
            let Some(task) = self.tasks.remove(&name) else {
                continue;
            };
            match task.await {
                Ok(outcome) => {
                    warn!(
                        target: LOG_TARGET,
                        "'{}' is no longer supervised: {} after {} start(s)",
                        outcome.service,
                        outcome.final_state,
                        outcome.starts
                    );
                    self.finished.push(outcome);
                }
                Err(e) => {
                    return Err(DaemonError::Fatal(format!(
                        "supervision task for '{name}' failed: {e}"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) -> TeardownReport {
        let coordinator =
            ShutdownCoordinator::new(self.shutdown.clone(), self.config.supervisor.grace_timeout());
        let mut report = coordinator.teardown(&self.registry, &mut self.tasks).await;
        report.outcomes.append(&mut self.finished);
        report.outcomes.sort_by(|a, b| a.service.cmp(&b.service));
        info!(
            target: LOG_TARGET,
            graceful = report.stopped_gracefully.len(),
            killed = report.killed.len(),
            unresponsive = report.unresponsive.len(),
            "Teardown complete"
        );
        report
    }
}
