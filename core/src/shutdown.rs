//! Shutdown signal and orchestrated teardown
//!
//! [`ShutdownSignal`] is the single cancellation source for the whole stack:
//! a flag set once, plus a wakeable event every loop can await. OS signals
//! (SIGINT/SIGTERM) and explicit stop requests both go through
//! [`ShutdownSignal::trigger`].
//!
//! [`ShutdownCoordinator::teardown`] then stops every registered process and
//! collects the supervision tasks:
//!
//! ```text
//! teardown
//!   ├─ fan-out: SIGTERM → wait(grace) → SIGKILL → wait(kill_wait)   per process
//!   ├─ join supervision tasks (abort the ones that do not settle)
//!   └─ final sweep of anything still registered
//! ```

use crate::supervisor::{ManagedProcess, ProcessRegistry, SupervisionOutcome};
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "trellis::shutdown";

/// Default time a process gets to exit after SIGTERM
pub const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the exit after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(5);

/// How long a supervision task may take to finish on its own before it is aborted
const TASK_SETTLE: Duration = Duration::from_millis(500);

/// Process-wide shutdown flag plus wakeable event
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    token: CancellationToken,
    triggered: AtomicBool,
    reason: OnceLock<String>,
}

impl ShutdownSignal {
    /// Create an unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake every waiter
    ///
    /// Returns `true` only for the call that actually set it.
    pub fn trigger(&self, reason: impl Into<String>) -> bool {
        if self
            .inner
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(target: LOG_TARGET, "Shutdown already in progress");
            return false;
        }

        let reason = reason.into();
        info!(target: LOG_TARGET, reason = %reason, "Shutdown requested: {}", reason);
        let _ = self.inner.reason.set(reason);
        self.inner.token.cancel();
        true
    }

    /// Whether shutdown is in effect
    pub fn is_set(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Reason given by the first trigger
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    /// Complete once the signal is set (immediately if it already is)
    pub async fn wait(&self) {
        self.inner.token.cancelled().await;
    }
}

/// Listen for SIGINT and SIGTERM and trigger `signal` on the first one
///
/// The listener keeps running so later signals are logged instead of killing
/// the supervisor mid-teardown.
#[cfg(unix)]
pub fn install_signal_handlers(signal: ShutdownSignal) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal as os_signal, SignalKind};

    let mut sigint = os_signal(SignalKind::interrupt())?;
    let mut sigterm = os_signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                received = sigint.recv() => match received {
                    Some(()) => "SIGINT",
                    None => break,
                },
                received = sigterm.recv() => match received {
                    Some(()) => "SIGTERM",
                    None => break,
                },
            };
            if !signal.trigger(format!("received {name}")) {
                info!(target: LOG_TARGET, "Received {} while already shutting down", name);
            }
        }
    }))
}

/// Listen for Ctrl-C and trigger `signal` on the first one
#[cfg(not(unix))]
pub fn install_signal_handlers(signal: ShutdownSignal) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !signal.trigger("received Ctrl-C") {
                info!(target: LOG_TARGET, "Received Ctrl-C while already shutting down");
            }
        }
    }))
}

/// How a single process ended up stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exit status was already known; no signal was sent
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Needed SIGKILL
    Killed,
    /// Still not observed to exit after SIGKILL
    Unresponsive,
}

/// Stop one process: SIGTERM, wait up to `grace`, then SIGKILL
///
/// Never signals a process whose exit has already been observed.
pub async fn stop_process(
    service: &str,
    process: &Arc<dyn ManagedProcess>,
    grace: Duration,
) -> StopOutcome {
    let pid = process.pid();
    if let Some(exit) = process.exit_status() {
        debug!(target: LOG_TARGET, "'{}' (pid {}) already exited with {}", service, pid, exit.describe());
        return StopOutcome::AlreadyExited;
    }

    info!(target: LOG_TARGET, service = %service, pid, "Stopping '{}' (pid {})", service, pid);
    if let Err(e) = process.terminate().await {
        warn!(target: LOG_TARGET, "Failed to send SIGTERM to '{}': {}", service, e);
    }

    match timeout(grace, process.wait()).await {
        Ok(Ok(exit)) => {
            info!(target: LOG_TARGET, "'{}' stopped gracefully ({})", service, exit.describe());
            return StopOutcome::Graceful;
        }
        Ok(Err(e)) => {
            warn!(target: LOG_TARGET, "Lost track of '{}' while stopping: {}", service, e);
        }
        Err(_) => {
            warn!(
                target: LOG_TARGET,
                "'{}' did not exit within {:?}, sending SIGKILL", service, grace
            );
        }
    }

    if let Err(e) = process.kill().await {
        warn!(target: LOG_TARGET, "Failed to send SIGKILL to '{}': {}", service, e);
    }
    match timeout(KILL_WAIT, process.wait()).await {
        Ok(Ok(exit)) => {
            info!(target: LOG_TARGET, "'{}' killed ({})", service, exit.describe());
            StopOutcome::Killed
        }
        _ => {
            warn!(target: LOG_TARGET, "'{}' (pid {}) did not exit after SIGKILL", service, pid);
            StopOutcome::Unresponsive
        }
    }
}

/// What a teardown did, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Services that exited after SIGTERM
    pub stopped_gracefully: Vec<String>,
    /// Services that needed SIGKILL
    pub killed: Vec<String>,
    /// Services that never reported an exit
    pub unresponsive: Vec<String>,
    /// Supervision tasks that had to be aborted
    pub tasks_cancelled: Vec<String>,
    /// Terminal outcome of every task that finished on its own
    pub outcomes: Vec<SupervisionOutcome>,
}

impl TeardownReport {
    fn record(&mut self, service: String, outcome: StopOutcome) {
        match outcome {
            StopOutcome::AlreadyExited => {}
            StopOutcome::Graceful => self.stopped_gracefully.push(service),
            StopOutcome::Killed => self.killed.push(service),
            StopOutcome::Unresponsive => self.unresponsive.push(service),
        }
    }

    /// Number of processes that received at least one signal
    pub fn signalled(&self) -> usize {
        self.stopped_gracefully.len() + self.killed.len() + self.unresponsive.len()
    }
}

/// Runs the shutdown sequence over a registry and its supervision tasks
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator that gives each process `grace` to exit
    pub fn new(signal: ShutdownSignal, grace: Duration) -> Self {
        Self { signal, grace }
    }

    /// The signal this coordinator sets before tearing down
    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    /// Stop every registered process and collect every supervision task
    ///
    /// Never fails. Draining `tasks` makes a second call a no-op apart from
    /// the registry sweep, and processes already observed to exit are never
    /// signalled again.
    pub async fn teardown(
        &self,
        registry: &ProcessRegistry,
        tasks: &mut HashMap<String, JoinHandle<SupervisionOutcome>>,
    ) -> TeardownReport {
        self.signal.trigger("teardown");
        let mut report = TeardownReport::default();

        let entries = registry.snapshot();
        info!(
            target: LOG_TARGET,
            processes = entries.len(),
            tasks = tasks.len(),
            "Tearing down {} process(es) with a {:?} grace period",
            entries.len(),
            self.grace
        );

        let mut stops = JoinSet::new();
        for entry in entries {
            let grace = self.grace;
            stops.spawn(async move {
                let outcome = stop_process(&entry.service, &entry.process, grace).await;
                (entry.service, outcome)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((service, outcome)) => report.record(service, outcome),
                Err(e) => warn!(target: LOG_TARGET, "Stop task failed: {}", e),
            }
        }

        let mut names: Vec<String> = tasks.keys().cloned().collect();
        names.sort();
        for service in names {
            let Some(handle) = tasks.remove(&service) else {
                continue;
            };
            self.collect_task(service, handle, &mut report).await;
        }

        for entry in registry.snapshot() {
            let outcome = stop_process(&entry.service, &entry.process, self.grace).await;
            if outcome != StopOutcome::AlreadyExited {
                warn!(target: LOG_TARGET, "'{}' was still running after its task ended", entry.service);
            }
            registry.remove_if_pid(&entry.service, entry.process.pid());
            report.record(entry.service, outcome);
        }

        info!(
            target: LOG_TARGET,
            graceful = report.stopped_gracefully.len(),
            killed = report.killed.len(),
            cancelled = report.tasks_cancelled.len(),
            "Teardown complete"
        );
        report
    }

    async fn collect_task(
        &self,
        service: String,
        mut handle: JoinHandle<SupervisionOutcome>,
        report: &mut TeardownReport,
    ) {
        let joined = if handle.is_finished() {
            handle.await
        } else {
            match timeout(TASK_SETTLE, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(target: LOG_TARGET, "Aborting supervision task for '{}'", service);
                    handle.abort();
                    report.tasks_cancelled.push(service.clone());
                    handle.await
                }
            }
        };

        match joined {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(e) if e.is_cancelled() => {
                debug!(target: LOG_TARGET, "Supervision task for '{}' cancelled", service);
            }
            Err(e) => warn!(target: LOG_TARGET, "Supervision task for '{}' failed: {}", service, e),
        }
    }
}
