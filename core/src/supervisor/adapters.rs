//! Process adapters for abstracting process management
//!
//! The supervision loop never touches OS handles directly. It asks a
//! [`ProcessAdapter`] to spawn a [`ManagedProcess`], awaits its exit and,
//! during shutdown, the coordinator asks the same handle to terminate or kill.
//! The unix adapter backs this with process groups; the mock adapter scripts
//! exits for deterministic tests.

use crate::Result;
use async_trait::async_trait;
use schema::{ServiceEvent, ServiceExit, ServiceSpec};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Trait for spawning processes in a platform-agnostic way
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Spawn a new managed process according to the service specification
    async fn spawn(&self, spec: &ServiceSpec) -> Result<Arc<dyn ManagedProcess>>;
}

/// A running (or exited) process that can be awaited and signalled
///
/// The handle is shared between the supervision loop that spawned it and the
/// process registry, so every method takes `&self`.
#[async_trait]
pub trait ManagedProcess: Send + Sync + fmt::Debug {
    /// Get the process ID
    fn pid(&self) -> u32;

    /// Wait for the process to exit
    async fn wait(&self) -> Result<ServiceExit>;

    /// Exit information if the process has already exited, without waiting
    fn exit_status(&self) -> Option<ServiceExit>;

    /// Terminate the process gracefully (SIGTERM)
    async fn terminate(&self) -> Result<()>;

    /// Kill the process forcefully (SIGKILL)
    async fn kill(&self) -> Result<()>;

    /// Whether the process has not been observed to exit yet
    fn is_alive(&self) -> bool {
        self.exit_status().is_none()
    }
}

/// Wait on an exit watch until a status is published
async fn wait_for_exit(
    pid: u32,
    mut rx: watch::Receiver<Option<ServiceExit>>,
) -> Result<ServiceExit> {
    let exit = rx.wait_for(Option::is_some).await.map_err(|_| {
        crate::CoreError::ProcessWait(format!("Exit watcher for process {pid} went away"))
    })?;
    exit.clone()
        .ok_or_else(|| crate::CoreError::ProcessWait(format!("No exit recorded for {pid}")))
}

/// Unix process adapter using process-group management
#[cfg(unix)]
#[derive(Copy, Clone, Debug, Default)]
pub struct UnixProcessAdapter;

#[cfg(unix)]
impl UnixProcessAdapter {
    /// Create a new Unix process adapter
    pub fn new() -> Self {
        Self
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessAdapter for UnixProcessAdapter {
    async fn spawn(&self, spec: &ServiceSpec) -> Result<Arc<dyn ManagedProcess>> {
        use crate::process::unix::{self, SpawnOptions};

        debug!("Spawning Unix process for '{}': {:?}", spec.name, spec.command);

        let options = SpawnOptions {
            environment: Some(&spec.environment),
            working_directory: spec.working_directory.as_deref(),
        };
        let mut child = unix::spawn(&spec.command, options)?;
        let pid = child.pid();

        if let Some(stdout) = child.take_stdout() {
            forward_output(spec.name.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.take_stderr() {
            forward_output(spec.name.clone(), "stderr", stderr);
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let service = spec.name.clone();
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => exit_from_status(pid, status),
                Err(e) => {
                    tracing::error!("Lost track of process {} for '{}': {}", pid, service, e);
                    ServiceExit {
                        pid,
                        exit_code: None,
                        signal: None,
                        timestamp: ServiceEvent::current_timestamp(),
                    }
                }
            };
            exit_tx.send_replace(Some(exit));
        });

        Ok(Arc::new(UnixManagedProcess { pid, exit_rx }))
    }
}

#[cfg(unix)]
fn exit_from_status(pid: u32, status: std::process::ExitStatus) -> ServiceExit {
    use std::os::unix::process::ExitStatusExt;

    let (exit_code, signal) = match status.code() {
        Some(code) => (Some(code), None),
        None => (None, status.signal()),
    };
    ServiceExit {
        pid,
        exit_code,
        signal,
        timestamp: ServiceEvent::current_timestamp(),
    }
}

/// Forward a child's output stream line by line into the log
#[cfg(unix)]
fn forward_output<R>(service: String, stream: &'static str, reader: R)
where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
{
    use tokio::io::{AsyncBufReadExt, BufReader};

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::info!(target: "trellis::output", service = %service, stream, "{}", line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        target: "trellis::output",
                        service = %service,
                        "Error reading {} stream: {}",
                        stream,
                        e
                    );
                    break;
                }
            }
        }
    });
}

/// Unix managed process implementation
///
/// The OS child handle lives in a reaper task that publishes the exit status
/// on a watch channel; this handle only keeps the pid and the receiver.
#[cfg(unix)]
#[derive(Debug)]
struct UnixManagedProcess {
    pid: u32,
    exit_rx: watch::Receiver<Option<ServiceExit>>,
}

#[cfg(unix)]
#[async_trait]
impl ManagedProcess for UnixManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<ServiceExit> {
        wait_for_exit(self.pid, self.exit_rx.clone()).await
    }

    fn exit_status(&self) -> Option<ServiceExit> {
        self.exit_rx.borrow().clone()
    }

    async fn terminate(&self) -> Result<()> {
        crate::process::unix::signal_term_group(self.pid)
    }

    async fn kill(&self) -> Result<()> {
        crate::process::unix::signal_kill_group(self.pid)
    }
}

/// Scripted behaviour for one mock process
#[derive(Debug, Clone, Copy)]
pub struct MockInstruction {
    /// How long until the process "exits" on its own
    pub exit_delay: Duration,
    /// Exit code to report on a natural exit (None means killed by signal)
    pub exit_code: Option<i32>,
    /// Signal to report on a natural exit
    pub signal: Option<i32>,
    /// Whether SIGTERM ends the process (SIGKILL always does)
    pub responds_to_signals: bool,
    /// Fail the spawn itself instead of producing a process
    pub fail_spawn: bool,
}

impl Default for MockInstruction {
    fn default() -> Self {
        Self {
            exit_delay: Duration::from_millis(100),
            exit_code: Some(0),
            signal: None,
            responds_to_signals: true,
            fail_spawn: false,
        }
    }
}

impl MockInstruction {
    /// A process that runs until it is signalled
    pub fn long_running() -> Self {
        Self {
            exit_delay: Duration::from_secs(3600),
            ..Self::default()
        }
    }

    /// A process that exits with `code` after `delay`
    pub fn exits_after(delay: Duration, code: i32) -> Self {
        Self {
            exit_delay: delay,
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// A process that ignores SIGTERM and only dies on SIGKILL
    pub fn ignores_sigterm() -> Self {
        Self {
            responds_to_signals: false,
            ..Self::long_running()
        }
    }

    /// A spawn that fails, as if the executable were missing
    pub fn spawn_failure() -> Self {
        Self {
            fail_spawn: true,
            ..Self::default()
        }
    }
}

/// Mock process adapter for testing
///
/// Instructions are consumed in order; once the queue is empty the fallback
/// instruction is used for every further spawn. A service with its own queue
/// draws from that queue first.
#[derive(Debug, Clone)]
pub struct MockProcessAdapter {
    instructions: Arc<Mutex<VecDeque<MockInstruction>>>,
    per_service: Arc<Mutex<HashMap<String, VecDeque<MockInstruction>>>>,
    fallback: MockInstruction,
    spawned: Arc<Mutex<Vec<Arc<MockManagedProcess>>>>,
    spawned_services: Arc<Mutex<Vec<String>>>,
    spawn_attempts: Arc<AtomicU32>,
    next_pid: Arc<AtomicU32>,
}

impl MockProcessAdapter {
    /// Create a new mock adapter whose processes exit cleanly after 100ms
    pub fn new() -> Self {
        Self::with_fallback(MockInstruction::default())
    }

    /// Create a mock adapter using `fallback` once the queue is drained
    pub fn with_fallback(fallback: MockInstruction) -> Self {
        Self {
            instructions: Arc::new(Mutex::new(VecDeque::new())),
            per_service: Arc::new(Mutex::new(HashMap::new())),
            fallback,
            spawned: Arc::new(Mutex::new(Vec::new())),
            spawned_services: Arc::new(Mutex::new(Vec::new())),
            spawn_attempts: Arc::new(AtomicU32::new(0)),
            next_pid: Arc::new(AtomicU32::new(10_000)),
        }
    }

    /// Queue an instruction for the next spawn
    pub fn add_instruction(&self, instruction: MockInstruction) {
        if let Ok(mut queue) = self.instructions.lock() {
            queue.push_back(instruction);
        }
    }

    /// Queue an instruction for the next spawn of `service`
    pub fn add_instruction_for(&self, service: &str, instruction: MockInstruction) {
        if let Ok(mut queues) = self.per_service.lock() {
            queues
                .entry(service.to_string())
                .or_default()
                .push_back(instruction);
        }
    }

    /// Service names of every spawn call, in call order
    pub fn spawned_services(&self) -> Vec<String> {
        self.spawned_services
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }

    /// Number of spawn calls, successful or not
    pub fn spawn_attempts(&self) -> u32 {
        self.spawn_attempts.load(Ordering::SeqCst)
    }

    /// Every process handed out so far, oldest first
    pub fn processes(&self) -> Vec<Arc<MockManagedProcess>> {
        self.spawned
            .lock()
            .map(|spawned| spawned.clone())
            .unwrap_or_default()
    }

    fn next_instruction(&self, service: &str) -> MockInstruction {
        let own = self
            .per_service
            .lock()
            .ok()
            .and_then(|mut queues| queues.get_mut(service).and_then(VecDeque::pop_front));
        own.or_else(|| {
            self.instructions
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
        })
        .unwrap_or(self.fallback)
    }
}

impl Default for MockProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessAdapter for MockProcessAdapter {
    async fn spawn(&self, spec: &ServiceSpec) -> Result<Arc<dyn ManagedProcess>> {
        self.spawn_attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut names) = self.spawned_services.lock() {
            names.push(spec.name.clone());
        }
        let instruction = self.next_instruction(&spec.name);
        if instruction.fail_spawn {
            return Err(crate::CoreError::ProcessSpawn(format!(
                "Failed to spawn '{}': No such file or directory",
                spec.display_command()
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        debug!("Spawning mock process {} for '{}'", pid, spec.name);

        let process = Arc::new(MockManagedProcess::start(pid, instruction));
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(process.clone());
        }
        Ok(process)
    }
}

/// Mock managed process for testing
#[derive(Debug)]
pub struct MockManagedProcess {
    pid: u32,
    instruction: MockInstruction,
    exit_tx: Arc<watch::Sender<Option<ServiceExit>>>,
    terminate_calls: AtomicU32,
    kill_calls: AtomicU32,
}

impl MockManagedProcess {
    fn start(pid: u32, instruction: MockInstruction) -> Self {
        let (exit_tx, _) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);

        let timer_tx = Arc::downgrade(&exit_tx);
        tokio::spawn(async move {
            tokio::time::sleep(instruction.exit_delay).await;
            if let Some(tx) = timer_tx.upgrade() {
                publish_exit(&tx, pid, instruction.exit_code, instruction.signal);
            }
        });

        Self {
            pid,
            instruction,
            exit_tx,
            terminate_calls: AtomicU32::new(0),
            kill_calls: AtomicU32::new(0),
        }
    }

    /// Simulate the process dying for a reason outside the supervisor
    pub fn exit_now(&self, exit_code: Option<i32>, signal: Option<i32>) {
        publish_exit(&self.exit_tx, self.pid, exit_code, signal);
    }

    /// How many times terminate was requested
    pub fn terminate_calls(&self) -> u32 {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// How many times kill was requested
    pub fn kill_calls(&self) -> u32 {
        self.kill_calls.load(Ordering::SeqCst)
    }
}

/// Record an exit unless one was already recorded
fn publish_exit(
    tx: &watch::Sender<Option<ServiceExit>>,
    pid: u32,
    exit_code: Option<i32>,
    signal: Option<i32>,
) {
    tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(ServiceExit {
            pid,
            exit_code,
            signal,
            timestamp: ServiceEvent::current_timestamp(),
        });
        true
    });
}

#[async_trait]
impl ManagedProcess for MockManagedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<ServiceExit> {
        wait_for_exit(self.pid, self.exit_tx.subscribe()).await
    }

    fn exit_status(&self) -> Option<ServiceExit> {
        self.exit_tx.borrow().clone()
    }

    async fn terminate(&self) -> Result<()> {
        debug!("Terminating mock process {}", self.pid);
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        if self.instruction.responds_to_signals {
            publish_exit(&self.exit_tx, self.pid, None, Some(15));
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        debug!("Killing mock process {}", self.pid);
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        publish_exit(&self.exit_tx, self.pid, None, Some(9));
        Ok(())
    }
}
