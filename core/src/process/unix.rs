//! Unix process management with safe spawn/kill using process groups
//!
//! Every process the supervisor launches, services and build commands alike,
//! is placed in its own session and process group via `setsid()`. Signals are
//! then delivered with `killpg`, so helper processes a service forks are torn
//! down together with it.
//!
//! - SIGTERM is used for graceful termination, SIGKILL for forceful termination
//! - `ESRCH` and `EPERM` while signalling mean the group is already gone and
//!   are reported as success

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, error};

/// Options for [`spawn`] beyond the argument vector
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions<'a> {
    /// Extra environment variables layered over the inherited environment
    pub environment: Option<&'a HashMap<String, String>>,
    /// Working directory for the child
    pub working_directory: Option<&'a str>,
}

/// A child process that leads its own process group
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: Pid,
    /// The underlying Child handle for waiting and status checking
    child: Child,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }
}

/// Spawn an argument vector in its own process group
///
/// stdout and stderr are piped so callers can forward or capture them; stdin
/// is closed. The child is killed if the handle is dropped while it is still
/// running.
///
/// ## Example
///
/// ```rust,no_run
/// use trellis_core::process::unix::{spawn, SpawnOptions};
///
/// # async fn demo() -> trellis_core::Result<()> {
/// let argv = vec!["sleep".to_string(), "1".to_string()];
/// let child = spawn(&argv, SpawnOptions::default())?;
/// assert!(child.pid() > 0);
/// # Ok(())
/// # }
/// ```
pub fn spawn(argv: &[String], options: SpawnOptions<'_>) -> Result<ChildProcess> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CoreError::ProcessSpawn("Empty command".to_string()))?;
    debug!("Spawning process: {} {:?}", program, args);

    let mut command = Command::new(program);
    command.args(args);
    if let Some(env) = options.environment {
        command.envs(env);
    }
    if let Some(dir) = options.working_directory {
        command.current_dir(dir);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", program, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", program, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Successfully spawned process {} in new process group", pid);

    Ok(ChildProcess { pid, child })
}

/// Send SIGTERM to the process group led by `pid`
pub fn signal_term_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGTERM)
}

/// Send SIGKILL to the process group led by `pid`
pub fn signal_kill_group(pid: u32) -> Result<()> {
    signal_group(pid, Signal::SIGKILL)
}

fn signal_group(pid: u32, signal: Signal) -> Result<()> {
    let pgid = Pid::from_raw(pid as i32);
    debug!("Sending {} to process group {}", signal, pgid);

    match killpg(pgid, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            debug!("Process group {} already exited", pgid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                pgid
            );
            Ok(())
        }
        Err(e) => {
            error!("Failed to send {} to process group {}: {}", signal, pgid, e);
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, pgid, e
            )))
        }
    }
}
