//! Exec probe: run a command, healthy on exit status 0

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use super::{HealthError, Probe};
use crate::process::unix::{self, SpawnOptions};

/// Runs a command in its own process group and passes on exit status 0
///
/// A command still running at the timeout is killed with its whole group.
#[derive(Debug, Clone)]
pub struct ExecProbe {
    command: Vec<String>,
    timeout: Duration,
}

impl ExecProbe {
    /// Create a probe for `command`; fails if the argument vector is empty
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, HealthError> {
        if command.is_empty() {
            return Err(HealthError::InvalidProbe(
                "exec probe command is empty".to_string(),
            ));
        }
        Ok(Self { command, timeout })
    }
}

#[async_trait]
impl Probe for ExecProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let mut child = unix::spawn(&self.command, SpawnOptions::default())
            .map_err(|e| HealthError::ExecFailed(e.to_string()))?;
        let pid = child.pid();

        // Drain output so a chatty probe cannot block on a full pipe
        if let Some(mut stdout) = child.take_stdout() {
            tokio::spawn(async move { tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await });
        }
        if let Some(mut stderr) = child.take_stderr() {
            tokio::spawn(async move { tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await });
        }

        match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(target: "trellis::health", "{} passed", self.describe());
                Ok(())
            }
            Ok(Ok(status)) => Err(HealthError::ExecFailed(format!(
                "`{}` exited with {}",
                self.command.join(" "),
                status
            ))),
            Ok(Err(e)) => Err(HealthError::ExecFailed(e.to_string())),
            Err(_) => {
                let _ = unix::signal_kill_group(pid);
                let _ = child.wait().await;
                Err(HealthError::Timeout(self.timeout))
            }
        }
    }

    fn describe(&self) -> String {
        format!("exec `{}`", self.command.join(" "))
    }
}
