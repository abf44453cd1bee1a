//! Test utilities for integration tests in the daemon crate.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use trellis_core::config::{load_stack_from_toml_str, StackConfig};

/// Run the given future with a timeout, failing the test if it elapses.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Run a future with a default timeout of 60 seconds.
pub async fn run_with_default_timeout<F, T>(fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    run_with_timeout(Duration::from_secs(60), fut).await
}

/// Poll `check` every 20ms until it holds or `limit` elapses
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A stack of two long-running shell processes
///
/// The "build" is `true` and its artifact is `/bin/sh`, so the dependent
/// service runs `/bin/sh -c 'sleep 30'`.
pub fn stack_toml(extra_foundation: &str) -> String {
    format!(
        r#"
[supervisor]
max_restarts = 5
grace_timeout_secs = 2
settle_delay_secs = 0
readiness_timeout_secs = 1
monitor_tick_ms = 50

[supervisor.backoff]
base_delay_secs = 0.2
max_delay_secs = 1.0
jitter_factor = 0.1

[environment]
required = ["PATH"]

[build]
command = ["true"]
artifact = "/bin/sh"
timeout_secs = 10

[foundation]
name = "dep"
command = ["sleep", "30"]
{extra_foundation}

[dependent]
name = "app"
args = ["-c", "sleep 30"]
"#
    )
}

/// Parse [`stack_toml`]
pub fn stack_config(extra_foundation: &str) -> StackConfig {
    load_stack_from_toml_str(&stack_toml(extra_foundation)).expect("valid test config")
}

/// Write `contents` as `trellis.toml` under `dir`
pub fn write_config(dir: &TempDir, contents: &str) -> PathBuf {
    let path = dir.path().join("trellis.toml");
    std::fs::write(&path, contents).expect("write config");
    path
}

/// True while a process with `pid` exists
pub fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}
