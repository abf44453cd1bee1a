//! One-shot dependency build
//!
//! Runs the configured build command in its own process group, capturing its
//! output, and waits up to the configured timeout. On timeout the whole group
//! is killed. A build is never retried; any failure is fatal to startup.

use crate::process::unix::{self, SpawnOptions};
use crate::{CoreError, Result};
use schema::BuildSpec;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info};

const LOG_TARGET: &str = "trellis::build";

/// How many trailing stderr lines a build failure carries
const STDERR_TAIL_LINES: usize = 20;

/// Output of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Path of the produced executable
    pub path: PathBuf,
}

impl BuildArtifact {
    /// Argument vector running the artifact with `args`
    pub fn command(&self, args: &[String]) -> Vec<String> {
        std::iter::once(self.path.to_string_lossy().into_owned())
            .chain(args.iter().cloned())
            .collect()
    }
}

/// Run the build described by `spec`
pub async fn run_build(spec: &BuildSpec) -> Result<BuildArtifact> {
    let started = Instant::now();
    info!(
        target: LOG_TARGET,
        timeout_secs = spec.timeout_secs,
        "Building dependencies: {}",
        spec.command.join(" ")
    );

    let options = SpawnOptions {
        environment: None,
        working_directory: spec.working_directory.as_deref(),
    };
    let mut child = unix::spawn(&spec.command, options)
        .map_err(|e| CoreError::BuildFailed(format!("could not start build: {e}")))?;
    let pid = child.pid();

    let mut stdout = child.take_stdout().map(|out| collect_lines(out, "stdout"));
    let mut stderr = child.take_stderr().map(|err| collect_lines(err, "stderr"));

    // Output capture shares the deadline: a helper left behind by the build
    // can hold the pipes open after the build command itself has exited.
    let deadline = started + spec.timeout();
    let finished = timeout_at(deadline, async {
        let status = child.wait().await;
        let _ = join_lines(stdout.as_mut()).await;
        let stderr_lines = join_lines(stderr.as_mut()).await;
        (status, stderr_lines)
    })
    .await;

    let (status, stderr_lines) = match finished {
        Ok((status, stderr_lines)) => (status?, stderr_lines),
        Err(_) => {
            error!(
                target: LOG_TARGET,
                "Build exceeded {:?}; killing process group {}",
                spec.timeout(),
                pid
            );
            let _ = unix::signal_kill_group(pid);
            let _ = child.wait().await;
            for reader in stdout.iter().chain(stderr.iter()) {
                reader.abort();
            }
            return Err(CoreError::BuildTimeout(spec.timeout()));
        }
    };

    if !status.success() {
        let tail_start = stderr_lines.len().saturating_sub(STDERR_TAIL_LINES);
        let tail = stderr_lines[tail_start..].join("\n");
        error!(target: LOG_TARGET, "Build failed with {}:\n{}", status, tail);
        return Err(CoreError::BuildFailed(if tail.is_empty() {
            format!("build exited with {status}")
        } else {
            format!("build exited with {status}: {tail}")
        }));
    }

    let path = resolve_artifact(spec);
    if !path.exists() {
        return Err(CoreError::BuildFailed(format!(
            "build succeeded but artifact {} does not exist",
            path.display()
        )));
    }

    info!(
        target: LOG_TARGET,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Build finished: {}",
        path.display()
    );
    Ok(BuildArtifact { path })
}

/// Use an artifact from an earlier build without running the command
pub fn existing_artifact(spec: &BuildSpec) -> Result<BuildArtifact> {
    let path = resolve_artifact(spec);
    if path.exists() {
        info!(target: LOG_TARGET, "Skipping build; using {}", path.display());
        Ok(BuildArtifact { path })
    } else {
        Err(CoreError::BuildFailed(format!(
            "build skipped but artifact {} does not exist",
            path.display()
        )))
    }
}

/// Relative artifact paths are relative to the build's working directory
fn resolve_artifact(spec: &BuildSpec) -> PathBuf {
    let artifact = Path::new(&spec.artifact);
    match &spec.working_directory {
        Some(dir) if artifact.is_relative() => Path::new(dir).join(artifact),
        _ => artifact.to_path_buf(),
    }
}

fn collect_lines<R>(reader: R, stream: &'static str) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: LOG_TARGET, stream, "{}", line);
            captured.push(line);
        }
        captured
    })
}

async fn join_lines(handle: Option<&mut JoinHandle<Vec<String>>>) -> Vec<String> {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}
