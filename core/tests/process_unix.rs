//! Integration tests for Unix process management
//!
//! These tests run real processes and verify that:
//! - Spawned processes lead their own process group (via setsid)
//! - Group signals reach the whole group
//! - The shutdown path escalates from SIGTERM to SIGKILL

#![cfg(unix)]
#![allow(unsafe_code)] // Required for libc calls in tests

use std::sync::Arc;
use std::time::{Duration, Instant};
use trellis_core::process::unix::{signal_kill_group, signal_term_group, spawn, SpawnOptions};
use trellis_core::shutdown::{stop_process, StopOutcome};
use trellis_core::supervisor::{ManagedProcess, ProcessAdapter, UnixProcessAdapter};
use trellis_core::ServiceSpec;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_process_group_isolation() {
    let mut child = spawn(&argv(&["sleep", "5"]), SpawnOptions::default()).unwrap();

    let parent_pgid = unsafe { libc::getpgrp() };
    let child_pgid = unsafe { libc::getpgid(child.pid() as i32) };

    assert_eq!(child_pgid as u32, child.pid());
    assert_ne!(child_pgid, parent_pgid);

    signal_kill_group(child.pid()).unwrap();
    child.wait().await.unwrap();
}

#[tokio::test]
async fn test_sigkill_reaches_group() {
    let mut child = spawn(
        &argv(&["sh", "-c", "sleep 30 & sleep 30; wait"]),
        SpawnOptions::default(),
    )
    .unwrap();

    signal_kill_group(child.pid()).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
        .await
        .expect("group did not die")
        .unwrap();
    assert!(!status.success());

    // The whole group is gone, so signalling it again is a no-op
    assert!(signal_term_group(child.pid()).is_ok());
}

#[tokio::test]
async fn test_working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let options = SpawnOptions {
        environment: None,
        working_directory: dir.path().to_str(),
    };
    let mut child = spawn(&argv(&["sh", "-c", "touch marker"]), options).unwrap();
    assert!(child.wait().await.unwrap().success());
    assert!(dir.path().join("marker").exists());
}

#[tokio::test]
async fn test_stop_process_graceful() {
    let adapter = UnixProcessAdapter::new();
    let spec = ServiceSpec::new("sleeper", argv(&["sleep", "30"]));
    let process: Arc<dyn ManagedProcess> = adapter.spawn(&spec).await.unwrap();

    let outcome = stop_process("sleeper", &process, Duration::from_secs(5)).await;
    assert_eq!(outcome, StopOutcome::Graceful);
    assert_eq!(process.exit_status().unwrap().signal, Some(libc::SIGTERM));
}

#[tokio::test]
async fn test_stop_process_escalates_when_sigterm_ignored() {
    let adapter = UnixProcessAdapter::new();
    let spec = ServiceSpec::new("stubborn", argv(&["sh", "-c", "trap '' TERM; sleep 30"]));
    let process = adapter.spawn(&spec).await.unwrap();
    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let outcome = stop_process("stubborn", &process, Duration::from_millis(300)).await;
    assert_eq!(outcome, StopOutcome::Killed);
    assert_eq!(process.exit_status().unwrap().signal, Some(libc::SIGKILL));
    assert!(started.elapsed() < Duration::from_secs(5));
}
