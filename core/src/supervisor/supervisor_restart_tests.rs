//! Restart behaviour of the supervision loop, driven by the mock adapter

use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::supervisor::{
    spawn_supervisor, BackoffPolicy, MockInstruction, MockProcessAdapter, ProcessRegistry,
    SupervisionOutcome, SupervisorConfig, SupervisorHandle,
};
use schema::{BackoffConfig, ServiceEvent, ServiceSpec, ServiceState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::timeout;

struct Harness {
    adapter: Arc<MockProcessAdapter>,
    shutdown: ShutdownSignal,
    registry: ProcessRegistry,
    events: broadcast::Receiver<ServiceEvent>,
    handle: SupervisorHandle,
}

fn backoff(base_secs: f64) -> BackoffPolicy {
    BackoffPolicy::from_config(&BackoffConfig {
        base_delay_secs: base_secs,
        multiplier: 1.0,
        max_delay_secs: base_secs,
        jitter_factor: 0.0,
    })
}

fn start(adapter: MockProcessAdapter, policy: BackoffPolicy, shutdown: ShutdownSignal) -> Harness {
    let adapter = Arc::new(adapter);
    let registry = ProcessRegistry::new();
    let (event_tx, events) = broadcast::channel(256);

    let handle = spawn_supervisor(SupervisorConfig {
        spec: ServiceSpec::new("dep", vec!["server".to_string()]),
        process_adapter: adapter.clone(),
        max_restarts: 5,
        backoff: policy,
        grace: Duration::from_millis(200),
        shutdown: shutdown.clone(),
        registry: registry.clone(),
        event_tx,
    });

    Harness {
        adapter,
        shutdown,
        registry,
        events,
        handle,
    }
}

impl Harness {
    async fn next_event(&mut self, matches: impl Fn(&ServiceEvent) -> bool) -> ServiceEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event channel closed");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Tear everything down and return the loop's outcome
    async fn finish(self) -> SupervisionOutcome {
        let coordinator = ShutdownCoordinator::new(self.shutdown, Duration::from_millis(200));
        let (task, _) = self.handle.into_parts();
        let mut tasks = HashMap::new();
        tasks.insert("dep".to_string(), task);

        let mut report = coordinator.teardown(&self.registry, &mut tasks).await;
        assert!(report.tasks_cancelled.is_empty(), "loop did not stop on its own");
        report.outcomes.pop().expect("no outcome recorded")
    }
}

#[tokio::test]
async fn test_budget_allows_exactly_max_restarts_starts() {
    let adapter =
        MockProcessAdapter::with_fallback(MockInstruction::exits_after(Duration::from_millis(5), 1));
    let harness = start(adapter, backoff(0.01), ShutdownSignal::new());

    let final_state = timeout(
        Duration::from_secs(5),
        harness.handle.wait_for_state(ServiceState::StoppedBudgetExceeded),
    )
    .await
    .unwrap();
    assert_eq!(final_state, ServiceState::StoppedBudgetExceeded);

    let adapter = harness.adapter.clone();
    let outcome = harness.finish().await;
    assert_eq!(outcome.final_state, ServiceState::StoppedBudgetExceeded);
    assert_eq!(outcome.starts, 5);
    assert_eq!(outcome.restarts, 5);
    assert_eq!(adapter.spawn_attempts(), 5, "no sixth start");
}

#[tokio::test]
async fn test_restart_events_carry_attempt_numbers() {
    let adapter =
        MockProcessAdapter::with_fallback(MockInstruction::exits_after(Duration::from_millis(5), 2));
    let mut harness = start(adapter, backoff(0.125), ShutdownSignal::new());

    for expected in 1..=4 {
        let event = harness
            .next_event(|e| matches!(e, ServiceEvent::RestartScheduled { .. }))
            .await;
        match event {
            ServiceEvent::RestartScheduled {
                attempt, delay_ms, ..
            } => {
                assert_eq!(attempt, expected);
                assert_eq!(delay_ms, 125);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    let event = harness
        .next_event(|e| {
            matches!(
                e,
                ServiceEvent::StateChanged {
                    to_state: ServiceState::StoppedBudgetExceeded,
                    ..
                }
            )
        })
        .await;
    assert!(matches!(event, ServiceEvent::StateChanged { attempt: 5, .. }));
}

#[tokio::test]
async fn test_shutdown_during_backoff_stops_promptly() {
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    adapter.add_instruction(MockInstruction::exits_after(Duration::from_millis(5), 1));
    let harness = start(adapter, backoff(60.0), ShutdownSignal::new());

    let state = timeout(
        Duration::from_secs(5),
        harness.handle.wait_for_state(ServiceState::Backoff),
    )
    .await
    .unwrap();
    assert_eq!(state, ServiceState::Backoff);

    let started = Instant::now();
    harness.shutdown.trigger("test");
    let final_state = timeout(
        Duration::from_secs(1),
        harness.handle.wait_for_state(ServiceState::StoppedByRequest),
    )
    .await
    .expect("backoff was not interrupted");
    assert_eq!(final_state, ServiceState::StoppedByRequest);
    assert!(started.elapsed() < Duration::from_millis(200));

    let adapter = harness.adapter.clone();
    let outcome = harness.finish().await;
    assert_eq!(outcome.restarts, 1);
    assert_eq!(adapter.spawn_attempts(), 1);
}

#[tokio::test]
async fn test_spawn_failure_consumes_an_attempt() {
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    adapter.add_instruction(MockInstruction::spawn_failure());
    let mut harness = start(adapter, backoff(0.01), ShutdownSignal::new());

    let event = harness
        .next_event(|e| matches!(e, ServiceEvent::SpawnFailed { .. }))
        .await;
    assert!(matches!(event, ServiceEvent::SpawnFailed { attempt: 1, .. }));

    harness
        .next_event(|e| matches!(e, ServiceEvent::ProcessStarted { .. }))
        .await;
    assert!(harness.registry.contains("dep"));

    let adapter = harness.adapter.clone();
    let outcome = harness.finish().await;
    assert_eq!(outcome.final_state, ServiceState::StoppedByRequest);
    assert_eq!(outcome.starts, 1);
    assert_eq!(outcome.restarts, 1);
    assert_eq!(adapter.spawn_attempts(), 2);
}

#[tokio::test]
async fn test_clean_exit_is_restarted() {
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    adapter.add_instruction(MockInstruction::exits_after(Duration::from_millis(5), 0));
    let mut harness = start(adapter, backoff(0.01), ShutdownSignal::new());

    harness
        .next_event(|e| {
            matches!(
                e,
                ServiceEvent::StateChanged {
                    to_state: ServiceState::ExitedClean,
                    ..
                }
            )
        })
        .await;
    harness
        .next_event(|e| matches!(e, ServiceEvent::ProcessStarted { .. }))
        .await;

    let outcome = harness.finish().await;
    assert_eq!(outcome.starts, 2);
    assert_eq!(outcome.restarts, 1);
}

#[tokio::test]
async fn test_shutdown_while_running_does_not_restart() {
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    let harness = start(adapter, backoff(0.01), ShutdownSignal::new());

    timeout(
        Duration::from_secs(5),
        harness.handle.wait_for_state(ServiceState::Running),
    )
    .await
    .unwrap();

    let adapter = harness.adapter.clone();
    let outcome = harness.finish().await;
    assert_eq!(outcome.final_state, ServiceState::StoppedByRequest);
    assert_eq!(outcome.restarts, 0);
    assert_eq!(adapter.spawn_attempts(), 1);

    let process = &adapter.processes()[0];
    assert_eq!(process.terminate_calls(), 1);
    assert_eq!(process.kill_calls(), 0);
}

#[tokio::test]
async fn test_no_spawn_when_shutdown_already_set() {
    let shutdown = ShutdownSignal::new();
    shutdown.trigger("before start");
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    let harness = start(adapter, backoff(0.01), shutdown);

    let adapter = harness.adapter.clone();
    let outcome = harness.finish().await;
    assert_eq!(outcome.final_state, ServiceState::StoppedByRequest);
    assert_eq!(outcome.starts, 0);
    assert_eq!(adapter.spawn_attempts(), 0);
}

#[tokio::test]
async fn test_external_kill_restarts_and_stays_registered() {
    let adapter = MockProcessAdapter::with_fallback(MockInstruction::long_running());
    let mut harness = start(adapter, backoff(0.01), ShutdownSignal::new());

    harness
        .next_event(|e| matches!(e, ServiceEvent::ProcessStarted { .. }))
        .await;
    let first_pid = harness.registry.get("dep").unwrap().pid();
    harness.adapter.processes()[0].exit_now(None, Some(9));

    let event = harness
        .next_event(|e| matches!(e, ServiceEvent::ProcessStarted { .. }))
        .await;
    let ServiceEvent::ProcessStarted { pid, .. } = event else {
        panic!("unexpected event");
    };
    assert_ne!(pid, first_pid);
    assert_eq!(harness.registry.get("dep").map(|p| p.pid()), Some(pid));

    let outcome = harness.finish().await;
    assert_eq!(outcome.starts, 2);
    assert_eq!(outcome.final_state, ServiceState::StoppedByRequest);
}
