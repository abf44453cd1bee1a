//! Event system for the trellis supervisor
//!
//! Every state transition a supervision loop makes is logged and also
//! broadcast as a [`ServiceEvent`], so tests and embedding code can observe
//! the lifecycle without scraping logs.

use crate::service::{ServiceExit, ServiceState};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Events emitted by supervision loops
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "eventType", rename_all = "camelCase")]
pub enum ServiceEvent {
    /// A supervision loop changed state
    StateChanged {
        /// Service name
        service: String,
        /// Previous state
        from_state: ServiceState,
        /// New state
        to_state: ServiceState,
        /// Restart attempt number at the time of the transition
        attempt: u32,
        /// Optional reason for the transition
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A process was spawned
    ProcessStarted {
        /// Service name
        service: String,
        /// Process ID
        pid: u32,
        /// Argument vector used
        command: Vec<String>,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A process exited
    ProcessExited {
        /// Service name
        service: String,
        /// Exit information
        exit: ServiceExit,
    },

    /// A process could not be spawned
    SpawnFailed {
        /// Service name
        service: String,
        /// Attempt number that failed
        attempt: u32,
        /// Error message
        error: String,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },

    /// A restart was scheduled after a backoff delay
    RestartScheduled {
        /// Service name
        service: String,
        /// Restart attempt number
        attempt: u32,
        /// Backoff delay in milliseconds
        delay_ms: u64,
        /// Event timestamp in RFC3339 format
        timestamp: String,
    },
}

impl ServiceEvent {
    /// Name of the service the event belongs to
    pub fn service(&self) -> &str {
        match self {
            Self::StateChanged { service, .. }
            | Self::ProcessStarted { service, .. }
            | Self::ProcessExited { service, .. }
            | Self::SpawnFailed { service, .. }
            | Self::RestartScheduled { service, .. } => service,
        }
    }

    /// Create a current timestamp string in RFC3339 format
    #[must_use]
    pub fn current_timestamp() -> String {
        humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
    }

    /// Create a state changed event
    #[must_use]
    pub fn state_changed(
        service: String,
        from_state: ServiceState,
        to_state: ServiceState,
        attempt: u32,
        reason: Option<String>,
    ) -> Self {
        Self::StateChanged {
            service,
            from_state,
            to_state,
            attempt,
            reason,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a process started event
    #[must_use]
    pub fn process_started(service: String, pid: u32, command: Vec<String>) -> Self {
        Self::ProcessStarted {
            service,
            pid,
            command,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a process exited event
    #[must_use]
    pub fn process_exited(service: String, exit: ServiceExit) -> Self {
        Self::ProcessExited { service, exit }
    }

    /// Create a spawn failed event
    #[must_use]
    pub fn spawn_failed(service: String, attempt: u32, error: String) -> Self {
        Self::SpawnFailed {
            service,
            attempt,
            error,
            timestamp: Self::current_timestamp(),
        }
    }

    /// Create a restart scheduled event
    #[must_use]
    pub fn restart_scheduled(service: String, attempt: u32, delay_ms: u64) -> Self {
        Self::RestartScheduled {
            service,
            attempt,
            delay_ms,
            timestamp: Self::current_timestamp(),
        }
    }
}
