//! Service specification and state types for the trellis supervisor
//!
//! This module contains the data structures that describe a managed program,
//! its restart backoff, its optional liveness probe, the one-shot build step
//! that produces the dependent service's executable, and the states a
//! supervision loop moves through.
//!
//! ## Service Lifecycle
//!
//! ```text
//! Starting → Running → (ExitedClean | Crashed) → Backoff → Starting
//!                                   ↘ StoppedBudgetExceeded
//!     any state → StoppedByRequest (once shutdown is in effect)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Specification for a managed service
///
/// A service is a black box characterized by its name, the argument vector
/// used to launch it and an optional liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSpec {
    /// Unique name of the service, used as the key in every supervisor map
    pub name: String,

    /// Argument vector; the first element is the program to execute
    pub command: Vec<String>,

    /// Extra environment variables for the process
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Working directory for the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Optional liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
}

impl ServiceSpec {
    /// Create a spec from a name and an argument vector
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            environment: HashMap::new(),
            working_directory: None,
            health_check: None,
        }
    }

    /// The program (first element of the argument vector), if any
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// The argument vector joined for display
    pub fn display_command(&self) -> String {
        self.command.join(" ")
    }
}

/// Current state of a supervision loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    /// Process is being spawned
    Starting,
    /// Process is running
    Running,
    /// Process exited on its own with status 0
    ExitedClean,
    /// Process exited on its own with a failure status, or could not be spawned
    Crashed,
    /// Waiting out the restart delay
    Backoff,
    /// Stopped because shutdown was requested (terminal)
    StoppedByRequest,
    /// Stopped because the restart budget ran out (terminal)
    StoppedBudgetExceeded,
}

impl ServiceState {
    /// Whether the loop has finished for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::StoppedByRequest | ServiceState::StoppedBudgetExceeded
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Starting => "STARTING",
            ServiceState::Running => "RUNNING",
            ServiceState::ExitedClean => "EXITED_CLEAN",
            ServiceState::Crashed => "CRASHED",
            ServiceState::Backoff => "BACKOFF",
            ServiceState::StoppedByRequest => "STOPPED_BY_REQUEST",
            ServiceState::StoppedBudgetExceeded => "STOPPED_BUDGET_EXCEEDED",
        };
        f.write_str(s)
    }
}

/// Configuration for exponential backoff restart delays
///
/// The delay for attempt `n` (1-based) is
/// `min(base_delay * multiplier^(n-1), max_delay)` perturbed by up to
/// `±jitter_factor` of itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BackoffConfig {
    /// Delay in seconds before the first restart
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Multiplicative growth per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Cap in seconds applied before jitter
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,

    /// Relative jitter amplitude (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay_secs(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

const fn default_base_delay_secs() -> f64 {
    1.0
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_delay_secs() -> f64 {
    60.0
}

const fn default_jitter_factor() -> f64 {
    0.1
}

/// Liveness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthCheck {
    /// What to probe
    #[serde(flatten)]
    pub check_type: HealthCheckType,

    /// Timeout for a single probe in milliseconds
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

impl HealthCheck {
    /// Create a TCP connect probe against localhost
    pub fn tcp(port: u16) -> Self {
        Self {
            check_type: HealthCheckType::Tcp { port },
            timeout_ms: default_health_timeout_ms(),
        }
    }

    /// Create a probe that runs a command and expects exit status 0
    pub fn exec(command: Vec<String>) -> Self {
        Self {
            check_type: HealthCheckType::Exec { command },
            timeout_ms: default_health_timeout_ms(),
        }
    }

    /// Probe timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

const fn default_health_timeout_ms() -> u64 {
    1000
}

/// Kind of liveness probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HealthCheckType {
    /// TCP connection to a local port
    Tcp {
        /// Port to connect to
        port: u16,
    },
    /// Execute a command and check its exit status
    Exec {
        /// Argument vector of the probe command
        command: Vec<String>,
    },
}

/// One-shot build step producing the dependent service's executable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSpec {
    /// Argument vector of the build command
    pub command: Vec<String>,

    /// Path of the artifact the build produces
    pub artifact: String,

    /// Maximum build duration in seconds
    #[serde(default = "default_build_timeout_secs")]
    pub timeout_secs: u64,

    /// Working directory for the build command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl BuildSpec {
    /// Build timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const fn default_build_timeout_secs() -> u64 {
    60
}

/// Information about a process exit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that terminated the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Exit timestamp in RFC3339 format
    pub timestamp: String,
}

impl ServiceExit {
    /// Whether the process exited with status 0
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }

    /// Whether the process failed (non-zero code or killed by a signal)
    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Short human readable description, e.g. `code 1` or `signal 15`
    pub fn describe(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("code {code}"),
            (None, Some(sig)) => format!("signal {sig}"),
            (None, None) => "unknown status".to_string(),
        }
    }
}
