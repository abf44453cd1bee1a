//! Configuration loading and validation for a trellis stack
//!
//! This module parses the TOML stack file into schema types, applies defaults
//! (via serde defaults), and performs strict validation with field-path error
//! messages. It also checks the required environment before anything starts.

use crate::build::BuildArtifact;
use crate::{CoreError, Result};
use schema::{BackoffConfig, BuildSpec, HealthCheck, HealthCheckType, ServiceSpec};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level TOML structure of a stack file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Supervision tuning
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Environment that must be present before startup
    #[serde(default)]
    pub environment: EnvironmentSpec,
    /// Dependency build producing the dependent service's executable
    pub build: BuildSpec,
    /// Service started first
    pub foundation: ServiceSpec,
    /// Service started once the foundation is ready
    pub dependent: DependentConfig,
}

/// `[supervisor]` table
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Exits tolerated per service before giving up
    pub max_restarts: u32,
    /// Time a process gets after SIGTERM before SIGKILL
    pub grace_timeout_secs: u64,
    /// Wait after starting the foundation when it has no health check
    pub settle_delay_secs: u64,
    /// Upper bound on the foundation readiness wait
    pub readiness_timeout_secs: u64,
    /// Time between health monitor passes
    pub health_interval_secs: u64,
    /// Wake-up period of the monitoring loop
    pub monitor_tick_ms: u64,
    /// Restart delays
    pub backoff: BackoffConfig,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            grace_timeout_secs: 10,
            settle_delay_secs: 3,
            readiness_timeout_secs: 30,
            health_interval_secs: 30,
            monitor_tick_ms: 1000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SupervisorSettings {
    /// Grace period as a Duration
    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.grace_timeout_secs)
    }

    /// Settle delay as a Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Readiness timeout as a Duration
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Health interval as a Duration
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Monitoring loop tick as a Duration
    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }
}

/// `[environment]` table
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentSpec {
    /// Variables that must be set and non-empty
    pub required: Vec<String>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            required: vec!["DATABASE_URL".to_string(), "SECRET_KEY".to_string()],
        }
    }
}

/// `[dependent]` table; its program is the build artifact
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DependentConfig {
    /// Unique service name
    pub name: String,
    /// Arguments passed to the artifact
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Optional liveness probe
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
}

impl DependentConfig {
    /// Service spec running `artifact` with the configured arguments
    pub fn spec(&self, artifact: &BuildArtifact) -> ServiceSpec {
        ServiceSpec {
            name: self.name.clone(),
            command: artifact.command(&self.args),
            environment: self.environment.clone(),
            working_directory: self.working_directory.clone(),
            health_check: self.health_check.clone(),
        }
    }
}

impl StackConfig {
    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        let s = &self.supervisor;
        if s.max_restarts < 1 {
            return Err(invalid("supervisor.max_restarts: must be >= 1"));
        }
        if s.grace_timeout_secs == 0 {
            return Err(invalid("supervisor.grace_timeout_secs: must be > 0"));
        }
        if s.health_interval_secs == 0 {
            return Err(invalid("supervisor.health_interval_secs: must be > 0"));
        }
        if s.monitor_tick_ms == 0 {
            return Err(invalid("supervisor.monitor_tick_ms: must be > 0"));
        }

        let b = &s.backoff;
        if !(b.base_delay_secs.is_finite() && b.base_delay_secs >= 0.0) {
            return Err(invalid("supervisor.backoff.base_delay_secs: must be >= 0"));
        }
        if !(b.multiplier.is_finite() && b.multiplier >= 1.0) {
            return Err(invalid("supervisor.backoff.multiplier: must be >= 1.0"));
        }
        if !(b.max_delay_secs.is_finite() && b.max_delay_secs >= b.base_delay_secs) {
            return Err(invalid(
                "supervisor.backoff.max_delay_secs: must be >= base_delay_secs",
            ));
        }
        if !(0.0..=1.0).contains(&b.jitter_factor) {
            return Err(invalid(
                "supervisor.backoff.jitter_factor: must be between 0.0 and 1.0",
            ));
        }

        for (i, name) in self.environment.required.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "environment.required[{}]: cannot be empty",
                    i
                )));
            }
        }

        if self.build.command.iter().all(|part| part.trim().is_empty()) {
            return Err(invalid("build.command: cannot be empty"));
        }
        if self.build.artifact.trim().is_empty() {
            return Err(invalid("build.artifact: cannot be empty"));
        }
        if self.build.timeout_secs == 0 {
            return Err(invalid("build.timeout_secs: must be > 0"));
        }

        if self.foundation.name.trim().is_empty() {
            return Err(invalid("foundation.name: cannot be empty"));
        }
        if self.foundation.program().map_or(true, |p| p.trim().is_empty()) {
            return Err(invalid("foundation.command: cannot be empty"));
        }
        validate_env_keys("foundation", &self.foundation.environment)?;
        if let Some(check) = &self.foundation.health_check {
            validate_probe("foundation", check)?;
        }

        if self.dependent.name.trim().is_empty() {
            return Err(invalid("dependent.name: cannot be empty"));
        }
        if self.dependent.name == self.foundation.name {
            return Err(CoreError::ValidationError(format!(
                "dependent.name: duplicate name '{}'",
                self.dependent.name
            )));
        }
        validate_env_keys("dependent", &self.dependent.environment)?;
        if let Some(check) = &self.dependent.health_check {
            validate_probe("dependent", check)?;
        }

        Ok(())
    }
}

fn invalid(message: &str) -> CoreError {
    CoreError::ValidationError(message.to_string())
}

fn validate_env_keys(section: &str, environment: &HashMap<String, String>) -> Result<()> {
    if environment.keys().any(|k| k.trim().is_empty()) {
        return Err(CoreError::ValidationError(format!(
            "{}.environment: keys cannot be empty",
            section
        )));
    }
    Ok(())
}

fn validate_probe(section: &str, check: &HealthCheck) -> Result<()> {
    if check.timeout_ms == 0 {
        return Err(CoreError::ValidationError(format!(
            "{}.health_check.timeout_ms: must be > 0",
            section
        )));
    }
    match &check.check_type {
        HealthCheckType::Tcp { port } => {
            if *port == 0 {
                return Err(CoreError::ValidationError(format!(
                    "{}.health_check.type[tcp].port: must be 1..=65535",
                    section
                )));
            }
        }
        HealthCheckType::Exec { command } => {
            if command.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "{}.health_check.type[exec].command: cannot be empty",
                    section
                )));
            }
        }
    }
    Ok(())
}

/// Load a stack from a TOML file path
pub fn load_stack_from_toml_path(path: impl AsRef<Path>) -> Result<StackConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_stack_from_toml_str(&data)
}

/// Load a stack from a TOML string
pub fn load_stack_from_toml_str(input: &str) -> Result<StackConfig> {
    let cfg: StackConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Fail unless every required variable is set to a non-blank value
pub fn check_environment(spec: &EnvironmentSpec) -> Result<()> {
    check_environment_with(spec, |name| std::env::var(name).ok())
}

/// [`check_environment`] against an arbitrary lookup
pub fn check_environment_with<F>(spec: &EnvironmentSpec, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<&str> = spec
        .required
        .iter()
        .map(String::as_str)
        .filter(|name| lookup(name).map_or(true, |value| value.trim().is_empty()))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CoreError::EnvironmentMisconfiguration(format!(
            "required variable(s) missing or empty: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid_config() -> String {
        r#"
        [supervisor]
        max_restarts = 3
        grace_timeout_secs = 2

        [supervisor.backoff]
        base_delay_secs = 0.5
        max_delay_secs = 10.0

        [build]
        command = ["cargo", "build", "--release"]
        artifact = "target/release/app"

        [foundation]
        name = "dep"
        command = ["postgres", "-D", "/var/lib/pg"]
        health_check = { type = "tcp", port = 5432, timeout_ms = 500 }

        [dependent]
        name = "app"
        args = ["--port", "8000"]
        "#
        .to_string()
    }

    #[test]
    fn parses_and_validates_valid_config() {
        let cfg = load_stack_from_toml_str(&valid_config()).expect("should parse");
        assert_eq!(cfg.supervisor.max_restarts, 3);
        assert_eq!(cfg.supervisor.grace_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.supervisor.settle_delay(), Duration::from_secs(3));
        assert_eq!(cfg.supervisor.backoff.multiplier, 2.0);
        assert_eq!(cfg.build.timeout_secs, 60);
        assert_eq!(
            cfg.environment.required,
            vec!["DATABASE_URL".to_string(), "SECRET_KEY".to_string()]
        );
        assert_eq!(
            cfg.foundation.health_check,
            Some(HealthCheck {
                check_type: HealthCheckType::Tcp { port: 5432 },
                timeout_ms: 500,
            })
        );
    }

    #[test]
    fn dependent_spec_runs_the_artifact() {
        let cfg = load_stack_from_toml_str(&valid_config()).unwrap();
        let artifact = BuildArtifact {
            path: PathBuf::from("/srv/app/target/release/app"),
        };
        let spec = cfg.dependent.spec(&artifact);
        assert_eq!(spec.name, "app");
        assert_eq!(
            spec.command,
            vec!["/srv/app/target/release/app", "--port", "8000"]
        );
    }

    #[test]
    fn errors_on_duplicate_names() {
        let input = valid_config().replace("name = \"app\"", "name = \"dep\"");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("dependent.name: duplicate name 'dep'"));
    }

    #[test]
    fn errors_on_bad_backoff() {
        let input = valid_config().replace("max_delay_secs = 10.0", "max_delay_secs = 10.0\njitter_factor = 1.5");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("supervisor.backoff.jitter_factor"));

        let input = valid_config().replace("max_delay_secs = 10.0", "max_delay_secs = 0.1");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("supervisor.backoff.max_delay_secs"));
    }

    #[test]
    fn errors_on_zero_budget() {
        let input = valid_config().replace("max_restarts = 3", "max_restarts = 0");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert_eq!(err.code(), "CORE002");
        assert!(format!("{}", err).contains("supervisor.max_restarts"));
    }

    #[test]
    fn errors_on_empty_commands() {
        let input = valid_config().replace(r#"["postgres", "-D", "/var/lib/pg"]"#, "[]");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("foundation.command"));

        let input = valid_config().replace(r#"["cargo", "build", "--release"]"#, "[]");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("build.command"));
    }

    #[test]
    fn errors_on_tcp_bad_port() {
        let input = valid_config().replace("port = 5432", "port = 0");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert!(format!("{}", err).contains("type[tcp].port"));
    }

    #[test]
    fn errors_on_missing_section() {
        let input = valid_config().replace("[dependent]", "[other]");
        let err = load_stack_from_toml_str(&input).unwrap_err();
        assert_eq!(err.code(), "CORE001");
    }

    #[test]
    fn reads_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.toml");
        std::fs::write(&path, valid_config()).unwrap();
        assert!(load_stack_from_toml_path(&path).is_ok());
        assert!(load_stack_from_toml_path(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn environment_check_reports_every_missing_variable() {
        let spec = EnvironmentSpec::default();
        let vars: HashMap<&str, &str> = [("DATABASE_URL", "postgres://localhost/db")].into();
        let lookup = |name: &str| vars.get(name).map(|v| v.to_string());

        let err = check_environment_with(&spec, lookup).unwrap_err();
        assert!(matches!(err, CoreError::EnvironmentMisconfiguration(_)));
        assert!(err.to_string().contains("SECRET_KEY"));
        assert!(!err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn environment_check_rejects_blank_values() {
        let spec = EnvironmentSpec {
            required: vec!["SECRET_KEY".to_string()],
        };
        assert!(check_environment_with(&spec, |_| Some("   ".to_string())).is_err());
        assert!(check_environment_with(&spec, |_| Some("s3cr3t".to_string())).is_ok());
    }
}
