//! Tests for core error codes and display formatting

use crate::error::CoreError;
use std::time::Duration;

#[test]
fn test_error_codes_are_stable() {
    assert_eq!(CoreError::ConfigurationError("x".to_string()).code(), "CORE001");
    assert_eq!(CoreError::ValidationError("x".to_string()).code(), "CORE002");
    assert_eq!(
        CoreError::EnvironmentMisconfiguration("x".to_string()).code(),
        "CORE003"
    );
    assert_eq!(CoreError::BuildFailed("x".to_string()).code(), "CORE005");
    assert_eq!(CoreError::BuildTimeout(Duration::from_secs(1)).code(), "CORE006");
    assert_eq!(CoreError::ProcessSpawn("x".to_string()).code(), "CORE007");
    assert_eq!(CoreError::ProcessWait("x".to_string()).code(), "CORE009");
}

#[test]
fn test_error_display() {
    let error = CoreError::EnvironmentMisconfiguration("DATABASE_URL is not set".to_string());
    assert_eq!(
        error.to_string(),
        "Environment misconfiguration: DATABASE_URL is not set"
    );

    let error = CoreError::BuildTimeout(Duration::from_secs(60));
    assert_eq!(error.to_string(), "Build timed out after 60s");
}

#[test]
fn test_startup_fatal_classification() {
    assert!(CoreError::EnvironmentMisconfiguration("x".to_string()).is_startup_fatal());
    assert!(CoreError::BuildFailed("x".to_string()).is_startup_fatal());
    assert!(CoreError::BuildTimeout(Duration::from_secs(1)).is_startup_fatal());
    assert!(!CoreError::ProcessSpawn("x".to_string()).is_startup_fatal());
    assert!(!CoreError::ProcessSignal("x".to_string()).is_startup_fatal());
}

#[test]
fn test_io_errors_convert() {
    let error: CoreError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert_eq!(error.code(), "CORE010");
    assert_eq!(error.to_string(), "I/O error: gone");
}
