#[cfg(test)]
mod tests {
    use crate::{DaemonError, Result};
    use std::time::Duration;
    use trellis_core::CoreError;

    #[test]
    fn test_daemon_error_display() {
        let err = DaemonError::Startup("signal handlers unavailable".to_string());
        assert_eq!(err.to_string(), "Startup failed: signal handlers unavailable");

        let err = DaemonError::Fatal("supervision task for 'dep' panicked".to_string());
        assert_eq!(
            err.to_string(),
            "Fatal supervisor error: supervision task for 'dep' panicked"
        );

        let err: DaemonError = CoreError::BuildTimeout(Duration::from_secs(60)).into();
        assert_eq!(err.to_string(), "Build timed out after 60s");
    }

    #[test]
    fn test_daemon_error_codes() {
        assert_eq!(DaemonError::Startup("x".to_string()).code(), "DAEMON001");
        assert_eq!(DaemonError::Fatal("x".to_string()).code(), "DAEMON002");
        let err: DaemonError = CoreError::EnvironmentMisconfiguration("x".to_string()).into();
        assert_eq!(err.code(), "CORE003");
    }

    #[test]
    fn test_every_error_exits_with_one() {
        let errors = vec![
            DaemonError::Startup("x".to_string()),
            DaemonError::Fatal("x".to_string()),
            CoreError::BuildFailed("x".to_string()).into(),
            CoreError::ValidationError("x".to_string()).into(),
        ];
        for err in errors {
            assert_eq!(err.exit_code(), 1, "{err}");
        }
    }

    #[test]
    fn test_startup_fatal_errors() {
        let err: DaemonError = CoreError::EnvironmentMisconfiguration("x".to_string()).into();
        assert!(err.is_startup_fatal());
        let err: DaemonError = CoreError::BuildTimeout(Duration::from_secs(1)).into();
        assert!(err.is_startup_fatal());
        assert!(DaemonError::Startup("x".to_string()).is_startup_fatal());
        assert!(!DaemonError::Fatal("x".to_string()).is_startup_fatal());
        let err: DaemonError = CoreError::ProcessWait("x".to_string()).into();
        assert!(!err.is_startup_fatal());
    }

    #[test]
    fn test_question_mark_converts_core_errors() {
        fn load() -> Result<()> {
            Err(CoreError::ConfigurationError("missing [build]".to_string()))?;
            Ok(())
        }
        assert!(matches!(load(), Err(DaemonError::Core(CoreError::ConfigurationError(_)))));
    }
}
