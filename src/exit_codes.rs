//! Exit code constants and error mapping for the CLI.

use crate::error::AppForgeError;

/// Exit code constants.
pub mod codes {
    /// Operation completed successfully.
    pub const SUCCESS: i32 = 0;

    /// Task spec, plan, or path validation failed.
    pub const VALIDATION: i32 = 1;

    /// API failure, timeout, budget breach, or circuit breaker trip.
    pub const PIPELINE: i32 = 2;

    /// Strict-verification failure.
    pub const VERIFICATION: i32 = 3;

    /// Unexpected error (IO, database, bugs).
    pub const UNEXPECTED: i32 = 4;
}

/// Map an error to the process exit code.
#[must_use]
pub fn error_to_exit_code(error: &AppForgeError) -> i32 {
    match error {
        AppForgeError::Validation(_) => codes::VALIDATION,

        AppForgeError::Api { .. }
        | AppForgeError::Timeout(_)
        | AppForgeError::LimitExceeded { .. }
        | AppForgeError::CircuitBreaker(_)
        | AppForgeError::Aborted(_)
        | AppForgeError::LockHeld { .. } => codes::PIPELINE,

        AppForgeError::Verification(_) => codes::VERIFICATION,

        AppForgeError::Store(_) | AppForgeError::Io(_) => codes::UNEXPECTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimitType;
    use std::time::Duration;

    #[test]
    fn exit_code_constants() {
        assert_eq!(codes::SUCCESS, 0);
        assert_eq!(codes::VALIDATION, 1);
        assert_eq!(codes::PIPELINE, 2);
        assert_eq!(codes::VERIFICATION, 3);
        assert_eq!(codes::UNEXPECTED, 4);
    }

    #[test]
    fn validation_maps_to_one() {
        let err = AppForgeError::Validation("bad spec".into());
        assert_eq!(error_to_exit_code(&err), codes::VALIDATION);
    }

    #[test]
    fn pipeline_failures_map_to_two() {
        assert_eq!(
            error_to_exit_code(&AppForgeError::api_transient(429, "limited")),
            codes::PIPELINE
        );
        assert_eq!(
            error_to_exit_code(&AppForgeError::Timeout(Duration::from_secs(120))),
            codes::PIPELINE
        );
        assert_eq!(
            error_to_exit_code(&AppForgeError::LimitExceeded {
                limit_type: LimitType::Tokens,
                message: "Token limit exceeded".into(),
            }),
            codes::PIPELINE
        );
        assert_eq!(
            error_to_exit_code(&AppForgeError::CircuitBreaker("open".into())),
            codes::PIPELINE
        );
    }

    #[test]
    fn verification_maps_to_three() {
        let err = AppForgeError::Verification("quality 0.2 below threshold".into());
        assert_eq!(error_to_exit_code(&err), codes::VERIFICATION);
    }

    #[test]
    fn unexpected_maps_to_four() {
        let err = AppForgeError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert_eq!(error_to_exit_code(&err), codes::UNEXPECTED);
    }
}
