//! Process exit codes for the `taskrelay` binary
//!
//! Provider failures map by [`ErrorKind`]: errors a retry could not fix exit
//! with 2, retryable errors that exhausted their attempts exit with 3.

use std::fmt;
use taskrelay_dispatch::DispatchError;
use taskrelay_orchestrator::RunError;
use taskrelay_utils::{ErrorKind, ProviderError};

/// Exit code for the `taskrelay` process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error (runtime, store, serialization)
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// Invalid arguments or configuration, or a non-retryable provider error
    pub const INVALID: ExitCode = ExitCode(2);

    /// A retryable provider error persisted through every attempt
    pub const RETRIES_EXHAUSTED: ExitCode = ExitCode(3);

    /// Cancelled by the user (Ctrl-C)
    pub const CANCELLED: ExitCode = ExitCode(130);

    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn from_provider_error(error: &ProviderError) -> Self {
        if error.kind == ErrorKind::Cancelled {
            Self::CANCELLED
        } else if error.is_retryable() {
            Self::RETRIES_EXHAUSTED
        } else {
            Self::INVALID
        }
    }

    #[must_use]
    pub fn from_dispatch_error(error: &DispatchError) -> Self {
        error
            .provider_error()
            .map_or(Self::INTERNAL, Self::from_provider_error)
    }

    #[must_use]
    pub fn from_run_error(error: &RunError) -> Self {
        match error {
            RunError::Failed { source, .. } => Self::from_dispatch_error(source),
            RunError::InvalidTask(_) => Self::INVALID,
            RunError::Store(_) => Self::INTERNAL,
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_utils::StoreError;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::INVALID.as_i32(), 2);
        assert_eq!(ExitCode::RETRIES_EXHAUSTED.as_i32(), 3);
        assert_eq!(ExitCode::CANCELLED.as_i32(), 130);
    }

    #[test]
    fn test_provider_error_mapping() {
        let cases = [
            (ErrorKind::InvalidArgument, ExitCode::INVALID),
            (ErrorKind::Authentication, ExitCode::INVALID),
            (ErrorKind::InvalidRequest, ExitCode::INVALID),
            (ErrorKind::RateLimited, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::Network, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::Timeout, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::ServiceUnavailable, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::ProcessFailed, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::EmptyOutput, ExitCode::RETRIES_EXHAUSTED),
            (ErrorKind::Cancelled, ExitCode::CANCELLED),
        ];
        for (kind, expected) in cases {
            let err = ProviderError::new(kind, "boom");
            assert_eq!(ExitCode::from_provider_error(&err), expected, "{kind}");
        }
    }

    #[test]
    fn test_api_error_depends_on_status() {
        let server = ProviderError::new(ErrorKind::ApiError, "bad gateway").with_status(502);
        let malformed = ProviderError::new(ErrorKind::ApiError, "no choices");
        assert_eq!(ExitCode::from_provider_error(&server), ExitCode::RETRIES_EXHAUSTED);
        assert_eq!(ExitCode::from_provider_error(&malformed), ExitCode::INVALID);
    }

    #[test]
    fn test_wrapped_errors() {
        let dispatch = DispatchError::provider(ProviderError::cancelled(), None);
        assert_eq!(ExitCode::from_dispatch_error(&dispatch), ExitCode::CANCELLED);

        let store = DispatchError::Store(StoreError::NotFound("w1".into()));
        assert_eq!(ExitCode::from_dispatch_error(&store), ExitCode::INTERNAL);

        let invalid = RunError::InvalidTask("task is empty".into());
        assert_eq!(ExitCode::from_run_error(&invalid), ExitCode::INVALID);
    }
}
