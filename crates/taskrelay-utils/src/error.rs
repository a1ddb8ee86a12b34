use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::redaction::redact_error_message;

/// Classification of every failure a provider call can produce.
///
/// The kind alone decides retry behavior and the user-facing wording, so
/// error sites only pick a kind and a message; they never re-implement
/// retry rules.
///
/// | Kind | Retryable |
/// |------|-----------|
/// | `InvalidArgument` | no |
/// | `Authentication` | no |
/// | `InvalidRequest` | no |
/// | `RateLimited` | yes |
/// | `Network` | yes |
/// | `Timeout` | yes |
/// | `ServiceUnavailable` | yes |
/// | `ApiError` | only for 5xx statuses |
/// | `ProcessFailed` | yes |
/// | `EmptyOutput` | yes |
/// | `Cancelled` | no |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown provider or model
    InvalidArgument,
    /// Missing or rejected credentials
    Authentication,
    /// Malformed request parameters
    InvalidRequest,
    /// Provider rate limit hit (may carry a retry-after hint)
    RateLimited,
    /// Transport failure (connection refused, DNS, reset)
    Network,
    /// The call exceeded its hard timeout
    Timeout,
    /// Provider unavailable, including dispatch blocked by the health probe
    ServiceUnavailable,
    /// Provider answered with an unexpected status or body
    ApiError,
    /// Local process exited with a non-zero code
    ProcessFailed,
    /// Provider returned no usable text
    EmptyOutput,
    /// The caller cancelled the unit of work
    Cancelled,
}

impl ErrorKind {
    /// Stable snake_case name used in persisted records and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ApiError => "api_error",
            Self::ProcessFailed => "process_failed",
            Self::EmptyOutput => "empty_output",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error raised by execution units, the health gate, and the dispatcher.
///
/// Carries the provider and model it concerns plus a free-form context map.
/// The message is redacted on construction so it is always safe to log or
/// persist.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// HTTP status when the failure came from an HTTP response
    pub status: Option<u16>,
    /// Retry hint supplied by the provider (e.g. a `Retry-After` header)
    pub retry_after: Option<Duration>,
    pub context: BTreeMap<String, String>,
}

impl ProviderError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: redact_error_message(message.as_ref()),
            provider: None,
            model: None,
            status: None,
            retry_after: None,
            context: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    #[must_use]
    pub fn service_unavailable(message: impl AsRef<str>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    #[must_use]
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("call timed out after {}s", duration.as_secs_f64()),
        )
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by caller")
    }

    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.context
            .insert(key.into(), redact_error_message(value.as_ref()));
        self
    }

    /// Whether the dispatcher may spend another attempt on this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::RateLimited
            | ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::ServiceUnavailable
            | ErrorKind::ProcessFailed
            | ErrorKind::EmptyOutput => true,
            // Status-less API errors are malformed bodies, which a retry won't fix
            ErrorKind::ApiError => self.status.is_some_and(|s| (500..600).contains(&s)),
            ErrorKind::InvalidArgument
            | ErrorKind::Authentication
            | ErrorKind::InvalidRequest
            | ErrorKind::Cancelled => false,
        }
    }
}

/// Persistence collaborator failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file: {0}")]
    InvalidFile(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {path}")]
    NotFound { path: String },

    #[error("Configuration validation failed: {error_count} errors")]
    ValidationFailed {
        errors: Vec<String>,
        error_count: usize,
    },
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ProviderIntegration,
    ResourceLimits,
    Execution,
    Persistence,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::ProviderIntegration => write!(f, "Provider Integration"),
            Self::ResourceLimits => write!(f, "Resource Limits"),
            Self::Execution => write!(f, "Execution"),
            Self::Persistence => write!(f, "Persistence"),
        }
    }
}

impl UserFriendlyError for ProviderError {
    fn user_message(&self) -> String {
        let who = self.provider.as_deref().unwrap_or("provider");
        match self.kind {
            ErrorKind::InvalidArgument => format!("Invalid provider or model: {}", self.message),
            ErrorKind::Authentication => format!("{who} rejected the credentials: {}", self.message),
            ErrorKind::InvalidRequest => format!("{who} rejected the request: {}", self.message),
            ErrorKind::RateLimited => format!("{who} rate limit exceeded: {}", self.message),
            ErrorKind::Network => format!("Could not reach {who}: {}", self.message),
            ErrorKind::Timeout => format!("{who} did not answer in time: {}", self.message),
            ErrorKind::ServiceUnavailable => format!("{who} is unavailable: {}", self.message),
            ErrorKind::ApiError => format!("{who} returned an error: {}", self.message),
            ErrorKind::ProcessFailed => format!("{who} command failed: {}", self.message),
            ErrorKind::EmptyOutput => format!("{who} produced no output"),
            ErrorKind::Cancelled => "The operation was cancelled".to_string(),
        }
    }

    fn context(&self) -> Option<String> {
        match self.kind {
            ErrorKind::ServiceUnavailable => Some(
                "Dispatch is blocked while a provider's health check reports it unhealthy."
                    .to_string(),
            ),
            ErrorKind::RateLimited => self
                .retry_after
                .map(|d| format!("The provider asked to retry after {}s.", d.as_secs())),
            ErrorKind::Timeout => {
                Some("Timeouts are hard limits configured per provider.".to_string())
            }
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self.kind {
            ErrorKind::InvalidArgument => vec![
                "Check the provider name against [providers] in .taskrelay/config.toml".to_string(),
                "Run `taskrelay health` to list configured providers".to_string(),
            ],
            ErrorKind::Authentication => vec![
                "Check that the provider's api_key_env variable is set".to_string(),
                "Verify the API key is valid and not expired".to_string(),
            ],
            ErrorKind::RateLimited | ErrorKind::ServiceUnavailable => vec![
                "Wait a few minutes and try again".to_string(),
                "Dispatch with a fallback provider chain".to_string(),
            ],
            ErrorKind::Timeout => vec![
                "Increase timeout_secs for the provider".to_string(),
                "Break the prompt into smaller requests".to_string(),
            ],
            ErrorKind::ProcessFailed | ErrorKind::EmptyOutput => vec![
                "Run the provider's command template by hand to inspect its output".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self.kind {
            ErrorKind::InvalidArgument | ErrorKind::Authentication => ErrorCategory::Configuration,
            ErrorKind::RateLimited => ErrorCategory::ResourceLimits,
            ErrorKind::ProcessFailed | ErrorKind::EmptyOutput | ErrorKind::Cancelled => {
                ErrorCategory::Execution
            }
            _ => ErrorCategory::ProviderIntegration,
        }
    }
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile(msg) => format!("Configuration file is invalid: {msg}"),
            Self::MissingRequired(what) => format!("Missing required configuration: {what}"),
            Self::InvalidValue { key, value } => format!("'{key}' has an invalid value: {value}"),
            Self::NotFound { path } => format!("No configuration file at {path}"),
            Self::ValidationFailed { errors, .. } => {
                format!("Configuration validation failed:\n  - {}", errors.join("\n  - "))
            }
        }
    }

    fn context(&self) -> Option<String> {
        Some("Configuration precedence is CLI > .taskrelay/config.toml > defaults.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec!["Review .taskrelay/config.toml against the documented [providers.<name>] keys".to_string()]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}
