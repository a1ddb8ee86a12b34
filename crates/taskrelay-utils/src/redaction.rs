//! Redaction of secrets from error text
//!
//! Provider errors end up in logs and in persisted `error` fields, so every
//! message passes through [`redact_error_message`] before it leaves the crate
//! that produced it. Redaction rules:
//!
//! 1. URLs with embedded credentials lose the `user:pass@` part
//! 2. `Bearer <token>` values are replaced
//! 3. Standalone key-like tokens (32+ characters of `[A-Za-z0-9_-]`) are replaced
//!
//! Everything else is preserved so the message stays useful for debugging.

use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern to match URLs with embedded credentials
static URL_WITH_CREDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://)[^:@\s/]+:[^@\s]+@").expect("static regex"));

/// Pattern to match bearer tokens in echoed headers
static BEARER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]{8,}").expect("static regex"));

/// Pattern to match potential API keys (long alphanumeric strings)
static POTENTIAL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^A-Za-z0-9_-])[A-Za-z0-9_-]{32,}").expect("static regex")
});

/// Redact sensitive information from an error message.
#[must_use]
pub fn redact_error_message(message: &str) -> String {
    let redacted = URL_WITH_CREDS.replace_all(message, "${1}[REDACTED]@");
    let redacted = BEARER.replace_all(&redacted, "${1}[REDACTED]");
    let redacted = POTENTIAL_KEY.replace_all(&redacted, "${1}[REDACTED_KEY]");
    redacted.into_owned()
}
