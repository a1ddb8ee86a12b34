//! Error types for the runner crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Failed waiting for {program}: {reason}")]
    WaitFailed { program: String, reason: String },

    #[error("Execution timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },
}
