use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use taskrelay_utils::ErrorKind;

/// Lifecycle of a dispatched prompt.
///
/// `Pending -> Processing -> Completed | Failed`; a pending item may also
/// fail directly when it is cancelled before execution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkItemStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for WorkItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted record of one dispatched prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub provider: String,
    pub model: Option<String>,
    pub prompt: String,
    pub status: WorkItemStatus,
    pub response: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// New pending item with a fresh id.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: Option<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider: provider.into(),
            model,
            prompt: prompt.into(),
            status: WorkItemStatus::Pending,
            response: None,
            error: None,
            error_kind: None,
            duration_ms: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Apply a status transition in place.
    ///
    /// Terminal statuses stamp `completed_at`. Fields left `None` in the
    /// update are not touched; metadata entries are merged.
    pub fn apply(&mut self, status: WorkItemStatus, update: WorkItemUpdate) {
        self.status = status;
        if let Some(response) = update.response {
            self.response = Some(response);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        if let Some(kind) = update.error_kind {
            self.error_kind = Some(kind);
        }
        if let Some(duration_ms) = update.duration_ms {
            self.duration_ms = Some(duration_ms);
        }
        self.metadata.extend(update.metadata);
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Fields written alongside a work item status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkItemUpdate {
    pub response: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub duration_ms: Option<u64>,
    pub metadata: BTreeMap<String, Value>,
}

impl WorkItemUpdate {
    #[must_use]
    pub fn completed(response: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            response: Some(response.into()),
            duration_ms: Some(duration_ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failed(kind: ErrorKind, error: impl Into<String>, duration_ms: Option<u64>) -> Self {
        Self {
            error: Some(error.into()),
            error_kind: Some(kind),
            duration_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// State of a worker/reviewer run. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    MaxIterationsReached,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::MaxIterationsReached => "max_iterations_reached",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRun {
    pub id: String,
    pub task: String,
    pub working_directory: Option<PathBuf>,
    pub worker_provider: String,
    pub worker_model: Option<String>,
    pub reviewer_provider: String,
    pub reviewer_model: Option<String>,
    pub max_iterations: u32,
    pub iterations_used: Option<u32>,
    pub session_key: Option<String>,
    pub status: RunStatus,
    pub final_output: Option<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IterationRun {
    /// Mark the run finished. Callers must only do this once.
    pub fn finish(
        &mut self,
        status: RunStatus,
        iterations_used: u32,
        final_output: Option<String>,
        error_message: Option<String>,
    ) {
        self.status = status;
        self.iterations_used = Some(iterations_used);
        self.final_output = final_output;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputRole {
    Worker,
    Reviewer,
}

impl OutputRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Reviewer => "reviewer",
        }
    }
}

/// One role's output for one iteration. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationOutput {
    pub run_id: String,
    /// 1-based
    pub iteration: u32,
    pub role: OutputRole,
    pub content: String,
    pub model: Option<String>,
    pub tokens_used: u64,
    pub created_at: DateTime<Utc>,
}

/// Parsed reviewer verdict for one iteration. At most one per `(run_id, iteration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReview {
    pub run_id: String,
    pub iteration: u32,
    pub approved: bool,
    pub feedback: String,
    /// 1..=10 when present
    pub score: Option<u8>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}
