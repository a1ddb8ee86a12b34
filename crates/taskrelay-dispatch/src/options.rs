use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use taskrelay_utils::Message;
use tokio_util::sync::CancellationToken;

/// Per-dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Do not consult the health probe at all
    pub skip_health_check: bool,
    /// Proceed even when the provider is `unhealthy`
    pub allow_unhealthy: bool,
    /// Copied onto the work item
    pub metadata: BTreeMap<String, Value>,
    /// Earlier conversation turns, oldest first; truncated to fit the model
    pub history: Vec<Message>,
    /// Working directory for process providers
    pub working_dir: Option<PathBuf>,
    /// Provider options such as `max_tokens` or `temperature`
    pub options: HashMap<String, Value>,
    pub cancel: Option<CancellationToken>,
}

impl DispatchOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn skip_health_check(mut self) -> Self {
        self.skip_health_check = true;
        self
    }

    #[must_use]
    pub fn allow_unhealthy(mut self) -> Self {
        self.allow_unhealthy = true;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}
