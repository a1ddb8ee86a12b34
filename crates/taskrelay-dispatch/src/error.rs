use taskrelay_records::WorkItem;
use taskrelay_utils::{ErrorKind, ProviderError, StoreError};
use thiserror::Error;

/// Failure of a dispatch.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The provider call or health gate failed.
    ///
    /// `work_item` is the record in its terminal state when one was created;
    /// it is `None` for unknown providers and health rejections.
    #[error("{error}")]
    Provider {
        #[source]
        error: ProviderError,
        work_item: Option<Box<WorkItem>>,
    },

    /// The work item store rejected a write.
    #[error("work item store failed: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    #[must_use]
    pub fn provider(error: ProviderError, work_item: Option<WorkItem>) -> Self {
        Self::Provider {
            error,
            work_item: work_item.map(Box::new),
        }
    }

    /// Error kind of a provider failure; store failures have none.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Provider { error, .. } => Some(error.kind),
            Self::Store(_) => None,
        }
    }

    #[must_use]
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider { error, .. } => Some(error),
            Self::Store(_) => None,
        }
    }

    #[must_use]
    pub fn work_item(&self) -> Option<&WorkItem> {
        match self {
            Self::Provider { work_item, .. } => work_item.as_deref(),
            Self::Store(_) => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.kind() == Some(ErrorKind::Cancelled)
    }
}
