use taskrelay_dispatch::DispatchError;
use taskrelay_records::IterationRun;
use taskrelay_utils::{ErrorKind, StoreError};
use thiserror::Error;

/// Failure of an iteration run.
#[derive(Error, Debug)]
pub enum RunError {
    /// A worker or reviewer call failed; the run was recorded as `Failed`.
    #[error("run {} failed at iteration {iteration}: {source}", run.id)]
    Failed {
        run: Box<IterationRun>,
        iteration: u32,
        #[source]
        source: DispatchError,
    },

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("run store failed: {0}")]
    Store(#[from] StoreError),
}

impl RunError {
    /// Error kind of the provider failure that ended the run, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { source, .. } => source.kind(),
            Self::InvalidTask(_) => Some(ErrorKind::InvalidArgument),
            Self::Store(_) => None,
        }
    }

    /// The terminal run record, when one was written.
    #[must_use]
    pub fn run(&self) -> Option<&IterationRun> {
        match self {
            Self::Failed { run, .. } => Some(run),
            _ => None,
        }
    }
}
