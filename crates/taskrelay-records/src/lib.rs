//! Lifecycle records and the persistence collaborator interfaces
//!
//! The engine only writes status transitions and appends; storage and
//! querying belong to whatever implements [`WorkItemStore`] and
//! [`RunStore`]. [`MemoryStore`] is the in-process implementation.

mod model;
mod store;

pub use model::{
    IterationOutput, IterationReview, IterationRun, OutputRole, RunStatus, WorkItem,
    WorkItemStatus, WorkItemUpdate,
};
pub use store::{MemoryStore, RunStore, WorkItemStore};
