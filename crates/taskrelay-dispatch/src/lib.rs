//! Health-gated dispatch
//!
//! [`Dispatcher::dispatch`] resolves a provider, consults the cached health,
//! records a [`taskrelay_records::WorkItem`], and runs the provider's
//! execution unit under its retry policy. Retryable errors back off along the
//! provider's schedule (stretched by any `Retry-After` hint); anything else
//! fails at once. [`Dispatcher::dispatch_with_fallback`] walks a chain of
//! alternates and only ever uses a `healthy` one.

mod dispatcher;
mod error;
mod options;

pub use dispatcher::{Dispatcher, FALLBACK_FROM_KEY};
pub use error::DispatchError;
pub use options::DispatchOptions;
