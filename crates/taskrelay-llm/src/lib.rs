//! Execution units and the provider registry
//!
//! An [`ExecutionUnit`] performs exactly one call against one backend and
//! classifies failures into [`taskrelay_utils::ErrorKind`]s. Two adapters
//! ship here:
//!
//! - [`HttpUnit`]: OpenAI-compatible chat-completions endpoints
//! - [`ProcessUnit`]: command templates run through a shell
//!
//! [`ProviderRegistry`] maps provider names to units and their retry policy.

mod http_client;
mod http_unit;
mod process_unit;
mod registry;
mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use http_client::HttpClient;
pub use http_unit::{HttpParams, HttpUnit};
pub use process_unit::ProcessUnit;
pub use registry::{ProviderRegistry, RegisteredProvider, RetryPolicy, construct_unit_for_provider};
pub use types::{ExecutionUnit, Invocation, UnitOutput};
