//! Worker/reviewer iteration
//!
//! An [`Orchestrator`] alternates a worker provider and a reviewer provider
//! for up to `max_iterations` rounds. Each round's reviewer response is
//! parsed into a [`ReviewVerdict`]; approval ends the run as `completed`,
//! otherwise the feedback seeds the next worker prompt. A failed dispatch
//! ends the run as `failed`.

mod error;
mod orchestrator;
mod prompts;
mod review;

pub use error::RunError;
pub use orchestrator::{IterationTask, Orchestrator, RunOptions};
pub use prompts::{TRUNCATION_MARKER, fitted_review_prompt, review_prompt, worker_prompt};
pub use review::{
    ParseSource, ReviewVerdict, parse_bare_json, parse_fenced_json, parse_heuristic, parse_review,
};
