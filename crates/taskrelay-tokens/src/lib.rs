//! Token estimation and context-window truncation
//!
//! [`TokenCounter`] sizes prompts and histories against a [`ModelLimits`]
//! table supplied at construction. [`ModelLimits::default`] carries the
//! built-in families.

mod counter;
mod limits;

pub use counter::{MESSAGE_OVERHEAD, MIN_TEXT_OVERHEAD, SAFE_LIMIT_FLOOR, TokenCounter};
pub use limits::{ModelFamily, ModelLimits};
