//! Command-line interface for taskrelay
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions (clap)
//! - `run`: entry point, config discovery and command dispatch
//! - `commands`: command implementations and error reporting

pub mod args;
mod commands;
mod run;

pub use args::{Cli, Commands};
pub use run::{run, run_with};
