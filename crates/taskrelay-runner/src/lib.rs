//! Subprocess execution for process-backed providers
//!
//! Children run from a cleared environment plus an explicit allow-list,
//! with stdin closed and a hard timeout. Dropping an in-flight run kills
//! the child, which is how cancellation reaches the subprocess.

pub mod command_spec;
pub mod error;
pub mod process;
pub mod template;

pub use command_spec::CommandSpec;
pub use error::RunnerError;
pub use process::{ProcessOutput, ProcessRunner, STDERR_TAIL_BYTES, TokioProcessRunner};
pub use template::{render_template, template_program};
