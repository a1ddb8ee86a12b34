//! CLI argument definitions
//!
//! The `taskrelay` command-line interface, defined with clap derive.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// taskrelay - health-gated dispatch of work to LLM providers
#[derive(Parser, Debug)]
#[command(name = "taskrelay")]
#[command(about = "Dispatch prompts to LLM providers with health gating, retries and review loops")]
#[command(long_about = r#"
taskrelay sends prompts to configured providers (HTTP chat-completion endpoints
or local command-line tools), checking provider health first and retrying
transient failures with backoff. It can also run a worker/reviewer loop that
revises an answer until a reviewer approves it.

EXAMPLES:
  # Send one prompt to the default provider
  taskrelay dispatch "Summarise RFC 9110 in three sentences"

  # Pick a provider and fall back to others when it fails
  taskrelay dispatch --provider claude --fallback ollama,local "Explain borrowing"

  # Iterate with a worker and a reviewer
  taskrelay iterate --worker ollama --reviewer claude "Write a bash script that rotates logs"

  # Probe provider health
  taskrelay health

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > config file > defaults
  Config file is discovered by searching upward from CWD for .taskrelay/config.toml
  Use --config (or TASKRELAY_CONFIG) to specify an explicit config file path

EXIT CODES:
  0 success, 1 internal error, 2 invalid input or non-retryable provider error,
  3 retries exhausted, 130 cancelled
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Health cache TTL in seconds
    #[arg(long, global = true)]
    pub cache_ttl: Option<u64>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one prompt to a provider
    ///
    /// Prints the resulting work item as JSON. When the prompt is omitted it
    /// is read from stdin.
    ///
    /// EXAMPLES:
    ///   taskrelay dispatch "hello"
    ///   echo "hello" | taskrelay dispatch --provider local
    Dispatch {
        /// Prompt text (read from stdin when omitted)
        prompt: Option<String>,

        /// Provider name (defaults to [defaults].provider)
        #[arg(long)]
        provider: Option<String>,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// Providers to try, in order, if the primary fails
        #[arg(long, value_delimiter = ',')]
        fallback: Vec<String>,

        /// Dispatch even when the provider is unhealthy
        #[arg(long)]
        allow_unhealthy: bool,

        /// Do not consult provider health
        #[arg(long)]
        skip_health_check: bool,

        /// Working directory for process providers
        #[arg(long)]
        cwd: Option<PathBuf>,
    },

    /// Run the worker/reviewer loop on a task
    ///
    /// Prints the run, its outputs and its reviews as JSON.
    ///
    /// EXAMPLES:
    ///   taskrelay iterate --worker ollama --reviewer claude "Write a haiku about Rust"
    ///   taskrelay iterate --max-iterations 5 "Refactor main.rs" --cwd ./project
    Iterate {
        /// Task description (read from stdin when omitted)
        task: Option<String>,

        /// Worker provider (defaults to [orchestrator].worker_provider, then [defaults].provider)
        #[arg(long)]
        worker: Option<String>,

        #[arg(long)]
        worker_model: Option<String>,

        /// Reviewer provider (defaults to [orchestrator].reviewer_provider, then the worker)
        #[arg(long)]
        reviewer: Option<String>,

        #[arg(long)]
        reviewer_model: Option<String>,

        /// Maximum worker/reviewer rounds
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Working directory for process providers
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Opaque key grouping this run's calls into one provider session
        #[arg(long)]
        session_key: Option<String>,

        /// Dispatch even when a provider is unhealthy
        #[arg(long)]
        allow_unhealthy: bool,
    },

    /// Probe provider health
    ///
    /// EXAMPLES:
    ///   taskrelay health
    ///   taskrelay health ollama
    Health {
        /// Only probe these providers (all configured providers when empty)
        providers: Vec<String>,
    },
}
