//! taskrelay - health-gated dispatch of work to LLM providers
//!
//! taskrelay sends prompts to configured providers through a common
//! execution-unit interface, gates each call on a cached provider health
//! check, retries transient failures on a per-provider backoff schedule and
//! can fall back to alternate providers. On top of dispatch sits a bounded
//! worker/reviewer loop that revises an answer until a reviewer approves it.
//!
//! taskrelay can be used in two ways:
//! - **CLI**: `taskrelay dispatch`, `taskrelay iterate`, `taskrelay health`
//! - **Library**: build a [`Dispatcher`] (and optionally an [`Orchestrator`])
//!   from a [`Config`]
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskrelay::{
//!     CliArgs, Config, DispatchOptions, Dispatcher, HealthProbe, MemoryStore,
//!     ProviderRegistry, WorkItemStore,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::discover(&CliArgs::default())?;
//! let dispatcher = Dispatcher::new(
//!     Arc::new(ProviderRegistry::from_config(&config)?),
//!     Arc::new(HealthProbe::from_config(&config)?),
//!     Arc::new(MemoryStore::new()) as Arc<dyn WorkItemStore>,
//! );
//! let item = dispatcher
//!     .dispatch("ollama", "Explain ownership in one paragraph", None, &DispatchOptions::new())
//!     .await?;
//! println!("{}", item.response.unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! # Crates
//!
//! | Crate | Contents |
//! |---|---|
//! | `taskrelay-utils` | error taxonomy, redaction, tracing, lifecycle events |
//! | `taskrelay-config` | TOML configuration and discovery |
//! | `taskrelay-runner` | process execution with timeouts |
//! | `taskrelay-tokens` | token estimates and history truncation |
//! | `taskrelay-records` | work items, runs and their stores |
//! | `taskrelay-llm` | execution units and the provider registry |
//! | `taskrelay-health` | health probes and the TTL cache |
//! | `taskrelay-dispatch` | health-gated dispatch with retries and fallback |
//! | `taskrelay-orchestrator` | the worker/reviewer loop |

pub mod cli;
pub mod exit_codes;

pub use exit_codes::ExitCode;

pub use taskrelay_config::{CliArgs, Config, ConfigSource, ProviderConfig, ProviderKind};
pub use taskrelay_dispatch::{DispatchError, DispatchOptions, Dispatcher, FALLBACK_FROM_KEY};
pub use taskrelay_health::{HealthProbe, HealthStatus, Probe, ProviderHealth};
pub use taskrelay_llm::{
    ExecutionUnit, HttpClient, HttpUnit, Invocation, ProcessUnit, ProviderRegistry, RetryPolicy,
    UnitOutput,
};
pub use taskrelay_orchestrator::{
    IterationTask, Orchestrator, ParseSource, ReviewVerdict, RunError, RunOptions, parse_review,
};
pub use taskrelay_records::{
    IterationOutput, IterationReview, IterationRun, MemoryStore, OutputRole, RunStatus, RunStore,
    WorkItem, WorkItemStatus, WorkItemStore,
};
pub use taskrelay_tokens::{ModelLimits, TokenCounter};
pub use taskrelay_utils::{
    ErrorKind, EventSink, LifecycleEvent, Message, ProviderError, Role, StoreError,
    TracingEventSink, UserFriendlyError,
};
