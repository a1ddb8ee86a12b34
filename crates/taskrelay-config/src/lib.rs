//! Configuration for taskrelay
//!
//! Settings resolve with precedence CLI > `.taskrelay/config.toml` > built-in
//! defaults. The provider registry starts from [`builtin_providers`]; a file
//! entry with the same name replaces the built-in one.

mod builder;
mod discovery;
mod model;
mod validation;

pub use builder::ConfigBuilder;
pub use discovery::{CONFIG_ENV_VAR, CliArgs};
pub use model::{
    Config, ConfigSource, DEFAULT_BACKOFF_SECS, DEFAULT_HEALTH_TTL_SECS, DEFAULT_MAX_ITERATIONS,
    DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_TRIES, Defaults, HealthConfig,
    OrchestratorConfig, ProviderConfig, ProviderKind, builtin_providers,
};
