use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-call timeout for a provider
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default attempt count for a provider
pub const DEFAULT_TRIES: u32 = 3;

/// Default delay schedule between attempts; the last entry repeats
pub const DEFAULT_BACKOFF_SECS: [u64; 3] = [2, 5, 10];

/// Default health cache TTL
pub const DEFAULT_HEALTH_TTL_SECS: u64 = 60;

/// Default timeout for a single health probe
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default iteration budget for worker/reviewer runs
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    ConfigFile(PathBuf),
    Programmatic,
    Default,
}

/// Main configuration structure
///
/// # Example
///
/// ```toml
/// [defaults]
/// provider = "ollama"
///
/// [health]
/// cache_ttl_secs = 60
///
/// [orchestrator]
/// max_iterations = 3
///
/// [providers.ollama]
/// kind = "http"
/// endpoint = "http://localhost:11434/v1/chat/completions"
/// health_url = "http://localhost:11434/api/tags"
/// health_models_key = "models"
/// default_model = "llama3.1"
/// tries = 3
/// backoff_secs = [2, 5, 10]
///
/// [providers.local]
/// kind = "process"
/// command = "llm -m {model} {prompt}"
/// env_allowlist = ["PATH", "HOME"]
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub defaults: Defaults,
    pub health: HealthConfig,
    pub orchestrator: OrchestratorConfig,
    /// Provider registry, keyed by provider name.
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Source attribution for each setting.
    pub source_attribution: HashMap<String, ConfigSource>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Defaults {
    /// Provider used when a caller does not name one.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub verbose: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthConfig {
    pub cache_ttl_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
}

impl HealthConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.unwrap_or(DEFAULT_HEALTH_TTL_SECS))
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    pub max_iterations: Option<u32>,
    pub worker_provider: Option<String>,
    pub worker_model: Option<String>,
    pub reviewer_provider: Option<String>,
    pub reviewer_model: Option<String>,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }
}

/// Execution shape of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Chat-completions endpoint reached over HTTP
    Http,
    /// Local process driven by a shell command template
    Process,
}

impl ProviderKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Process => "process",
        }
    }
}

/// One entry of the provider registry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub default_model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub tries: Option<u32>,
    pub backoff_secs: Option<Vec<u64>>,

    // HTTP providers
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub health_url: Option<String>,
    /// JSON key holding the model list in the health response; an empty list means degraded.
    pub health_models_key: Option<String>,

    // Process providers
    /// Shell command template; `{prompt}` and `{model}` are substituted shell-escaped.
    pub command: Option<String>,
    pub shell: Option<String>,
    /// Environment variables inherited by the process. Nothing else is passed through.
    pub env_allowlist: Option<Vec<String>>,
    /// Executables whose presence makes the provider healthy.
    pub expected_executables: Option<Vec<String>>,
}

impl ProviderConfig {
    fn empty(kind: ProviderKind) -> Self {
        Self {
            kind,
            default_model: None,
            timeout_secs: None,
            tries: None,
            backoff_secs: None,
            endpoint: None,
            api_key_env: None,
            max_tokens: None,
            temperature: None,
            health_url: None,
            health_models_key: None,
            command: None,
            shell: None,
            env_allowlist: None,
            expected_executables: None,
        }
    }

    /// An HTTP provider posting to `endpoint`.
    #[must_use]
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::empty(ProviderKind::Http)
        }
    }

    /// A process provider running `command`.
    #[must_use]
    pub fn process(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::empty(ProviderKind::Process)
        }
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, tries: u32, backoff_secs: Vec<u64>) -> Self {
        self.tries = Some(tries);
        self.backoff_secs = Some(backoff_secs);
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn with_health_url(mut self, url: impl Into<String>, models_key: Option<&str>) -> Self {
        self.health_url = Some(url.into());
        self.health_models_key = models_key.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    #[must_use]
    pub fn with_env_allowlist<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_allowlist = Some(vars.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_expected_executables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_executables = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    #[must_use]
    pub fn tries(&self) -> u32 {
        self.tries.unwrap_or(DEFAULT_TRIES)
    }

    /// Delay schedule between attempts.
    #[must_use]
    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_secs
            .as_deref()
            .unwrap_or(&DEFAULT_BACKOFF_SECS)
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }

    #[must_use]
    pub fn shell(&self) -> &str {
        self.shell.as_deref().unwrap_or("sh")
    }

    #[must_use]
    pub fn env_allowlist(&self) -> Vec<String> {
        self.env_allowlist
            .clone()
            .unwrap_or_else(|| vec!["PATH".to_string(), "HOME".to_string(), "LANG".to_string()])
    }
}

/// Providers available without any configuration file.
///
/// - `claude`: hosted API through its OpenAI-compatible chat-completions endpoint
/// - `ollama`: local inference server; degraded while no model is pulled
/// - `local`: the `claude` CLI driven as a local process
#[must_use]
pub fn builtin_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();

    providers.insert(
        "claude".to_string(),
        ProviderConfig {
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            max_tokens: Some(4096),
            temperature: Some(0.7),
            ..ProviderConfig::http("https://api.anthropic.com/v1/chat/completions")
                .with_default_model("claude-3-5-sonnet-20241022")
                .with_health_url("https://api.anthropic.com/v1/models", Some("data"))
        },
    );

    providers.insert(
        "ollama".to_string(),
        ProviderConfig {
            timeout_secs: Some(300),
            max_tokens: Some(4096),
            temperature: Some(0.7),
            ..ProviderConfig::http("http://localhost:11434/v1/chat/completions")
                .with_default_model("llama3.1")
                .with_health_url("http://localhost:11434/api/tags", Some("models"))
        },
    );

    providers.insert(
        "local".to_string(),
        ProviderConfig::process("claude -p {prompt} --model {model}")
            .with_default_model("sonnet")
            .with_timeout_secs(600)
            .with_env_allowlist(["PATH", "HOME", "LANG", "ANTHROPIC_API_KEY"])
            .with_expected_executables(["claude"]),
    );

    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let provider = ProviderConfig::http("http://localhost:1/v1/chat/completions");
        assert_eq!(provider.tries(), DEFAULT_TRIES);
        assert_eq!(provider.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(
            provider.backoff(),
            vec![
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10)
            ]
        );
        assert_eq!(provider.shell(), "sh");
    }

    #[test]
    fn test_builtin_providers_cover_all_shapes() {
        let providers = builtin_providers();
        assert_eq!(providers["claude"].kind, ProviderKind::Http);
        assert_eq!(providers["ollama"].kind, ProviderKind::Http);
        assert_eq!(providers["local"].kind, ProviderKind::Process);
        assert_eq!(
            providers["ollama"].health_models_key.as_deref(),
            Some("models")
        );
    }

    #[test]
    fn test_provider_kind_parses_lowercase() {
        let provider: ProviderConfig =
            toml::from_str("kind = \"process\"\ncommand = \"echo {prompt}\"").unwrap();
        assert_eq!(provider.kind, ProviderKind::Process);
        assert!(toml::from_str::<ProviderConfig>("kind = \"grpc\"").is_err());
    }
}
