//! Provider registry: name → execution unit plus its retry policy

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use taskrelay_config::{
    Config, DEFAULT_BACKOFF_SECS, DEFAULT_TIMEOUT_SECS, DEFAULT_TRIES, ProviderConfig,
    ProviderKind,
};
use taskrelay_utils::ProviderError;
use tracing::debug;

use crate::http_client::HttpClient;
use crate::http_unit::HttpUnit;
use crate::process_unit::ProcessUnit;
use crate::types::ExecutionUnit;

/// Per-provider attempt budget, call timeout and delay schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1
    pub tries: u32,
    pub timeout: Duration,
    /// Delay after failed attempt `k` is `backoff[min(k - 1, len - 1)]`
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            backoff: DEFAULT_BACKOFF_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(tries: u32, timeout: Duration, backoff: Vec<Duration>) -> Self {
        Self {
            tries: tries.max(1),
            timeout,
            backoff,
        }
    }

    #[must_use]
    pub fn from_config(provider: &ProviderConfig) -> Self {
        Self::new(provider.tries(), provider.timeout(), provider.backoff())
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    ///
    /// Attempts past the end of the schedule reuse its last entry.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let index = (attempt.saturating_sub(1) as usize).min(last);
        self.backoff[index]
    }
}

/// One registry entry.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub unit: Arc<dyn ExecutionUnit>,
    pub policy: RetryPolicy,
    pub default_model: Option<String>,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("provider", &self.unit.provider())
            .field("policy", &self.policy)
            .field("default_model", &self.default_model)
            .finish()
    }
}

/// Known providers, keyed by name in sorted order.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, RegisteredProvider>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one execution unit per configured provider.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built or an entry lacks the field
    /// its kind needs (endpoint or command).
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let client = HttpClient::new()?;
        let mut registry = Self::new();

        for (name, provider) in &config.providers {
            let unit = construct_unit_for_provider(name, provider, &client)?;
            registry.register(
                name,
                unit,
                RetryPolicy::from_config(provider),
                provider.default_model.clone(),
            );
        }

        debug!(providers = ?registry.names(), "Provider registry built");
        Ok(registry)
    }

    /// Add or replace a provider.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        unit: Arc<dyn ExecutionUnit>,
        policy: RetryPolicy,
        default_model: Option<String>,
    ) {
        self.providers.insert(
            name.into(),
            RegisteredProvider {
                unit,
                policy,
                default_model,
            },
        );
    }

    /// Look up a provider.
    ///
    /// # Errors
    ///
    /// Unknown names fail with `InvalidArgument` listing the valid names.
    pub fn get(&self, name: &str) -> Result<&RegisteredProvider, ProviderError> {
        self.providers.get(name).ok_or_else(|| {
            ProviderError::invalid_argument(format!(
                "unknown provider '{name}'. Valid providers: {}",
                self.names().join(", ")
            ))
            .with_provider(name)
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Construct the execution unit matching a provider's kind.
///
/// # Errors
///
/// Returns `InvalidArgument` if the configuration is missing what the kind requires.
pub fn construct_unit_for_provider(
    name: &str,
    provider: &ProviderConfig,
    client: &HttpClient,
) -> Result<Arc<dyn ExecutionUnit>, ProviderError> {
    match provider.kind {
        ProviderKind::Http => Ok(Arc::new(HttpUnit::from_config(name, provider, client.clone())?)),
        ProviderKind::Process => Ok(Arc::new(ProcessUnit::from_config(name, provider)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_utils::ErrorKind;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[test]
    fn test_delay_schedule_reuses_last_entry() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), secs(&[2, 5, 10]));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_with_empty_schedule() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1), Vec::new());
        assert_eq!(policy.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_tries_floor_is_one() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1), Vec::new()).tries, 1);
    }

    #[test]
    fn test_from_config_builds_builtins() {
        let config = Config::builder().build().unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names(), vec!["claude", "local", "ollama"]);

        let local = registry.get("local").unwrap();
        assert_eq!(local.unit.provider(), "local");
        assert_eq!(local.policy.timeout, Duration::from_secs(600));
        assert_eq!(local.default_model.as_deref(), Some("sonnet"));
    }

    #[test]
    fn test_policy_from_provider_config() {
        let provider = ProviderConfig::http("http://127.0.0.1:1/v1/chat/completions")
            .with_retry(4, vec![1, 3])
            .with_timeout_secs(9);
        let policy = RetryPolicy::from_config(&provider);
        assert_eq!(policy.tries, 4);
        assert_eq!(policy.timeout, Duration::from_secs(9));
        assert_eq!(policy.backoff, secs(&[1, 3]));
    }

    #[test]
    fn test_unknown_provider_lists_valid_names() {
        let config = Config::builder().build().unwrap();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        match registry.get("nope") {
            Err(e) => {
                assert_eq!(e.kind, ErrorKind::InvalidArgument);
                assert!(e.message.contains("claude, local, ollama"));
            }
            Ok(_) => panic!("Expected unknown provider error"),
        }
    }

    #[test]
    fn test_http_provider_without_endpoint_is_rejected() {
        let mut provider = ProviderConfig::http("http://x");
        provider.endpoint = None;
        let client = HttpClient::new().unwrap();
        let err = construct_unit_for_provider("broken", &provider, &client).err().expect("expected error");
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
