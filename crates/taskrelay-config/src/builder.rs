use std::collections::{BTreeMap, HashMap};

use taskrelay_utils::ConfigError;

use crate::model::{
    Config, ConfigSource, Defaults, HealthConfig, OrchestratorConfig, ProviderConfig,
    builtin_providers,
};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use taskrelay_config::{Config, ProviderConfig};
    ///
    /// let config = Config::builder()
    ///     .provider("echo", ProviderConfig::process("echo {prompt}"))
    ///     .cache_ttl_secs(30)
    ///     .build()
    ///     .expect("valid config");
    /// assert!(config.providers.contains_key("echo"));
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration.
///
/// Embedders use this instead of discovery when they need deterministic
/// settings. Every value set here is attributed to
/// [`ConfigSource::Programmatic`].
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    include_builtins: bool,
    providers: BTreeMap<String, ProviderConfig>,
    default_provider: Option<String>,
    default_model: Option<String>,
    cache_ttl_secs: Option<u64>,
    probe_timeout_secs: Option<u64>,
    max_iterations: Option<u32>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            include_builtins: true,
            providers: BTreeMap::new(),
            default_provider: None,
            default_model: None,
            cache_ttl_secs: None,
            probe_timeout_secs: None,
            max_iterations: None,
        }
    }

    /// Start from an empty registry instead of the built-in providers.
    #[must_use]
    pub fn without_builtin_providers(mut self) -> Self {
        self.include_builtins = false;
        self
    }

    /// Add or replace a provider entry.
    #[must_use]
    pub fn provider(mut self, name: impl Into<String>, provider: ProviderConfig) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    #[must_use]
    pub fn default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.probe_timeout_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut source_attribution = HashMap::new();
        let mut providers = if self.include_builtins {
            builtin_providers()
        } else {
            BTreeMap::new()
        };
        for name in providers.keys() {
            source_attribution.insert(format!("providers.{name}"), ConfigSource::Default);
        }
        for (name, provider) in self.providers {
            source_attribution.insert(format!("providers.{name}"), ConfigSource::Programmatic);
            providers.insert(name, provider);
        }

        let mut attribute = |key: &str, set: bool| {
            let source = if set {
                ConfigSource::Programmatic
            } else {
                ConfigSource::Default
            };
            source_attribution.insert(key.to_string(), source);
        };
        attribute("provider", self.default_provider.is_some());
        attribute("model", self.default_model.is_some());
        attribute("cache_ttl_secs", self.cache_ttl_secs.is_some());
        attribute("probe_timeout_secs", self.probe_timeout_secs.is_some());
        attribute("max_iterations", self.max_iterations.is_some());

        let config = Config {
            defaults: Defaults {
                provider: self.default_provider,
                model: self.default_model,
                verbose: None,
            },
            health: HealthConfig {
                cache_ttl_secs: self.cache_ttl_secs,
                probe_timeout_secs: self.probe_timeout_secs,
            },
            orchestrator: OrchestratorConfig {
                max_iterations: self.max_iterations,
                ..OrchestratorConfig::default()
            },
            providers,
            source_attribution,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_attributes_programmatic_values() {
        let config = Config::builder()
            .provider("echo", ProviderConfig::process("echo {prompt}"))
            .max_iterations(4)
            .build()
            .unwrap();

        assert_eq!(config.orchestrator.max_iterations(), 4);
        assert_eq!(
            config.source_attribution.get("max_iterations"),
            Some(&ConfigSource::Programmatic)
        );
        assert_eq!(
            config.source_attribution.get("cache_ttl_secs"),
            Some(&ConfigSource::Default)
        );
        assert_eq!(
            config.source_attribution.get("providers.echo"),
            Some(&ConfigSource::Programmatic)
        );
        assert_eq!(config.health.cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_without_builtins_only_keeps_added_providers() {
        let config = ConfigBuilder::new()
            .without_builtin_providers()
            .provider("echo", ProviderConfig::process("echo {prompt}"))
            .build()
            .unwrap();

        assert_eq!(config.providers.keys().collect::<Vec<_>>(), vec!["echo"]);
    }
}
