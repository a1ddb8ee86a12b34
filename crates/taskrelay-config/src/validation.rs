use taskrelay_utils::ConfigError;

use crate::model::{Config, ProviderConfig, ProviderKind};

impl Config {
    /// Validate configuration values.
    ///
    /// Every problem is collected so a broken file is reported in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Some(ttl) = self.health.cache_ttl_secs
            && ttl > 86_400
        {
            errors.push("health.cache_ttl_secs exceeds maximum limit of 86400 seconds".to_string());
        }

        if let Some(timeout) = self.health.probe_timeout_secs {
            if timeout == 0 {
                errors.push("health.probe_timeout_secs must be greater than 0".to_string());
            } else if timeout > 60 {
                errors.push("health.probe_timeout_secs exceeds maximum limit of 60 seconds".to_string());
            }
        }

        if let Some(max_iterations) = self.orchestrator.max_iterations
            && !(1..=20).contains(&max_iterations)
        {
            errors.push(format!(
                "orchestrator.max_iterations must be between 1 and 20 (got {max_iterations})"
            ));
        }

        if let Some(provider) = &self.defaults.provider
            && !self.providers.contains_key(provider)
        {
            errors.push(format!(
                "defaults.provider '{provider}' is not a configured provider"
            ));
        }

        for (name, provider) in &self.providers {
            validate_provider(name, provider, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let error_count = errors.len();
            Err(ConfigError::ValidationFailed {
                errors,
                error_count,
            })
        }
    }
}

fn validate_provider(name: &str, provider: &ProviderConfig, errors: &mut Vec<String>) {
    if name.trim().is_empty() {
        errors.push("provider names must not be empty".to_string());
    }

    match provider.kind {
        ProviderKind::Http => match provider.endpoint.as_deref() {
            None | Some("") => errors.push(format!("providers.{name}.endpoint is required")),
            Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                errors.push(format!(
                    "providers.{name}.endpoint must be an http(s) URL (got '{endpoint}')"
                ));
            }
            Some(_) => {}
        },
        ProviderKind::Process => {
            if provider.command.as_deref().is_none_or(|c| c.trim().is_empty()) {
                errors.push(format!("providers.{name}.command is required"));
            }
        }
    }

    if provider.timeout_secs == Some(0) {
        errors.push(format!("providers.{name}.timeout_secs must be greater than 0"));
    }

    if let Some(tries) = provider.tries
        && !(1..=10).contains(&tries)
    {
        errors.push(format!(
            "providers.{name}.tries must be between 1 and 10 (got {tries})"
        ));
    }

    if let Some(backoff) = &provider.backoff_secs {
        if backoff.is_empty() {
            errors.push(format!("providers.{name}.backoff_secs must not be empty"));
        }
        if backoff.iter().any(|s| *s > 600) {
            errors.push(format!(
                "providers.{name}.backoff_secs entries must not exceed 600 seconds"
            ));
        }
    }

    if let Some(temperature) = provider.temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        errors.push(format!(
            "providers.{name}.temperature must be between 0.0 and 2.0 (got {temperature})"
        ));
    }

    if provider.max_tokens == Some(0) {
        errors.push(format!("providers.{name}.max_tokens must be greater than 0"));
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::ConfigBuilder;
    use crate::model::ProviderConfig;
    use taskrelay_utils::ConfigError;

    #[test]
    fn test_builtin_config_is_valid() {
        ConfigBuilder::new().build().unwrap();
    }

    #[test]
    fn test_collects_every_error() {
        let result = ConfigBuilder::new()
            .without_builtin_providers()
            .provider("broken-http", ProviderConfig::http("ftp://nowhere").with_retry(0, vec![]))
            .provider(
                "broken-process",
                ProviderConfig::process("   ").with_timeout_secs(0),
            )
            .max_iterations(0)
            .build();

        match result {
            Err(ConfigError::ValidationFailed {
                errors,
                error_count,
            }) => {
                assert_eq!(error_count, errors.len());
                assert!(errors.iter().any(|e| e.contains("max_iterations")));
                assert!(errors.iter().any(|e| e.contains("broken-http.endpoint")));
                assert!(errors.iter().any(|e| e.contains("broken-http.tries")));
                assert!(errors.iter().any(|e| e.contains("broken-http.backoff_secs")));
                assert!(errors.iter().any(|e| e.contains("broken-process.command")));
                assert!(errors.iter().any(|e| e.contains("broken-process.timeout_secs")));
            }
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_default_provider_must_exist() {
        let result = ConfigBuilder::new().default_provider("missing").build();
        match result {
            Err(ConfigError::ValidationFailed { errors, .. }) => {
                assert!(errors[0].contains("'missing'"));
            }
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
    }
}
