use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};

use crate::model::{
    Config, ConfigSource, Defaults, HealthConfig, OrchestratorConfig, ProviderConfig,
    builtin_providers,
};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TASKRELAY_CONFIG";

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub verbose: Option<bool>,
    pub max_iterations: Option<u32>,
    pub cache_ttl_secs: Option<u64>,
}

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
struct TomlConfig {
    defaults: Option<Defaults>,
    health: Option<HealthConfig>,
    orchestrator: Option<OrchestratorConfig>,
    providers: Option<BTreeMap<String, ProviderConfig>>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// The config file is, in order: `cli_args.config_path`, `$TASKRELAY_CONFIG`,
    /// or the nearest `.taskrelay/config.toml` above the current directory.
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        match env::var(CONFIG_ENV_VAR) {
            Ok(path) if cli_args.config_path.is_none() && !path.is_empty() => {
                let args = CliArgs {
                    config_path: Some(PathBuf::from(path)),
                    ..cli_args.clone()
                };
                Self::discover_from(&start_dir, &args)
            }
            _ => Self::discover_from(&start_dir, cli_args),
        }
    }

    /// Discover and load configuration starting from a specific directory.
    ///
    /// Path-driven variant that ignores process-global state; tests use it.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut source_attribution = HashMap::new();

        let mut defaults = Defaults::default();
        let mut health = HealthConfig::default();
        let mut orchestrator = OrchestratorConfig::default();
        let mut providers = builtin_providers();

        for key in ["cache_ttl_secs", "probe_timeout_secs", "max_iterations"] {
            source_attribution.insert(key.to_string(), ConfigSource::Default);
        }
        for name in providers.keys() {
            source_attribution.insert(format!("providers.{name}"), ConfigSource::Default);
        }

        let config_path = match &cli_args.config_path {
            Some(explicit_path) => Some(explicit_path.clone()),
            None => Self::discover_config_file_from(start_dir)?,
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;

            let config_source = ConfigSource::ConfigFile(path.clone());

            if let Some(file_defaults) = file_config.defaults {
                if file_defaults.provider.is_some() {
                    defaults.provider = file_defaults.provider;
                    source_attribution.insert("provider".to_string(), config_source.clone());
                }
                if file_defaults.model.is_some() {
                    defaults.model = file_defaults.model;
                    source_attribution.insert("model".to_string(), config_source.clone());
                }
                if file_defaults.verbose.is_some() {
                    defaults.verbose = file_defaults.verbose;
                    source_attribution.insert("verbose".to_string(), config_source.clone());
                }
            }

            if let Some(file_health) = file_config.health {
                if file_health.cache_ttl_secs.is_some() {
                    health.cache_ttl_secs = file_health.cache_ttl_secs;
                    source_attribution.insert("cache_ttl_secs".to_string(), config_source.clone());
                }
                if file_health.probe_timeout_secs.is_some() {
                    health.probe_timeout_secs = file_health.probe_timeout_secs;
                    source_attribution
                        .insert("probe_timeout_secs".to_string(), config_source.clone());
                }
            }

            if let Some(file_orchestrator) = file_config.orchestrator {
                if file_orchestrator.max_iterations.is_some() {
                    source_attribution.insert("max_iterations".to_string(), config_source.clone());
                }
                orchestrator = file_orchestrator;
            }

            // A file entry replaces the built-in provider of the same name wholesale
            if let Some(file_providers) = file_config.providers {
                for (name, provider) in file_providers {
                    source_attribution.insert(format!("providers.{name}"), config_source.clone());
                    providers.insert(name, provider);
                }
            }
        }

        // CLI overrides (highest priority)
        if let Some(provider) = &cli_args.provider {
            defaults.provider = Some(provider.clone());
            source_attribution.insert("provider".to_string(), ConfigSource::Cli);
        }
        if let Some(model) = &cli_args.model {
            defaults.model = Some(model.clone());
            source_attribution.insert("model".to_string(), ConfigSource::Cli);
        }
        if let Some(verbose) = cli_args.verbose {
            defaults.verbose = Some(verbose);
            source_attribution.insert("verbose".to_string(), ConfigSource::Cli);
        }
        if let Some(max_iterations) = cli_args.max_iterations {
            orchestrator.max_iterations = Some(max_iterations);
            source_attribution.insert("max_iterations".to_string(), ConfigSource::Cli);
        }
        if let Some(ttl) = cli_args.cache_ttl_secs {
            health.cache_ttl_secs = Some(ttl);
            source_attribution.insert("cache_ttl_secs".to_string(), ConfigSource::Cli);
        }

        let config = Self {
            defaults,
            health,
            orchestrator,
            providers,
            source_attribution,
        };

        config.validate()?;

        Ok(config)
    }

    /// Discover a config file by searching upward from `start_dir`.
    ///
    /// Walks up looking for `.taskrelay/config.toml`, stopping at repository
    /// root markers (.git, .hg, .svn) or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(".taskrelay").join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config file: {}", path.display())),
            // Missing config file is OK; defaults apply
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TomlConfig::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }
}
