//! Probe strategies
//!
//! - [`HttpProbe`]: GET a well-known endpoint, optionally counting listed models
//! - [`ProcessProbe`]: check that the shell starts and the expected tools are on PATH

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use taskrelay_config::{ProviderConfig, ProviderKind};
use taskrelay_llm::HttpClient;
use taskrelay_runner::{CommandSpec, ProcessRunner, TokioProcessRunner, template_program};
use taskrelay_utils::ErrorKind;
use tracing::debug;

use crate::status::ProviderHealth;

/// Longest list of model names copied into health details
const MAX_LISTED_MODELS: usize = 10;

/// A provider-specific liveness/readiness check.
///
/// Probes never fail: every outcome is classified into a [`ProviderHealth`].
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, provider: &str, timeout: Duration) -> ProviderHealth;
}

/// HTTP liveness probe.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: HttpClient,
    url: String,
    models_key: Option<String>,
    api_key_env: Option<String>,
    reachability_only: bool,
}

impl HttpProbe {
    /// Probe a models listing; an empty list under `models_key` is degraded.
    #[must_use]
    pub fn models(client: HttpClient, url: impl Into<String>, models_key: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            models_key,
            api_key_env: None,
            reachability_only: false,
        }
    }

    /// Probe an endpoint that is not meant for GET; any answer short of an
    /// auth rejection or server error means the service is up.
    #[must_use]
    pub fn reachability(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            reachability_only: true,
            ..Self::models(client, url, None)
        }
    }

    #[must_use]
    pub fn with_api_key_env(mut self, var: Option<String>) -> Self {
        self.api_key_env = var;
        self
    }

    fn classify_models(&self, provider: &str, body: &Value) -> ProviderHealth {
        let Some(key) = &self.models_key else {
            return ProviderHealth::healthy(provider, format!("{} is reachable", self.url));
        };

        match body.get(key).and_then(Value::as_array) {
            Some(models) if models.is_empty() => {
                ProviderHealth::degraded(provider, "reachable but no models are available")
                    .with_detail("model_count", 0)
            }
            Some(models) => {
                let names: Vec<Value> = models
                    .iter()
                    .filter_map(|m| {
                        m.get("name")
                            .or_else(|| m.get("id"))
                            .and_then(Value::as_str)
                            .map(Value::from)
                    })
                    .take(MAX_LISTED_MODELS)
                    .collect();
                ProviderHealth::healthy(provider, format!("{} models available", models.len()))
                    .with_detail("model_count", models.len())
                    .with_detail("models", names)
            }
            None => ProviderHealth::degraded(
                provider,
                format!("reachable but response has no '{key}' list"),
            ),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, provider: &str, timeout: Duration) -> ProviderHealth {
        let mut request = self.client.get(&self.url);
        if let Some(var) = &self.api_key_env {
            match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => request = request.bearer_auth(key),
                _ => {
                    return ProviderHealth::unhealthy(
                        provider,
                        format!("API key not found in environment variable '{var}'"),
                    )
                    .with_detail("api_key_env", var.as_str());
                }
            }
        }

        debug!(provider, url = %self.url, "Probing HTTP provider");

        let response = match self.client.send(request, timeout, provider).await {
            Ok(response) => response,
            Err(e) => {
                let reachable = self.reachability_only
                    && e.status.is_some_and(|s| (400..500).contains(&s))
                    && e.kind != ErrorKind::Authentication
                    && e.kind != ErrorKind::RateLimited;
                if reachable {
                    return ProviderHealth::healthy(provider, format!("{} is reachable", self.url));
                }
                let mut health = ProviderHealth::unhealthy(provider, e.message.clone())
                    .with_detail("error_kind", e.kind.as_str());
                if let Some(status) = e.status {
                    health = health.with_detail("status", status);
                }
                return health;
            }
        };

        if self.reachability_only || self.models_key.is_none() {
            return ProviderHealth::healthy(provider, format!("{} is reachable", self.url));
        }

        match response.json::<Value>().await {
            Ok(body) => self.classify_models(provider, &body),
            Err(e) => ProviderHealth::degraded(
                provider,
                format!("reachable but the health response was not JSON: {e}"),
            ),
        }
    }
}

/// Subprocess capability probe.
pub struct ProcessProbe {
    shell: String,
    expected_executables: Vec<String>,
    env_allowlist: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for ProcessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProbe")
            .field("shell", &self.shell)
            .field("expected_executables", &self.expected_executables)
            .finish_non_exhaustive()
    }
}

impl ProcessProbe {
    #[must_use]
    pub fn new(shell: impl Into<String>, expected_executables: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            expected_executables,
            env_allowlist: vec!["PATH".to_string()],
            runner: Arc::new(TokioProcessRunner),
        }
    }

    #[must_use]
    pub fn with_env_allowlist(mut self, vars: Vec<String>) -> Self {
        self.env_allowlist = vars;
        self
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl Probe for ProcessProbe {
    async fn probe(&self, provider: &str, timeout: Duration) -> ProviderHealth {
        let cmd =
            CommandSpec::shell_line(&self.shell, "exit 0").inherit_env(self.env_allowlist.iter());

        match self.runner.run(&cmd, timeout).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                return ProviderHealth::unhealthy(
                    provider,
                    format!("shell '{}' failed a trivial command", self.shell),
                )
                .with_detail("stderr", output.stderr_tail());
            }
            Err(e) => {
                return ProviderHealth::unhealthy(
                    provider,
                    format!("shell '{}' is not available: {e}", self.shell),
                );
            }
        }

        let mut found = serde_json::Map::new();
        let mut missing = Vec::new();
        for name in &self.expected_executables {
            match which::which(name) {
                Ok(path) => {
                    found.insert(name.clone(), Value::from(path.display().to_string()));
                }
                Err(_) => missing.push(name.clone()),
            }
        }

        if missing.is_empty() {
            ProviderHealth::healthy(provider, format!("shell '{}' is available", self.shell))
                .with_detail("executables", Value::Object(found))
        } else {
            ProviderHealth::degraded(
                provider,
                format!("not found in PATH: {}", missing.join(", ")),
            )
            .with_detail("missing", missing)
            .with_detail("executables", Value::Object(found))
        }
    }
}

/// Probe strategy for a configured provider.
///
/// HTTP providers with a `health_url` get a models probe; without one the
/// endpoint itself is checked for reachability. Process providers look for
/// their `expected_executables`, or the template's first word.
#[must_use]
pub fn probe_for_provider(provider: &ProviderConfig, client: &HttpClient) -> Arc<dyn Probe> {
    match provider.kind {
        ProviderKind::Http => {
            let probe = match (&provider.health_url, &provider.endpoint) {
                (Some(url), _) => {
                    HttpProbe::models(client.clone(), url, provider.health_models_key.clone())
                }
                (None, Some(endpoint)) => HttpProbe::reachability(client.clone(), endpoint),
                (None, None) => HttpProbe::reachability(client.clone(), ""),
            };
            Arc::new(probe.with_api_key_env(provider.api_key_env.clone()))
        }
        ProviderKind::Process => {
            let expected = provider.expected_executables.clone().unwrap_or_else(|| {
                provider
                    .command
                    .as_deref()
                    .and_then(template_program)
                    .into_iter()
                    .collect()
            });
            Arc::new(
                ProcessProbe::new(provider.shell(), expected)
                    .with_env_allowlist(provider.env_allowlist()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::HealthStatus;
    use serial_test::serial;
    use taskrelay_llm::testing::{StubResponse, StubServer};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn client() -> HttpClient {
        HttpClient::new().unwrap()
    }

    #[tokio::test]
    async fn test_models_listed_is_healthy() {
        let server = StubServer::start(vec![StubResponse::json(
            200,
            r#"{"models":[{"name":"llama3.1"},{"name":"qwen2"}]}"#,
        )])
        .await
        .unwrap();
        let probe = HttpProbe::models(client(), server.url("/api/tags"), Some("models".into()));
        let health = probe.probe("ollama", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details["model_count"], 2);
        assert_eq!(health.details["models"][0], "llama3.1");
    }

    #[tokio::test]
    async fn test_no_models_is_degraded() {
        let server = StubServer::start(vec![StubResponse::json(200, r#"{"models":[]}"#)])
            .await
            .unwrap();
        let probe = HttpProbe::models(client(), server.url("/api/tags"), Some("models".into()));
        let health = probe.probe("ollama", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_server_error_is_unhealthy() {
        let server = StubServer::start(vec![StubResponse::json(500, "boom")])
            .await
            .unwrap();
        let probe = HttpProbe::models(client(), server.url("/api/tags"), Some("models".into()));
        let health = probe.probe("ollama", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.details["status"], 500);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unhealthy() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = HttpProbe::models(client(), format!("http://127.0.0.1:{port}/"), None);
        let health = probe.probe("ollama", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.details["error_kind"], "network");
    }

    #[tokio::test]
    async fn test_reachability_accepts_method_not_allowed() {
        let server = StubServer::start(vec![StubResponse::json(405, "")])
            .await
            .unwrap();
        let probe = HttpProbe::reachability(client(), server.url("/v1/chat/completions"));
        let health = probe.probe("custom", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_api_key_skips_network() {
        // SAFETY: serialized by #[serial]
        unsafe { std::env::remove_var("TASKRELAY_HEALTH_MISSING_KEY") };
        let server = StubServer::start(vec![]).await.unwrap();
        let probe = HttpProbe::models(client(), server.url("/v1/models"), Some("data".into()))
            .with_api_key_env(Some("TASKRELAY_HEALTH_MISSING_KEY".into()));
        let health = probe.probe("claude", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(server.request_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_probe_missing_tool_is_degraded() {
        let probe = ProcessProbe::new("sh", vec!["definitely-not-a-real-binary-xyz".into()]);
        let health = probe.probe("local", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.details["missing"][0], "definitely-not-a-real-binary-xyz");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_probe_finds_shell_tools() {
        let probe = ProcessProbe::new("sh", vec!["sh".into()]);
        let health = probe.probe("local", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_process_probe_missing_shell_is_unhealthy() {
        let probe = ProcessProbe::new("definitely-not-a-real-shell-xyz", Vec::new());
        let health = probe.probe("local", TIMEOUT).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_process_probe_defaults_to_template_program() {
        let provider = ProviderConfig::process("aider --message {prompt}");
        // Only checks construction; the executable lookup happens at probe time
        let _probe = probe_for_provider(&provider, &client());
        assert_eq!(
            template_program(provider.command.as_deref().unwrap()).as_deref(),
            Some("aider")
        );
    }
}
