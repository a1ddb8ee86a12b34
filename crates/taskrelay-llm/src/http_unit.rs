//! Chat-completions HTTP adapter
//!
//! Posts `{model, messages, max_tokens, temperature}` to an OpenAI-compatible
//! endpoint and reads `choices[0].message.content`, the optional
//! `reasoning_content`, `finish_reason`, and `usage`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskrelay_config::ProviderConfig;
use taskrelay_utils::{ErrorKind, Message, ProviderError};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::types::{ExecutionUnit, Invocation, UnitOutput};

/// Request parameters with per-provider defaults
#[derive(Debug, Clone, PartialEq)]
pub struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Execution unit for chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct HttpUnit {
    name: String,
    client: HttpClient,
    endpoint: String,
    api_key_env: Option<String>,
    default_model: Option<String>,
    default_params: HttpParams,
}

impl HttpUnit {
    #[must_use]
    pub fn new(name: impl Into<String>, client: HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client,
            endpoint: endpoint.into(),
            api_key_env: None,
            default_model: None,
            default_params: HttpParams::default(),
        }
    }

    /// Build from a registry entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the entry has no endpoint.
    pub fn from_config(
        name: &str,
        provider: &ProviderConfig,
        client: HttpClient,
    ) -> Result<Self, ProviderError> {
        let endpoint = provider.endpoint.clone().ok_or_else(|| {
            ProviderError::invalid_argument(format!("provider '{name}' has no endpoint configured"))
                .with_provider(name)
        })?;

        let defaults = HttpParams::default();
        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
            api_key_env: provider.api_key_env.clone(),
            default_model: provider.default_model.clone(),
            default_params: HttpParams {
                max_tokens: provider.max_tokens.unwrap_or(defaults.max_tokens),
                temperature: provider.temperature.unwrap_or(defaults.temperature),
            },
        })
    }

    #[must_use]
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: HttpParams) -> Self {
        self.default_params = params;
        self
    }

    /// Resolve model and parameters for one call.
    ///
    /// `inv.model` beats the provider default; `max_tokens` and `temperature`
    /// options beat the provider's parameters.
    fn resolve_params(&self, inv: &Invocation) -> Result<(String, HttpParams), ProviderError> {
        let model = inv
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| {
                ProviderError::invalid_argument(format!(
                    "no model given and provider '{}' has no default_model",
                    self.name
                ))
                .with_provider(&self.name)
            })?;

        let max_tokens = inv
            .options
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.default_params.max_tokens);

        let temperature = inv
            .options
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        Ok((
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        ))
    }

    fn api_key(&self) -> Result<Option<String>, ProviderError> {
        let Some(var) = &self.api_key_env else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(ProviderError::new(
                ErrorKind::Authentication,
                format!("API key not found in environment variable '{var}'"),
            )
            .with_provider(&self.name)),
        }
    }
}

#[async_trait]
impl ExecutionUnit for HttpUnit {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn run(&self, inv: Invocation) -> Result<UnitOutput, ProviderError> {
        let (model, params) = self.resolve_params(&inv)?;
        let api_key = self.api_key()?;

        debug!(
            provider = %self.name,
            model = %model,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking HTTP provider"
        );

        let body = ChatRequest {
            model: &model,
            messages: &inv.messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream: false,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        let response = self
            .client
            .send(request, inv.timeout, &self.name)
            .await
            .map_err(|e| e.with_model(&model))?;

        let body: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ErrorKind::ApiError,
                format!("failed to parse {} response: {e}", self.name),
            )
            .with_provider(&self.name)
            .with_model(&model)
        })?;

        parse_chat_response(&self.name, &model, body)
    }
}

fn parse_chat_response(
    provider: &str,
    requested_model: &str,
    body: ChatResponse,
) -> Result<UnitOutput, ProviderError> {
    let choice = body.choices.into_iter().next().ok_or_else(|| {
        ProviderError::new(ErrorKind::ApiError, format!("{provider} response missing choices[0]"))
            .with_provider(provider)
            .with_model(requested_model)
    })?;

    let text = choice.message.content.unwrap_or_default();
    if text.trim().is_empty() {
        return Err(
            ProviderError::new(ErrorKind::EmptyOutput, format!("{provider} returned empty content"))
                .with_provider(provider)
                .with_model(requested_model),
        );
    }

    let mut output = UnitOutput::new(text, provider)
        .with_model(Some(body.model.unwrap_or_else(|| requested_model.to_string())));
    output.finish_reason = choice.finish_reason;
    output.reasoning = choice.message.reasoning_content.filter(|r| !r.is_empty());

    if let Some(usage) = body.usage {
        output.tokens_input = usage.prompt_tokens;
        output.tokens_output = usage.completion_tokens;
        if let Some(total) = usage.total_tokens {
            output = output.with_extension("tokens_total", Value::from(total));
        }
    }

    debug!(
        provider,
        tokens_input = ?output.tokens_input,
        tokens_output = ?output.tokens_output,
        "HTTP provider call completed"
    );

    Ok(output)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    model: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
