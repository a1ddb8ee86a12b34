//! Core types for execution units

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use taskrelay_utils::{Message, ProviderError, Role};

/// Input to one execution unit call
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Ordered conversation; the last message is the prompt
    pub messages: Vec<Message>,
    /// Model override; `None` uses the provider's default model
    pub model: Option<String>,
    /// Hard limit for this call
    pub timeout: Duration,
    /// Provider-specific options (e.g. `max_tokens`, `temperature`)
    pub options: HashMap<String, Value>,
    /// Working directory for process-backed providers
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    #[must_use]
    pub fn new(messages: Vec<Message>, timeout: Duration) -> Self {
        Self {
            messages,
            model: None,
            timeout,
            options: HashMap::new(),
            cwd: None,
        }
    }

    /// Single user message invocation.
    #[must_use]
    pub fn from_prompt(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self::new(vec![Message::user(prompt)], timeout)
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    /// Flatten the conversation into one prompt string.
    ///
    /// A lone user message is passed through untouched; anything else is
    /// rendered with role prefixes so the context survives.
    #[must_use]
    pub fn prompt_text(&self) -> String {
        if let [only] = self.messages.as_slice()
            && only.role == Role::User
        {
            return only.content.clone();
        }

        let mut prompt = String::new();
        for msg in &self.messages {
            let prefix = match msg.role {
                Role::System => "System: ",
                Role::User => "User: ",
                Role::Assistant => "Assistant: ",
            };
            prompt.push_str(prefix);
            prompt.push_str(&msg.content);
            prompt.push_str("\n\n");
        }
        prompt.trim_end().to_string()
    }
}

/// Output of a successful execution unit call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutput {
    pub text: String,
    pub provider: String,
    /// Model reported by the provider, or the one requested
    pub model_used: Option<String>,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    pub finish_reason: Option<String>,
    /// Provider-specific reasoning text
    pub reasoning: Option<String>,
    /// Provider-specific extras (exit code, stderr tail, raw usage)
    pub extensions: BTreeMap<String, Value>,
}

impl UnitOutput {
    #[must_use]
    pub fn new(text: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            provider: provider.into(),
            model_used: None,
            tokens_input: None,
            tokens_output: None,
            finish_reason: None,
            reasoning: None,
            extensions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model_used = model;
        self
    }

    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.tokens_input = Some(input);
        self.tokens_output = Some(output);
        self
    }

    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Total provider-reported tokens, if the provider reported any.
    #[must_use]
    pub fn tokens_total(&self) -> Option<u64> {
        match (self.tokens_input, self.tokens_output) {
            (None, None) => None,
            (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
        }
    }

    /// Auxiliary fields as a flat metadata map for persisted records.
    #[must_use]
    pub fn meta(&self) -> BTreeMap<String, Value> {
        let mut meta = self.extensions.clone();
        if let Some(model) = &self.model_used {
            meta.insert("model_used".into(), Value::from(model.as_str()));
        }
        if let Some(tokens) = self.tokens_input {
            meta.insert("tokens_input".into(), Value::from(tokens));
        }
        if let Some(tokens) = self.tokens_output {
            meta.insert("tokens_output".into(), Value::from(tokens));
        }
        if let Some(reason) = &self.finish_reason {
            meta.insert("finish_reason".into(), Value::from(reason.as_str()));
        }
        if let Some(reasoning) = &self.reasoning {
            meta.insert("reasoning".into(), Value::from(reasoning.as_str()));
        }
        meta
    }
}

/// Provider-specific adapter that performs one call against one backend.
///
/// Implementations raise the most specific [`taskrelay_utils::ErrorKind`]
/// they can determine and never retry on their own; retry policy belongs to
/// the dispatcher.
#[async_trait]
pub trait ExecutionUnit: Send + Sync {
    /// Registry name of the provider this unit talks to
    fn provider(&self) -> &str;

    async fn run(&self, inv: Invocation) -> Result<UnitOutput, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text_single_user_message_is_verbatim() {
        let inv = Invocation::from_prompt("just this", Duration::from_secs(1));
        assert_eq!(inv.prompt_text(), "just this");
    }

    #[test]
    fn test_prompt_text_flattens_conversation() {
        let inv = Invocation::new(
            vec![
                Message::system("be brief"),
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("again"),
            ],
            Duration::from_secs(1),
        );
        assert_eq!(
            inv.prompt_text(),
            "System: be brief\n\nUser: hi\n\nAssistant: hello\n\nUser: again"
        );
    }

    #[test]
    fn test_meta_collects_aux_fields() {
        let mut output = UnitOutput::new("x", "ollama")
            .with_model(Some("llama3".into()))
            .with_tokens(10, 5)
            .with_extension("exit_code", Value::from(0));
        output.finish_reason = Some("stop".into());

        let meta = output.meta();
        assert_eq!(meta["model_used"], "llama3");
        assert_eq!(meta["tokens_input"], 10);
        assert_eq!(meta["finish_reason"], "stop");
        assert_eq!(meta["exit_code"], 0);
        assert_eq!(output.tokens_total(), Some(15));
        assert_eq!(UnitOutput::new("x", "p").tokens_total(), None);
    }
}
