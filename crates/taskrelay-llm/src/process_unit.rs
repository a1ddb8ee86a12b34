//! Process adapter: renders a command template and runs it through a shell

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use taskrelay_config::ProviderConfig;
use taskrelay_runner::{
    CommandSpec, ProcessOutput, ProcessRunner, RunnerError, TokioProcessRunner, render_template,
};
use taskrelay_utils::{ErrorKind, ProviderError};
use tracing::{debug, warn};

use crate::types::{ExecutionUnit, Invocation, UnitOutput};

/// Shell exit status for "command not found"
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

/// Execution unit for command-line providers.
///
/// `{prompt}` and `{model}` are shell-quoted into the template; stdout is the
/// response. The child starts from an empty environment plus the allowlist.
pub struct ProcessUnit {
    name: String,
    template: String,
    shell: String,
    env_allowlist: Vec<String>,
    default_model: Option<String>,
    runner: Arc<dyn ProcessRunner>,
}

impl std::fmt::Debug for ProcessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessUnit")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("shell", &self.shell)
            .field("env_allowlist", &self.env_allowlist)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl ProcessUnit {
    #[must_use]
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            shell: "sh".to_string(),
            env_allowlist: vec!["PATH".to_string(), "HOME".to_string(), "LANG".to_string()],
            default_model: None,
            runner: Arc::new(TokioProcessRunner),
        }
    }

    /// Build from a registry entry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when the entry has no command template.
    pub fn from_config(name: &str, provider: &ProviderConfig) -> Result<Self, ProviderError> {
        let template = provider
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::invalid_argument(format!(
                    "provider '{name}' has no command configured"
                ))
                .with_provider(name)
            })?;

        Ok(Self {
            shell: provider.shell().to_string(),
            env_allowlist: provider.env_allowlist(),
            default_model: provider.default_model.clone(),
            ..Self::new(name, template)
        })
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    #[must_use]
    pub fn with_env_allowlist(mut self, vars: Vec<String>) -> Self {
        self.env_allowlist = vars;
        self
    }

    fn command_for(&self, inv: &Invocation, model: Option<&str>) -> CommandSpec {
        let line = render_template(&self.template, &inv.prompt_text(), model);
        let mut cmd =
            CommandSpec::shell_line(&self.shell, line).inherit_env(self.env_allowlist.iter());
        if let Some(cwd) = &inv.cwd {
            cmd = cmd.cwd(cwd);
        }
        cmd
    }

    fn map_runner_error(&self, error: RunnerError, inv: &Invocation) -> ProviderError {
        let mapped = match error {
            RunnerError::Timeout { .. } => ProviderError::timeout(inv.timeout),
            RunnerError::SpawnFailed { program, reason } => ProviderError::invalid_argument(
                format!("could not start '{program}' for {}: {reason}", self.name),
            ),
            RunnerError::WaitFailed { program, reason } => ProviderError::new(
                ErrorKind::ProcessFailed,
                format!("lost track of '{program}': {reason}"),
            ),
        };
        mapped.with_provider(&self.name)
    }

    fn map_exit(&self, output: &ProcessOutput) -> ProviderError {
        let stderr = output.stderr_tail();
        let (kind, summary) = match output.exit_code {
            Some(EXIT_COMMAND_NOT_FOUND) => (
                ErrorKind::InvalidArgument,
                format!("{} command not found (exit 127)", self.name),
            ),
            Some(code) => (
                ErrorKind::ProcessFailed,
                format!("{} command exited with status {code}", self.name),
            ),
            None => (
                ErrorKind::ProcessFailed,
                format!("{} command was terminated by a signal", self.name),
            ),
        };

        let message = if stderr.is_empty() {
            summary
        } else {
            format!("{summary}: {stderr}")
        };

        let mut error = ProviderError::new(kind, message)
            .with_provider(&self.name)
            .with_context("stderr", &stderr);
        if let Some(code) = output.exit_code {
            error = error.with_context("exit_code", code.to_string());
        }
        error
    }
}

#[async_trait]
impl ExecutionUnit for ProcessUnit {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn run(&self, inv: Invocation) -> Result<UnitOutput, ProviderError> {
        let model = inv
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| self.default_model.clone());
        let cmd = self.command_for(&inv, model.as_deref());

        debug!(
            provider = %self.name,
            model = ?model,
            cwd = ?inv.cwd,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking process provider"
        );

        let output = self
            .runner
            .run(&cmd, inv.timeout)
            .await
            .map_err(|e| self.map_runner_error(e, &inv))?;

        if !output.success() {
            let error = self.map_exit(&output);
            warn!(provider = %self.name, exit_code = ?output.exit_code, "Process provider failed");
            return Err(match model {
                Some(m) => error.with_model(m),
                None => error,
            });
        }

        let text = output.stdout_string().trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::new(
                ErrorKind::EmptyOutput,
                format!("{} command produced no output", self.name),
            )
            .with_provider(&self.name));
        }

        let stderr = output.stderr_tail();
        let mut result = UnitOutput::new(text, &self.name)
            .with_model(model)
            .with_extension("exit_code", Value::from(output.exit_code.unwrap_or(0)));
        if !stderr.is_empty() {
            result = result.with_extension("stderr", Value::from(stderr));
        }
        Ok(result)
    }
}
