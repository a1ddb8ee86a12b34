use serde::{Deserialize, Serialize};

/// Estimation parameters for one family of models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFamily {
    pub name: String,
    /// Model-name prefixes belonging to this family, lowercase
    pub prefixes: Vec<String>,
    /// Average characters per token
    pub chars_per_token: f64,
    pub context_limit: usize,
    /// Tokens held back for the completion
    pub response_reserve: usize,
}

impl ModelFamily {
    #[must_use]
    pub fn new<I, S>(
        name: impl Into<String>,
        prefixes: I,
        chars_per_token: f64,
        context_limit: usize,
        response_reserve: usize,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            chars_per_token,
            context_limit,
            response_reserve,
        }
    }

    fn matches(&self, model: &str) -> bool {
        self.prefixes.iter().any(|p| model.starts_with(p.as_str()))
    }
}

/// Immutable model-limit table consulted by [`crate::TokenCounter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLimits {
    pub families: Vec<ModelFamily>,
    /// Used when no family matches the model hint
    pub fallback: ModelFamily,
}

impl ModelLimits {
    #[must_use]
    pub fn new(families: Vec<ModelFamily>, fallback: ModelFamily) -> Self {
        Self { families, fallback }
    }

    /// Resolve a model hint to its family.
    ///
    /// Matching is case-insensitive on the last `/`-separated segment, so
    /// `anthropic/claude-3-opus` resolves like `claude-3-opus`.
    #[must_use]
    pub fn family(&self, model: &str) -> &ModelFamily {
        let lowered = model.to_ascii_lowercase();
        let name = lowered.rsplit('/').next().unwrap_or(&lowered);
        self.families
            .iter()
            .find(|family| family.matches(name))
            .unwrap_or(&self.fallback)
    }
}

impl Default for ModelLimits {
    fn default() -> Self {
        Self::new(
            vec![
                ModelFamily::new("claude", ["claude"], 3.5, 200_000, 4_000),
                ModelFamily::new("gpt-4", ["gpt-4", "gpt-4o", "o1", "o3"], 4.0, 128_000, 2_000),
                ModelFamily::new("llama", ["llama"], 4.0, 8_192, 2_000),
                ModelFamily::new("mistral", ["mistral", "mixtral"], 4.0, 32_768, 2_000),
                ModelFamily::new("qwen", ["qwen"], 4.0, 32_768, 2_000),
            ],
            ModelFamily::new("default", Vec::<String>::new(), 4.0, 8_192, 2_000),
        )
    }
}
