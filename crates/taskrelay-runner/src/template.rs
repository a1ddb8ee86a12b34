//! Command template rendering
//!
//! Templates are shell command lines with `{prompt}` and `{model}`
//! placeholders. Substituted values are always shell-quoted. A template
//! without `{prompt}` gets the quoted prompt appended as a final argument.

use std::borrow::Cow;

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MODEL_PLACEHOLDER: &str = "{model}";

/// Render a command template into a shell line.
///
/// ```rust
/// use taskrelay_runner::render_template;
///
/// let line = render_template("llm -m {model} {prompt}", "it's done", Some("llama3"));
/// assert_eq!(line, "llm -m llama3 'it'\\''s done'");
///
/// let appended = render_template("cat", "hi there", None);
/// assert_eq!(appended, "cat 'hi there'");
/// ```
#[must_use]
pub fn render_template(template: &str, prompt: &str, model: Option<&str>) -> String {
    let quoted_prompt = shell_words::quote(prompt);
    let quoted_model: Cow<'_, str> = match model {
        Some(model) => shell_words::quote(model),
        None => Cow::Borrowed("''"),
    };

    let line = template.replace(MODEL_PLACEHOLDER, &quoted_model);

    if line.contains(PROMPT_PLACEHOLDER) {
        line.replace(PROMPT_PLACEHOLDER, &quoted_prompt)
    } else {
        let mut line = line.trim_end().to_string();
        line.push(' ');
        line.push_str(&quoted_prompt);
        line
    }
}

/// First word of a template, used as the executable to look for in health probes.
#[must_use]
pub fn template_program(template: &str) -> Option<String> {
    shell_words::split(template)
        .ok()
        .and_then(|words| words.into_iter().next())
        .filter(|word| !word.contains('{'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_placeholders_are_substituted() {
        let line = render_template("run --model {model} --prompt {prompt}", "hello", Some("m1"));
        assert_eq!(line, "run --model m1 --prompt hello");
    }

    #[test]
    fn test_prompt_appended_without_placeholder() {
        let line = render_template("llm -m {model}  ", "say hi", Some("m1"));
        assert_eq!(line, "llm -m m1 'say hi'");
    }

    #[test]
    fn test_missing_model_renders_empty_argument() {
        let line = render_template("llm -m {model} {prompt}", "x", None);
        assert_eq!(line, "llm -m '' x");
    }

    #[test]
    fn test_metacharacters_are_quoted() {
        let line = render_template("echo {prompt}", "$(rm -rf /); `id` && $HOME", None);
        let words = shell_words::split(&line).unwrap();
        assert_eq!(words, vec!["echo", "$(rm -rf /); `id` && $HOME"]);
    }

    #[test]
    fn test_placeholder_text_inside_prompt_is_not_reexpanded() {
        let line = render_template("echo {prompt} {model}", "{model}", Some("m"));
        let words = shell_words::split(&line).unwrap();
        assert_eq!(words, vec!["echo", "{model}", "m"]);
    }

    #[test]
    fn test_template_program() {
        assert_eq!(
            template_program("claude -p {prompt} --model {model}"),
            Some("claude".to_string())
        );
        assert_eq!(template_program("{prompt}"), None);
        assert_eq!(template_program(""), None);
    }

    proptest! {
        #[test]
        fn prop_prompt_survives_as_one_word(prompt in ".{0,200}") {
            let line = render_template("tool {prompt}", &prompt, None);
            let words = shell_words::split(&line).unwrap();
            prop_assert_eq!(words.len(), 2);
            prop_assert_eq!(&words[1], &prompt);
        }
    }
}
