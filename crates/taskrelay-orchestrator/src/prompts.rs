//! Worker and reviewer prompt construction

use taskrelay_tokens::TokenCounter;
use taskrelay_utils::Message;

/// Appended where the worker output was cut to fit the reviewer's context
pub const TRUNCATION_MARKER: &str = "\n[... output truncated to fit the review context ...]";

/// Worker prompt: the raw task first, then the task plus the previous
/// review's feedback framed as a revision request.
#[must_use]
pub fn worker_prompt(task: &str, feedback: Option<&str>) -> String {
    match feedback {
        None => task.to_string(),
        Some(feedback) => format!(
            "{task}\n\n\
             Your previous attempt was reviewed and needs changes. \
             Revise your work based on this feedback:\n\n{feedback}"
        ),
    }
}

/// Review prompt embedding the task and the worker output.
#[must_use]
pub fn review_prompt(task: &str, output: &str) -> String {
    format!(
        "You are reviewing work produced for the task below.\n\n\
         ## Task\n{task}\n\n\
         ## Submitted work\n{output}\n\n\
         ## Instructions\n\
         Decide whether the work fully completes the task. Respond with a JSON \
         object in a ```json code block with exactly these fields:\n\
         - \"approved\": true if the work is ready as-is, otherwise false\n\
         - \"score\": an integer from 1 to 10 rating the work\n\
         - \"feedback\": specific, actionable changes needed, or a short \
         justification when approved"
    )
}

/// Review prompt whose embedded output is cut so the whole prompt stays
/// within `model`'s safe context limit.
#[must_use]
pub fn fitted_review_prompt(tokens: &TokenCounter, model: &str, task: &str, output: &str) -> String {
    let limit = tokens.safe_limit(model);
    let full = review_prompt(task, output);
    if tokens.count_message(&Message::user(full.as_str()), model) <= limit {
        return full;
    }

    let frame = review_prompt(task, TRUNCATION_MARKER);
    let frame_cost = tokens.count_message(&Message::user(frame), model);
    let budget = limit.saturating_sub(frame_cost);
    let fitted = tokens.fit_text(output, model, budget);
    review_prompt(task, &format!("{fitted}{TRUNCATION_MARKER}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_iteration_is_raw_task() {
        assert_eq!(worker_prompt("write a haiku", None), "write a haiku");
    }

    #[test]
    fn test_later_iterations_carry_feedback() {
        let prompt = worker_prompt("write a haiku", Some("use a seasonal word"));
        assert!(prompt.starts_with("write a haiku"));
        assert!(prompt.contains("Revise your work based on this feedback"));
        assert!(prompt.ends_with("use a seasonal word"));
    }

    #[test]
    fn test_review_prompt_embeds_task_and_output() {
        let prompt = review_prompt("write a haiku", "old pond / frog");
        assert!(prompt.contains("## Task\nwrite a haiku"));
        assert!(prompt.contains("## Submitted work\nold pond / frog"));
        assert!(prompt.contains("\"approved\""));
    }

    #[test]
    fn test_short_output_is_not_cut() {
        let tokens = TokenCounter::default();
        let prompt = fitted_review_prompt(&tokens, "llama3.1", "task", "short");
        assert_eq!(prompt, review_prompt("task", "short"));
    }

    #[test]
    fn test_long_output_is_cut_to_safe_limit() {
        let tokens = TokenCounter::default();
        let output = "y".repeat(100_000);
        let prompt = fitted_review_prompt(&tokens, "llama3.1", "task", &output);

        assert!(prompt.contains(TRUNCATION_MARKER));
        let cost = tokens.count_message(&Message::user(prompt.as_str()), "llama3.1");
        assert!(cost <= tokens.safe_limit("llama3.1"));
    }
}
