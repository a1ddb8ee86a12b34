//! Property-based tests for history truncation
//!
//! Truncation keeps the newest messages that fit a token limit and never
//! drops below `min(2, len)` messages.
//!
//! ## Configuration
//!
//! - `PROPTEST_CASES`: number of test cases per property (default: 64)
//! - `PROPTEST_MAX_SHRINK_ITERS`: max shrinking iterations on failure (default: 1000)
//!
//! ```bash
//! PROPTEST_CASES=256 cargo test --test property_based_tests
//! ```

use proptest::prelude::*;
use std::env;
use taskrelay::{Message, Role, TokenCounter};

const DEFAULT_PROPTEST_CASES: u32 = 64;

const DEFAULT_MAX_SHRINK_ITERS: u32 = 1000;

/// ProptestConfig honouring `PROPTEST_CASES` and `PROPTEST_MAX_SHRINK_ITERS`.
fn proptest_config(max_cases: Option<u32>) -> ProptestConfig {
    let env_cases = env::var("PROPTEST_CASES")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_PROPTEST_CASES);

    let env_shrink_iters = env::var("PROPTEST_MAX_SHRINK_ITERS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(DEFAULT_MAX_SHRINK_ITERS);

    let cases = match max_cases {
        Some(max) => env_cases.min(max),
        None => env_cases,
    };

    ProptestConfig {
        cases,
        max_shrink_iters: env_shrink_iters,
        ..ProptestConfig::default()
    }
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::System), Just(Role::User), Just(Role::Assistant)]
}

fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec(
        (arb_role(), "[a-zA-Z0-9 .,!?\n]{0,600}").prop_map(|(role, content)| Message::new(role, content)),
        0..24,
    )
}

fn arb_model() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("claude-3-5-sonnet-20241022"),
        Just("gpt-4o"),
        Just("llama3.1"),
        Just("unknown-model"),
    ]
}

proptest! {
    #![proptest_config(proptest_config(None))]

    #[test]
    fn prop_truncation_is_idempotent(
        messages in arb_messages(),
        model in arb_model(),
        limit in 0usize..4000,
    ) {
        let counter = TokenCounter::default();
        let once = counter.truncate(&messages, model, limit);
        let twice = counter.truncate(&once, model, limit);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_truncation_respects_limit_or_keeps_minimum(
        messages in arb_messages(),
        model in arb_model(),
        limit in 0usize..4000,
    ) {
        let counter = TokenCounter::default();
        let truncated = counter.truncate(&messages, model, limit);
        let within_limit = counter.count_messages(&truncated, model) <= limit;
        let minimum_retained = truncated.len() == messages.len().min(2);
        prop_assert!(within_limit || minimum_retained);
    }

    #[test]
    fn prop_truncation_keeps_newest_suffix(
        messages in arb_messages(),
        model in arb_model(),
        limit in 0usize..4000,
    ) {
        let counter = TokenCounter::default();
        let truncated = counter.truncate(&messages, model, limit);
        prop_assert!(truncated.len() <= messages.len());
        prop_assert_eq!(&messages[messages.len() - truncated.len()..], truncated.as_slice());
    }

    #[test]
    fn prop_fit_text_stays_within_budget(
        text in ".{0,2000}",
        model in arb_model(),
        budget in 0usize..600,
    ) {
        let counter = TokenCounter::default();
        let fitted = counter.fit_text(&text, model, budget);
        prop_assert!(text.starts_with(fitted));
        prop_assert!(fitted == text || counter.count(fitted, model) <= budget);
    }
}

#[test]
fn test_safe_limit_for_sonnet() {
    let counter = TokenCounter::default();
    assert_eq!(counter.safe_limit("claude-3-5-sonnet-20241022"), 196_000);
}
