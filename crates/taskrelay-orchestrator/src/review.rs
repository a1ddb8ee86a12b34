//! Reviewer response parsing
//!
//! Three stages, first match wins:
//!
//! 1. a fenced code block holding a JSON verdict
//! 2. a bare JSON object with an `approved` boolean anywhere in the text
//! 3. keyword cues: approves only when an approval cue is present and no
//!    rejection cue is
//!
//! Text with no verdict and no cues is an unscored "changes requested".

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pattern to match a fenced code block with an optional language tag
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("static regex"));

const APPROVAL_CUES: &[&str] = &["approved", "lgtm", "looks good"];
const REJECTION_CUES: &[&str] = &["needs improvement", "changes needed", "rejected"];

/// Which parser stage produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    FencedJson,
    BareJson,
    Heuristic,
    Unparseable,
}

impl ParseSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FencedJson => "fenced_json",
            Self::BareJson => "bare_json",
            Self::Heuristic => "heuristic",
            Self::Unparseable => "unparseable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub approved: bool,
    /// 1..=10; anything else in the JSON is dropped
    pub score: Option<u8>,
    pub feedback: String,
    pub source: ParseSource,
}

/// Parse a reviewer response. Never fails.
#[must_use]
pub fn parse_review(text: &str) -> ReviewVerdict {
    parse_fenced_json(text)
        .or_else(|| parse_bare_json(text))
        .or_else(|| parse_heuristic(text))
        .unwrap_or_else(|| ReviewVerdict {
            approved: false,
            score: None,
            feedback: fallback_feedback(text),
            source: ParseSource::Unparseable,
        })
}

/// Stage 1: JSON inside a ``` fence.
#[must_use]
pub fn parse_fenced_json(text: &str) -> Option<ReviewVerdict> {
    FENCED_BLOCK.captures_iter(text).find_map(|caps| {
        let body = caps.get(1)?.as_str().trim();
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => verdict_from_object(&map, text, ParseSource::FencedJson),
            _ => None,
        }
    })
}

/// Stage 2: first JSON object in the text that carries `approved: bool`.
#[must_use]
pub fn parse_bare_json(text: &str) -> Option<ReviewVerdict> {
    text.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => verdict_from_object(&map, text, ParseSource::BareJson),
            _ => None,
        }
    })
}

/// Stage 3: keyword cues, case-insensitive.
#[must_use]
pub fn parse_heuristic(text: &str) -> Option<ReviewVerdict> {
    let lower = text.to_lowercase();
    let approval = APPROVAL_CUES.iter().any(|cue| lower.contains(cue));
    let rejection = REJECTION_CUES.iter().any(|cue| lower.contains(cue));
    if !approval && !rejection {
        return None;
    }

    Some(ReviewVerdict {
        approved: approval && !rejection,
        score: None,
        feedback: fallback_feedback(text),
        source: ParseSource::Heuristic,
    })
}

fn verdict_from_object(
    map: &Map<String, Value>,
    text: &str,
    source: ParseSource,
) -> Option<ReviewVerdict> {
    let approved = map.get("approved")?.as_bool()?;
    let score = map
        .get("score")
        .and_then(Value::as_u64)
        .filter(|s| (1..=10).contains(s))
        .and_then(|s| u8::try_from(s).ok());
    let feedback = map
        .get("feedback")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map_or_else(|| fallback_feedback(text), str::to_string);

    Some(ReviewVerdict {
        approved,
        score,
        feedback,
        source,
    })
}

fn fallback_feedback(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "The review could not be parsed; revise and resubmit.".to_string()
    } else {
        trimmed.to_string()
    }
}
