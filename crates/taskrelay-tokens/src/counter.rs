use taskrelay_utils::Message;

use crate::limits::ModelLimits;

/// Tokens added per message for role framing
pub const MESSAGE_OVERHEAD: usize = 4;

/// Minimum overhead added to any non-empty text estimate
pub const MIN_TEXT_OVERHEAD: usize = 4;

/// Lower bound on any safe limit
pub const SAFE_LIMIT_FLOOR: usize = 1_000;

/// Approximate token accounting against an injected [`ModelLimits`] table.
///
/// Estimates are character based: `ceil(chars / ratio)` plus an overhead of
/// `max(4, ceil(2% of that base))`. Empty text counts as zero. Every method
/// is a pure function of its inputs.
#[derive(Debug, Clone, Default)]
pub struct TokenCounter {
    limits: ModelLimits,
}

impl TokenCounter {
    #[must_use]
    pub fn new(limits: ModelLimits) -> Self {
        Self { limits }
    }

    #[must_use]
    pub fn limits(&self) -> &ModelLimits {
        &self.limits
    }

    /// Estimated tokens for `text` under `model`'s family ratio.
    #[must_use]
    pub fn count(&self, text: &str, model: &str) -> usize {
        self.count_chars(text.chars().count(), model)
    }

    fn count_chars(&self, chars: usize, model: &str) -> usize {
        if chars == 0 {
            return 0;
        }
        let ratio = self.limits.family(model).chars_per_token;
        // A zero, negative or NaN ratio from a bad table counts one token per char
        let base = if ratio.is_finite() && ratio > 0.0 {
            (chars as f64 / ratio).ceil() as usize
        } else {
            chars
        };
        let overhead = base.saturating_mul(2).div_ceil(100);
        base.saturating_add(overhead.max(MIN_TEXT_OVERHEAD))
    }

    /// Estimated tokens for one message including role framing.
    #[must_use]
    pub fn count_message(&self, message: &Message, model: &str) -> usize {
        self.count(&message.content, model)
            .saturating_add(MESSAGE_OVERHEAD)
    }

    #[must_use]
    pub fn count_messages(&self, messages: &[Message], model: &str) -> usize {
        messages
            .iter()
            .map(|message| self.count_message(message, model))
            .fold(0, usize::saturating_add)
    }

    /// Context limit minus the family's response reserve, never below 1000.
    #[must_use]
    pub fn safe_limit(&self, model: &str) -> usize {
        let family = self.limits.family(model);
        family
            .context_limit
            .saturating_sub(family.response_reserve)
            .max(SAFE_LIMIT_FLOOR)
    }

    /// Keep the most recent messages that fit within `safe_limit`.
    ///
    /// Walks newest to oldest and stops at the first message that would
    /// overflow, but never keeps fewer than `min(2, len)` messages. The
    /// result is a suffix of the input in its original order.
    #[must_use]
    pub fn truncate(&self, messages: &[Message], model: &str, safe_limit: usize) -> Vec<Message> {
        let min_keep = messages.len().min(2);
        let mut total = 0usize;
        let mut kept = 0usize;

        for message in messages.iter().rev() {
            let cost = self.count_message(message, model);
            if kept >= min_keep && total.saturating_add(cost) > safe_limit {
                break;
            }
            total = total.saturating_add(cost);
            kept += 1;
        }

        messages[messages.len() - kept..].to_vec()
    }

    /// Longest prefix of `text` whose estimate fits in `max_tokens`.
    #[must_use]
    pub fn fit_text<'a>(&self, text: &'a str, model: &str, max_tokens: usize) -> &'a str {
        let total_chars = text.chars().count();
        if self.count_chars(total_chars, model) <= max_tokens {
            return text;
        }

        // The estimate is monotonic in length, so binary search the char count
        let (mut lo, mut hi) = (0usize, total_chars);
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.count_chars(mid, model) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        let end = text
            .char_indices()
            .nth(lo)
            .map_or(text.len(), |(idx, _)| idx);
        &text[..end]
    }
}
