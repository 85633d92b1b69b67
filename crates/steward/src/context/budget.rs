//! Context budget accounting.
//!
//! Token counts are estimated from byte length with a fixed chars-per-token
//! ratio. The estimate only has to be consistent: the same ratio decides
//! when to summarize and verifies that summarization helped.

use crate::Message;
use serde::{Deserialize, Serialize};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Fraction of the context window at which summarization triggers.
pub const DEFAULT_SUMMARIZATION_THRESHOLD: f64 = 0.7;

/// Estimated tokens for a piece of text, rounded up.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    (text.len() as f64 / chars_per_token).ceil() as usize
}

/// Estimated tokens for one message, including any tool-call payloads.
pub fn message_tokens(msg: &Message, chars_per_token: f64) -> usize {
    let mut chars = msg.content.as_ref().map_or(0, |c| c.len());
    if let Some(calls) = &msg.tool_calls {
        chars += calls
            .iter()
            .map(|c| c.function.name.len() + c.function.arguments.len())
            .sum::<usize>();
    }
    (chars as f64 / chars_per_token).ceil() as usize
}

/// Whether the conversation has crossed the summarization threshold.
pub fn should_summarize(current_tokens: usize, max_tokens: usize, threshold: f64) -> bool {
    current_tokens as f64 > max_tokens as f64 * threshold
}

/// Context window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// The model's context window in tokens.
    pub max_context_tokens: usize,
    pub summarization_threshold: f64,
    /// Most recent messages always kept verbatim.
    pub keep_recent: usize,
    /// Most aged messages condensed into one summary. Anything older is
    /// dropped once the summary exists.
    pub max_candidate: usize,
    /// Most recent summaries included in each prompt.
    pub max_summaries_in_prompt: usize,
    pub chars_per_token: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            summarization_threshold: DEFAULT_SUMMARIZATION_THRESHOLD,
            keep_recent: 10,
            max_candidate: 40,
            max_summaries_in_prompt: 5,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl ContextConfig {
    /// Token count above which summarization runs.
    pub fn trigger_tokens(&self) -> usize {
        (self.max_context_tokens as f64 * self.summarization_threshold) as usize
    }

    pub fn should_summarize(&self, current_tokens: usize) -> bool {
        should_summarize(
            current_tokens,
            self.max_context_tokens,
            self.summarization_threshold,
        )
    }
}

/// Display snapshot of the context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetStatus {
    pub current_tokens: usize,
    pub max_tokens: usize,
    pub summary_count: usize,
}

impl BudgetStatus {
    pub fn usage_pct(&self) -> f64 {
        if self.max_tokens == 0 {
            1.0
        } else {
            self.current_tokens as f64 / self.max_tokens as f64
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {}), {} summaries",
            self.current_tokens,
            self.usage_pct() * 100.0,
            self.max_tokens,
            self.summary_count,
        )
    }
}
