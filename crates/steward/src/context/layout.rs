//! Prompt layout for model requests.
//!
//! Every request has the same three zones:
//! 1. **System prompt**, never modified.
//! 2. **Summaries**, the most recent condensed spans as one
//!    `<context_summary>` user message followed by an assistant acknowledgement.
//! 3. **Live messages**, verbatim.
//!
//! Budget accounting measures this exact layout, so the token count that
//! triggers summarization is the count of what would actually be sent.

use crate::Message;
use crate::context::budget::{estimate_tokens, message_tokens};
use crate::context::conversation::Conversation;
use crate::context::summarizer::{ConversationSummary, render_summaries_for_prompt};
use serde::Serialize;

/// Assistant acknowledgement that follows the summary block.
pub const SUMMARY_ACK: &str =
    "I've reviewed the context summary and will continue from where I left off.";

/// Estimated tokens per zone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextBreakdown {
    pub system_tokens: usize,
    pub summary_tokens: usize,
    pub live_tokens: usize,
    pub live_messages: usize,
}

impl ContextBreakdown {
    pub fn total(&self) -> usize {
        self.system_tokens + self.summary_tokens + self.live_tokens
    }
}

/// The summary zone as the two messages it occupies, or nothing.
pub fn summary_messages(summaries: &[&ConversationSummary]) -> Vec<Message> {
    match render_summaries_for_prompt(summaries) {
        Some(block) => vec![Message::user(block), Message::assistant_text(SUMMARY_ACK)],
        None => Vec::new(),
    }
}

/// Build the full message list for a request.
pub fn assemble(
    system_prompt: &str,
    summaries: &[&ConversationSummary],
    conversation: &Conversation,
) -> Vec<Message> {
    let mut msgs = Vec::with_capacity(conversation.len() + 3);
    msgs.push(Message::system(system_prompt));
    msgs.extend(summary_messages(summaries));
    msgs.extend(conversation.to_prompt_messages());
    msgs
}

/// Per-zone token estimate of what [`assemble`] would produce.
pub fn breakdown(
    system_prompt: &str,
    summaries: &[&ConversationSummary],
    conversation: &Conversation,
    chars_per_token: f64,
) -> ContextBreakdown {
    ContextBreakdown {
        system_tokens: estimate_tokens(system_prompt, chars_per_token),
        summary_tokens: summary_messages(summaries)
            .iter()
            .map(|m| message_tokens(m, chars_per_token))
            .sum(),
        live_tokens: conversation.total_tokens(),
        live_messages: conversation.len(),
    }
}
