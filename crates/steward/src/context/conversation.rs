//! The live conversation: messages not yet condensed into a summary.

use crate::context::budget::message_tokens;
use crate::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// A message with its position in the session and its estimated size.
///
/// Never edited after it is appended. It leaves the conversation only
/// through summarization or pruning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub ordinal: u64,
    pub message: Message,
    pub estimated_tokens: usize,
}

#[derive(Debug)]
pub struct Conversation {
    messages: VecDeque<ConversationMessage>,
    next_ordinal: u64,
    chars_per_token: f64,
}

impl Conversation {
    pub fn new(chars_per_token: f64) -> Self {
        Self {
            messages: VecDeque::new(),
            next_ordinal: 0,
            chars_per_token,
        }
    }

    /// Append a message. Returns its ordinal.
    pub fn push(&mut self, message: Message) -> u64 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        let estimated_tokens = message_tokens(&message, self.chars_per_token);
        self.messages.push_back(ConversationMessage {
            ordinal,
            message,
            estimated_tokens,
        });
        ordinal
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for m in messages {
            self.push(m);
        }
    }

    pub fn live(&self) -> &VecDeque<ConversationMessage> {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.estimated_tokens).sum()
    }

    /// Remove and return the `n` oldest messages.
    pub fn drain_oldest(&mut self, n: usize) -> Vec<ConversationMessage> {
        let n = n.min(self.messages.len());
        self.messages.drain(..n).collect()
    }

    /// Put messages back at the front, in their original order.
    pub fn restore_front(&mut self, messages: Vec<ConversationMessage>) {
        for m in messages.into_iter().rev() {
            self.messages.push_front(m);
        }
    }

    /// Drop every live message. Ordinals keep counting.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages as sent to the model.
    ///
    /// A tool result whose originating assistant call is no longer live is
    /// rendered as plain user text so the request stays well-formed.
    pub fn to_prompt_messages(&self) -> Vec<Message> {
        let mut known_calls: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(self.messages.len());
        for cm in &self.messages {
            let msg = &cm.message;
            if let Some(calls) = &msg.tool_calls {
                known_calls.extend(calls.iter().map(|c| c.id.as_str()));
            }
            let orphaned = msg.role == MessageRole::Tool
                && msg
                    .tool_call_id
                    .as_deref()
                    .is_none_or(|id| !known_calls.contains(id));
            if orphaned {
                out.push(Message::user(format!(
                    "[result of an earlier operation]\n{}",
                    msg.text()
                )));
            } else {
                out.push(msg.clone());
            }
        }
        out
    }
}
