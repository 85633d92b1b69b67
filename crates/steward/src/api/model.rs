//! The model completion seam.
//!
//! The orchestrator never talks to HTTP directly. It calls a [`ModelClient`],
//! which [`OpenRouterClient`] implements and tests replace with scripted
//! fakes.

use crate::{ChatCompletion, ChatRequest, OpenRouterClient};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`ModelClient::chat`].
pub type ModelFuture<'a> = Pin<Box<dyn Future<Output = Result<ChatCompletion, String>> + Send + 'a>>;

/// Anything that can answer a chat completion request.
///
/// Errors are plain strings so that [`retry`](crate::api::retry) can classify
/// them as transient or permanent by their HTTP status text.
pub trait ModelClient: Send + Sync {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a>;
}

impl ModelClient for OpenRouterClient {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a> {
        Box::pin(OpenRouterClient::chat(self, request))
    }
}

/// Estimate the token cost of a request for rate accounting: the prompt
/// plus the full response allowance.
pub fn estimate_request_tokens(request: &ChatRequest, chars_per_token: f64) -> u64 {
    let prompt_tokens: usize = request
        .messages
        .iter()
        .map(|m| crate::context::budget::message_tokens(m, chars_per_token))
        .sum();
    let tool_chars: usize = request
        .tools
        .as_ref()
        .map(|defs| {
            defs.iter()
                .map(|d| d.function.description.len() + d.function.parameters.to_string().len())
                .sum()
        })
        .unwrap_or(0);
    let tool_tokens = (tool_chars as f64 / chars_per_token).ceil() as usize;
    (prompt_tokens + tool_tokens) as u64 + u64::from(request.max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn estimate_includes_response_allowance() {
        let req = ChatRequest {
            messages: vec![Message::user("a".repeat(35))],
            max_tokens: 100,
            ..Default::default()
        };
        assert_eq!(estimate_request_tokens(&req, 3.5), 110);
    }
}
