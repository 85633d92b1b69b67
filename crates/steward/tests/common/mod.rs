//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use steward::api::model::{ModelClient, ModelFuture};
use steward::api::rate::RateLimits;
use steward::prelude::*;

/// Scripted model.
///
/// Turn requests (those offering tools) are answered from the script in
/// order; once it runs out the model answers `"done"`. Summarization
/// requests (no tools) get `summary_reply` and never consume the script.
pub struct MockModel {
    script: Mutex<VecDeque<Result<ChatCompletion, String>>>,
    summary_reply: Result<String, String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockModel {
    pub fn new(script: Vec<ChatCompletion>) -> Self {
        Self::with_results(script.into_iter().map(Ok).collect())
    }

    pub fn with_results(script: Vec<Result<ChatCompletion, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            summary_reply: Ok("Earlier work: edited src/main.rs and fixed the build.".into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary_reply(mut self, reply: Result<String, String>) -> Self {
        self.summary_reply = reply;
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn turn_requests(&self) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(ChatRequest::has_tools)
            .collect()
    }

    pub fn summary_requests(&self) -> Vec<ChatRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.has_tools())
            .collect()
    }
}

impl ModelClient for MockModel {
    fn chat<'a>(&'a self, request: &'a ChatRequest) -> ModelFuture<'a> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = if request.has_tools() {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatCompletion::text("done")))
        } else {
            self.summary_reply.clone().map(ChatCompletion::text)
        };
        Box::pin(async move { reply })
    }
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

pub fn write(id: &str, path: &str, content: &str) -> ToolCall {
    call(
        id,
        "write_file",
        serde_json::json!({"path": path, "content": content}),
    )
}

/// One model reply requesting `calls`.
pub fn ops(calls: Vec<ToolCall>) -> ChatCompletion {
    ChatCompletion::tool_calls(calls)
}

/// Config with no rate ceilings and no model-call retries.
pub fn config() -> OrchestratorConfig {
    OrchestratorConfig::new("test/model", "You are a careful coding agent.")
        .with_rate_limits(RateLimits::unlimited())
        .with_retries(0)
}
