//! Two-stage summarization of aged conversation messages.
//!
//! 1. **Extraction** (deterministic, cannot fail): pattern matching pulls
//!    out files touched, decisions, completed tasks and errors.
//! 2. **Condensation** (generative, best effort): one model call turns the
//!    messages plus the extracted facts into prose.
//!
//! If the model call fails, times out, or returns nothing, the summary text
//! is a template rendered from the extracted facts. A summary is never empty.

use crate::api::model::ModelClient;
use crate::context::budget::{DEFAULT_CHARS_PER_TOKEN, estimate_tokens};
use crate::context::conversation::ConversationMessage;
use crate::tools::core::truncate_result;
use crate::{ChatRequest, Message, MessageRole};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// The prompt used for summarization. Instructs the model to produce a concise,
/// factual summary suitable for injecting into a conversation as context.
const SUMMARIZATION_PROMPT: &str = "\
Summarize the following coding-session messages concisely. Focus on:
- What was accomplished (completed subtasks, files modified)
- Key decisions made
- Failed approaches (what was tried and why it failed)
- File paths and function names mentioned
- What remains to be done

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- The extracted facts listed first are reliable; keep every file path they name.
- Be concise. Plain text, no preamble.";

static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[\s"'`(\[])((?:\.{0,2}/)?(?:[\w.-]+/)*[\w-][\w.-]*\.(?:rs|toml|json|md|py|js|jsx|ts|tsx|go|c|h|cc|cpp|hpp|java|kt|cs|swift|rb|yaml|yml|txt|lock|css|scss|html|sh|sql|proto|cfg|ini))\b"#,
    )
    .expect("file path pattern compiles")
});

static DECISION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:decided|decision|will use|going to|chose|choose|the plan is|instead of|switch(?:ed|ing)? to)\b")
        .expect("decision pattern compiles")
});

static COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:done|completed|finished|fixed|implemented|created|updated|deleted|added|passed|committed|resolved)\b")
        .expect("completion pattern compiles")
});

static ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:error|errors|failed|failure|panicked|panic|exception|blocked|rolled back|not found)\b")
        .expect("error pattern compiles")
});

/// Longest fact line kept, in bytes.
const MAX_FACT_CHARS: usize = 160;

/// Configuration for summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Model to use for summarization (cheaper than the main model).
    pub model: Option<String>,
    /// Maximum tokens for the summarization response.
    pub max_summary_tokens: u32,
    /// Time allowed for the generative pass before falling back.
    pub generation_timeout_secs: u64,
    /// Cap on each extracted fact category.
    pub max_facts_per_category: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: None, // Use main model if not specified.
            max_summary_tokens: 1024,
            generation_timeout_secs: 30,
            max_facts_per_category: 12,
        }
    }
}

/// Deterministically extracted facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub files_touched: Vec<String>,
    pub decisions: Vec<String>,
    pub completed_tasks: Vec<String>,
    pub errors: Vec<String>,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        self.files_touched.is_empty()
            && self.decisions.is_empty()
            && self.completed_tasks.is_empty()
            && self.errors.is_empty()
    }
}

/// A condensed span of the conversation. Never edited once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    /// Inclusive ordinal range covered.
    pub first_ordinal: u64,
    pub last_ordinal: u64,
    pub text: String,
    pub facts: ExtractedFacts,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub created_at: DateTime<Utc>,
    /// Whether `text` came from the model rather than the template.
    pub generated: bool,
}

fn push_unique(list: &mut Vec<String>, item: String, cap: usize) {
    if list.len() < cap && !list.contains(&item) {
        list.push(item);
    }
}

fn fact_line(line: &str) -> String {
    truncate_result(line.trim().to_string(), MAX_FACT_CHARS)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Run the deterministic extraction pass.
pub fn extract_facts(messages: &[ConversationMessage], cap: usize) -> ExtractedFacts {
    let mut facts = ExtractedFacts::default();

    for cm in messages {
        let msg = &cm.message;

        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                let Ok(args) = serde_json::from_str::<serde_json::Value>(&call.function.arguments)
                else {
                    continue;
                };
                for key in ["path", "from", "to"] {
                    if let Some(p) = args.get(key).and_then(|v| v.as_str()) {
                        push_unique(&mut facts.files_touched, p.to_string(), cap);
                    }
                }
            }
        }

        let text = msg.text();
        for caps in FILE_PATH.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                push_unique(&mut facts.files_touched, m.as_str().to_string(), cap);
            }
        }

        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match msg.role {
                MessageRole::User | MessageRole::Assistant if DECISION.is_match(line) => {
                    push_unique(&mut facts.decisions, fact_line(line), cap);
                }
                _ => {}
            }
            if matches!(msg.role, MessageRole::Tool | MessageRole::Assistant) {
                if ERROR.is_match(line) {
                    push_unique(&mut facts.errors, fact_line(line), cap);
                } else if COMPLETED.is_match(line) {
                    push_unique(&mut facts.completed_tasks, fact_line(line), cap);
                }
            }
        }
    }

    facts
}

/// Templated summary text built from facts alone.
pub fn render_template(facts: &ExtractedFacts, first: u64, last: u64) -> String {
    let mut out = format!("Messages {first}-{last} (condensed from extracted facts).");
    if facts.is_empty() {
        out.push_str("\nNo files, decisions, completed tasks or errors were recorded.");
        return out;
    }
    if !facts.files_touched.is_empty() {
        out.push_str(&format!("\nFiles touched: {}", facts.files_touched.join(", ")));
    }
    for (title, items) in [
        ("Decisions", &facts.decisions),
        ("Completed", &facts.completed_tasks),
        ("Errors seen", &facts.errors),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{title}:"));
        for item in items {
            out.push_str(&format!("\n- {item}"));
        }
    }
    out
}

/// Render summaries as one prompt block, most recent last.
pub fn render_summaries_for_prompt(summaries: &[&ConversationSummary]) -> Option<String> {
    if summaries.is_empty() {
        return None;
    }
    let mut out = String::from("<context_summary>");
    for s in summaries {
        out.push_str(&format!(
            "\n[messages {}-{}, {}]\n{}\n",
            s.first_ordinal,
            s.last_ordinal,
            s.created_at.format("%Y-%m-%d %H:%M UTC"),
            s.text
        ));
    }
    out.push_str("</context_summary>");
    Some(out)
}

#[derive(Debug)]
pub struct Summarizer {
    pub config: SummarizerConfig,
    /// Model used when `config.model` is unset.
    pub default_model: String,
    chars_per_token: f64,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig, default_model: impl Into<String>) -> Self {
        Self {
            config,
            default_model: default_model.into(),
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn with_chars_per_token(mut self, cpt: f64) -> Self {
        self.chars_per_token = cpt;
        self
    }

    /// Get the model to use for summarization.
    pub fn summary_model(&self) -> &str {
        self.config.model.as_deref().unwrap_or(&self.default_model)
    }

    /// Build the summarization prompt for a span of messages.
    ///
    /// Returns a (system, user) message pair suitable for a one-shot LLM call.
    pub fn build_summarization_request(
        &self,
        span: &[ConversationMessage],
        facts: &ExtractedFacts,
    ) -> (String, String) {
        let mut content = String::new();
        if !facts.is_empty() {
            content.push_str("=== EXTRACTED FACTS ===\n");
            content.push_str(&render_template(
                facts,
                span.first().map_or(0, |m| m.ordinal),
                span.last().map_or(0, |m| m.ordinal),
            ));
            content.push_str("\n\n=== MESSAGES TO SUMMARIZE ===\n");
        }

        for cm in span {
            let role = &cm.message.role;
            let text = cm.message.content.as_deref().unwrap_or("[no content]");
            content.push_str(&format!("[{role}]: {text}\n"));
            if let Some(calls) = &cm.message.tool_calls {
                for call in calls {
                    content.push_str(&format!(
                        "  -> {}({})\n",
                        call.function.name, call.function.arguments
                    ));
                }
            }
            content.push('\n');
        }

        (SUMMARIZATION_PROMPT.to_string(), content)
    }

    /// Condense `span` into a summary. Always returns one; the generative
    /// stage only decides whether the text is prose or a template.
    pub async fn summarize(
        &self,
        session_id: &str,
        span: &[ConversationMessage],
        model: &dyn ModelClient,
    ) -> ConversationSummary {
        let first = span.first().map_or(0, |m| m.ordinal);
        let last = span.last().map_or(first, |m| m.ordinal);
        let facts = extract_facts(span, self.config.max_facts_per_category);
        let tokens_before: usize = span.iter().map(|m| m.estimated_tokens).sum();

        let (system, user) = self.build_summarization_request(span, &facts);
        let request = ChatRequest {
            model: Some(self.summary_model().to_string()),
            messages: vec![Message::system(system), Message::user(user)],
            max_tokens: self.config.max_summary_tokens,
            ..Default::default()
        };

        let timeout = Duration::from_secs(self.config.generation_timeout_secs);
        let generated = match tokio::time::timeout(timeout, model.chat(&request)).await {
            Ok(Ok(completion)) => completion
                .content
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            Ok(Err(e)) => {
                warn!("Summarization call failed, using template: {e}");
                None
            }
            Err(_) => {
                warn!("Summarization timed out after {timeout:?}, using template");
                None
            }
        };

        let max_chars = (self.config.max_summary_tokens as f64 * self.chars_per_token) as usize;
        let (text, is_generated) = match generated {
            Some(text) => (truncate_result(text, max_chars), true),
            None => (render_template(&facts, first, last), false),
        };
        let tokens_after = estimate_tokens(&text, self.chars_per_token);
        debug!(
            "Summarized messages {first}-{last}: {tokens_before} -> {tokens_after} tokens (generated={is_generated})"
        );

        ConversationSummary {
            session_id: session_id.to_string(),
            first_ordinal: first,
            last_ordinal: last,
            text,
            facts,
            tokens_before,
            tokens_after,
            created_at: Utc::now(),
            generated: is_generated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatCompletion;
    use crate::ToolCall;
    use crate::api::model::ModelFuture;
    use crate::context::conversation::Conversation;

    struct FixedModel(Result<ChatCompletion, String>);

    impl ModelClient for FixedModel {
        fn chat<'a>(&'a self, _request: &'a ChatRequest) -> ModelFuture<'a> {
            let reply = self.0.clone();
            Box::pin(async move { reply })
        }
    }

    struct HangingModel;

    impl ModelClient for HangingModel {
        fn chat<'a>(&'a self, _request: &'a ChatRequest) -> ModelFuture<'a> {
            Box::pin(std::future::pending())
        }
    }

    fn span() -> Vec<ConversationMessage> {
        let mut c = Conversation::new(3.5);
        c.push(Message::user("Fix the parser. We decided to switch to serde_json."));
        c.push(Message::assistant_tool_calls(
            None,
            vec![ToolCall::new("c1", "write_file", r#"{"path":"src/parse.rs","content":"x"}"#)],
        ));
        c.push(Message::tool_result("c1", "Updated src/parse.rs (1 bytes). Committed."));
        c.push(Message::tool_result("c2", "cargo exited with 101:\nerror[E0425]: cannot find value"));
        c.drain_oldest(4)
    }

    #[test]
    fn extraction_finds_each_category() {
        let facts = extract_facts(&span(), 12);
        assert_eq!(facts.files_touched, vec!["src/parse.rs".to_string()]);
        assert_eq!(facts.decisions.len(), 1);
        assert!(facts.completed_tasks[0].contains("Committed"));
        assert!(facts.errors.iter().any(|e| e.contains("E0425")));
    }

    #[test]
    fn extraction_caps_categories() {
        let mut c = Conversation::new(3.5);
        for i in 0..20 {
            c.push(Message::user(format!("look at src/file{i}.rs")));
        }
        let facts = extract_facts(&c.drain_oldest(20), 5);
        assert_eq!(facts.files_touched.len(), 5);
    }

    #[tokio::test]
    async fn generated_text_used_when_model_answers() {
        let summarizer = Summarizer::new(SummarizerConfig::default(), "m");
        let model = FixedModel(Ok(ChatCompletion::text("Parser fixed in src/parse.rs.")));
        let summary = summarizer.summarize("ss-1", &span(), &model).await;
        assert!(summary.generated);
        assert_eq!(summary.text, "Parser fixed in src/parse.rs.");
        assert_eq!((summary.first_ordinal, summary.last_ordinal), (0, 3));
        assert!(summary.tokens_after < summary.tokens_before);
    }

    #[tokio::test]
    async fn model_failure_falls_back_to_template() {
        let summarizer = Summarizer::new(SummarizerConfig::default(), "m");
        let model = FixedModel(Err("OpenRouter API HTTP 500: boom".into()));
        let summary = summarizer.summarize("ss-1", &span(), &model).await;
        assert!(!summary.generated);
        assert!(summary.text.contains("src/parse.rs"));
        assert!(summary.text.contains("Errors seen"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_template() {
        let summarizer = Summarizer::new(SummarizerConfig::default(), "m");
        let summary = summarizer.summarize("ss-1", &span(), &HangingModel).await;
        assert!(!summary.generated);
        assert!(!summary.text.is_empty());
    }

    #[tokio::test]
    async fn empty_reply_falls_back_to_template() {
        let summarizer = Summarizer::new(SummarizerConfig::default(), "m");
        let model = FixedModel(Ok(ChatCompletion::text("   ")));
        let summary = summarizer.summarize("ss-1", &span(), &model).await;
        assert!(!summary.generated);
    }

    #[test]
    fn template_never_empty() {
        let text = render_template(&ExtractedFacts::default(), 3, 7);
        assert!(text.contains("3-7"));
    }

    #[test]
    fn prompt_block_orders_as_given() {
        let make = |first, last| ConversationSummary {
            session_id: "s".into(),
            first_ordinal: first,
            last_ordinal: last,
            text: format!("summary {first}"),
            facts: ExtractedFacts::default(),
            tokens_before: 0,
            tokens_after: 0,
            created_at: Utc::now(),
            generated: false,
        };
        let a = make(0, 9);
        let b = make(10, 19);
        let block = render_summaries_for_prompt(&[&a, &b]).unwrap();
        assert!(block.find("summary 0").unwrap() < block.find("summary 10").unwrap());
        assert!(render_summaries_for_prompt(&[]).is_none());
    }
}
