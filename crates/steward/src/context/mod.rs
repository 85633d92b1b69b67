//! Context window management: budgets, layout, summarization.
//!
//! The context window is the scarcest resource in a long coding session.
//! This module keeps every request under it:
//!
//! 1. **[`budget`]**: token estimation, [`ContextConfig`], and the
//!    `should_summarize` threshold check.
//!
//! 2. **[`conversation`]**: the live, ordinal-numbered message list.
//!
//! 3. **[`layout`]**: the request layout: system prompt, summary block,
//!    live messages. Budget checks measure exactly this.
//!
//! 4. **[`summarizer`]**: deterministic fact extraction plus a best-effort
//!    generative pass, with a templated fallback so summaries are never empty.
//!
//! 5. **[`store`]**: append-only summary record, optionally persisted per
//!    project and carried into later sessions.
//!
//! 6. **[`manager`]**: [`ContextManager`] ties these together and runs the
//!    summarize / truncate / prune cycle before each model request.

pub mod budget;
pub mod conversation;
pub mod layout;
pub mod manager;
pub mod store;
pub mod summarizer;

// Re-export commonly used items at the module level.
pub use budget::{BudgetStatus, ContextConfig, DEFAULT_CHARS_PER_TOKEN, should_summarize};
pub use conversation::{Conversation, ConversationMessage};
pub use manager::{ContextManager, EnforcementReport};
pub use store::SummaryStore;
pub use summarizer::{ConversationSummary, ExtractedFacts, Summarizer, SummarizerConfig};
