//! Convenience re-exports for common `steward` types.
//!
//! ```ignore
//! use steward::prelude::*;
//! ```
//!
//! Pulls in what a front end needs to run turns: the client, the
//! orchestrator and its config, event handlers, and the error types.
//! Lower-level pieces (mutation protocol, wave planning, summarizer) are
//! imported from their modules directly.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatCompletion, ChatRequest, Message, OpenRouterClient, ToolCall, ToolDef};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    CompositeEventHandler, EventHandler, LoggingHandler, NoopHandler, Orchestrator,
    OrchestratorConfig, OperationOutcome, OperationTrace, TurnEvent, TurnResult,
};

// ── Model seam and limits ───────────────────────────────────────────
pub use crate::api::{ModelClient, ModelFuture, RateLimits, RetryConfig};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{BudgetStatus, ContextConfig, ConversationSummary};

// ── Safety ──────────────────────────────────────────────────────────
pub use crate::tools::{SandboxConfig, UndoEntry};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{ErrorKind, OperationError, StewardError, TurnError, UndoError};
