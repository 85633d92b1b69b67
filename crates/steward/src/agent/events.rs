//! Events, handlers, and turn results for the
//! [`Orchestrator`](super::orchestrator::Orchestrator).
//!
//! The orchestrator reports the lifecycle of each turn through
//! [`TurnEvent`] variants, from the first model call through every operation
//! to the final answer. Callers implement [`EventHandler`] to observe them
//! for logging, rendering, or metrics.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget turns |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |
//! | Custom `impl EventHandler` | Full control (terminal UI, metrics) |

use crate::context::budget::BudgetStatus;
use crate::context::layout::ContextBreakdown;
use crate::error::ErrorKind;
use crate::tools::operation::OperationKind;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

// ── Operation trace ────────────────────────────────────────────────

/// What happened to one requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// Ran to completion. For mutations, the change passed validation and
    /// is now observable.
    Committed,
    /// A mutation failed validation and was reverted.
    RolledBack,
    /// Refused before execution by the retry guard.
    Blocked,
    /// Any other failure: bad input, sandbox violation, command failure.
    Error,
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationOutcome::Committed => "committed",
            OperationOutcome::RolledBack => "rolled back",
            OperationOutcome::Blocked => "blocked",
            OperationOutcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// Trace entry for one operation, in the order the model requested them.
#[derive(Debug, Clone, Serialize)]
pub struct OperationTrace {
    pub call_id: String,
    /// Tool name as requested by the model.
    pub name: String,
    /// `None` when the call could not be parsed into an operation.
    pub kind: Option<OperationKind>,
    pub target: String,
    pub fingerprint: String,
    pub outcome: OperationOutcome,
    pub error_kind: Option<ErrorKind>,
    /// Result or error text as fed back to the model.
    pub message: String,
    pub rolled_back: bool,
    /// For moves: whether the source file is still in place.
    pub source_preserved: Option<bool>,
    /// For deletes: the undo log id of the snapshot.
    pub undo_id: Option<u64>,
    /// For commands: the process exit code.
    pub exit_code: Option<i32>,
    /// Iteration of the turn the operation ran in, starting at 1.
    pub iteration: u32,
}

impl OperationTrace {
    pub fn is_success(&self) -> bool {
        self.outcome == OperationOutcome::Committed
    }
}

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the orchestrator during a turn.
#[derive(Debug)]
pub enum TurnEvent<'a> {
    /// A turn is starting.
    TurnStarted { session_id: &'a str, input: &'a str },
    /// A model call is about to be made.
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        budget: &'a BudgetStatus,
        breakdown: &'a ContextBreakdown,
    },
    /// Aged messages were condensed into a summary.
    Summarized {
        first_ordinal: u64,
        last_ordinal: u64,
        generated: bool,
        tokens_before: usize,
        tokens_after: usize,
    },
    /// Messages were dropped without a summary.
    Pruned { count: usize },
    /// The model returned text (final, or alongside operations).
    Text(&'a str),
    /// Token usage reported by the provider for this call.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The model requested operations.
    OperationsReceived {
        iteration: u32,
        count: usize,
        waves: usize,
    },
    /// One operation is about to run.
    OperationStarted { name: &'a str, target: &'a str },
    /// One operation finished, successfully or not.
    OperationFinished { trace: &'a OperationTrace },
    /// The model produced a final answer.
    Finished { iterations: u32 },
    /// The turn hit its iteration ceiling.
    IterationLimitReached { max_iterations: u32 },
    /// The context could not be reduced; the conversation was reset.
    BudgetExhausted {
        current_tokens: usize,
        max_tokens: usize,
    },
    /// The turn was cancelled.
    Cancelled,
}

/// Handler for turn events.
///
/// Implement this trait to react to turn events. The default implementation
/// ignores everything.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &TurnEvent<'_>) {
///         match event {
///             TurnEvent::Text(text) => println!("{text}"),
///             TurnEvent::OperationFinished { trace } => {
///                 println!("[{}] {} {}", trace.outcome, trace.name, trace.target);
///             }
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &TurnEvent<'_>) {
        let _ = event;
    }
}

/// An event handler that ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler that delegates to multiple inner handlers, in
/// registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(verbose, DebugHandler::new())
///     .with_opt(ui.map(UiHandler::new));
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler. When `condition` is `false`, this is a no-op.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &TurnEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &TurnEvent<'_>) {
        match event {
            TurnEvent::TurnStarted { session_id, input } => {
                let preview: String = input.chars().take(120).collect();
                info!("Turn started: session={session_id} input={preview:?}");
            }
            TurnEvent::IterationStart {
                iteration,
                max_iterations,
                budget,
                breakdown,
            } => {
                info!(
                    "[iteration {}/{}] {}",
                    iteration,
                    max_iterations,
                    budget.to_log_string()
                );
                debug!(
                    "  zones: system={}t, summaries={}t, live={}t ({} messages)",
                    breakdown.system_tokens,
                    breakdown.summary_tokens,
                    breakdown.live_tokens,
                    breakdown.live_messages,
                );
            }
            TurnEvent::Summarized {
                first_ordinal,
                last_ordinal,
                generated,
                tokens_before,
                tokens_after,
            } => {
                info!(
                    "Summarized messages {first_ordinal}-{last_ordinal}: {tokens_before} -> {tokens_after} tokens{}",
                    if *generated { "" } else { " (template)" }
                );
            }
            TurnEvent::Pruned { count } => {
                info!("Pruned {count} message(s) from context");
            }
            TurnEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "Model text: {preview}{}",
                    if text.len() > 200 { "..." } else { "" }
                );
            }
            TurnEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            TurnEvent::OperationsReceived {
                iteration,
                count,
                waves,
            } => {
                debug!("{count} operation(s) in iteration {iteration}, {waves} wave(s)");
            }
            TurnEvent::OperationStarted { name, target } => {
                debug!("Executing {name} on {target}");
            }
            TurnEvent::OperationFinished { trace } => match trace.outcome {
                OperationOutcome::Committed => {
                    debug!("{} {} -> {}", trace.name, trace.target, trace.outcome);
                }
                _ => {
                    warn!(
                        "{} {} -> {}: {}",
                        trace.name,
                        trace.target,
                        trace.outcome,
                        trace.message.lines().next().unwrap_or_default()
                    );
                }
            },
            TurnEvent::Finished { iterations } => {
                info!("Turn finished after {iterations} iteration(s)");
            }
            TurnEvent::IterationLimitReached { max_iterations } => {
                warn!("Turn hit iteration limit ({max_iterations})");
            }
            TurnEvent::BudgetExhausted {
                current_tokens,
                max_tokens,
            } => {
                warn!("Context budget exhausted ({current_tokens}/{max_tokens} tokens); conversation reset");
            }
            TurnEvent::Cancelled => {
                info!("Turn cancelled");
            }
        }
    }
}

// ── Turn result ────────────────────────────────────────────────────

/// The result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// The model's final answer.
    pub answer: String,
    /// Every operation attempted during the turn, in execution order.
    pub trace: Vec<OperationTrace>,
    /// Model calls made.
    pub iterations: u32,
    /// Summaries created during the turn.
    pub summaries_created: usize,
    /// Context budget after the turn.
    pub budget: BudgetStatus,
    /// Provider-reported prompt tokens across all calls.
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TurnResult {
    /// Operations that did not commit.
    pub fn failures(&self) -> impl Iterator<Item = &OperationTrace> {
        self.trace.iter().filter(|t| !t.is_success())
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}
