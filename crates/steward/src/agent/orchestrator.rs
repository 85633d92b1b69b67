//! The turn loop.
//!
//! [`Orchestrator::submit_turn`] drives one user turn through an explicit,
//! bounded state machine:
//!
//! ```text
//! AwaitingModel ──► ExecutingOperations ──► AwaitingModel ──► … ──► Done
//!       │                    │
//!       └────────────────────┴──► Aborted (iteration limit, budget, rate, model, cancel)
//! ```
//!
//! Each `AwaitingModel` step: enforce the context budget (summarizing or
//! pruning if needed), assemble the prompt, acquire from the rate governor,
//! and call the model. Each `ExecutingOperations` step runs the requested
//! operations in dependency-ordered waves and feeds the results back as
//! tool-result messages. Failed, blocked and rolled-back operations are
//! reported to the model; the orchestrator never retries them itself.

use super::config::OrchestratorConfig;
use super::events::{EventHandler, NoopHandler, OperationTrace, TurnEvent, TurnResult};
use super::execution::execute_operations;
use super::session::Session;
use crate::api::model::{ModelClient, estimate_request_tokens};
use crate::api::rate::GovernedModel;
use crate::api::retry::retry_api_call;
use crate::context::budget::BudgetStatus;
use crate::context::conversation::Conversation;
use crate::context::layout;
use crate::context::manager::ContextManager;
use crate::context::store::SummaryStore;
use crate::context::summarizer::Summarizer;
use crate::error::{RateLimitError, StewardError, TurnError, UndoError};
use crate::tools::exec::CommandRunner;
use crate::tools::mutation::MutationProtocol;
use crate::tools::operation::{Operation, Workspace};
use crate::tools::sandbox::SandboxPolicy;
use crate::tools::undo::{UndoEntry, UndoLog};
use crate::{ChatCompletion, ChatRequest, Message, ToolDef};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a turn is.
#[derive(Debug)]
enum TurnState {
    AwaitingModel,
    ExecutingOperations(ChatCompletion),
    Done(String),
    Aborted(TurnError),
}

/// Coordinates the context manager, rate governor, retry guard, sandbox and
/// mutation protocol for one workspace.
///
/// ```ignore
/// let client = OpenRouterClient::new(api_key)?;
/// let config = OrchestratorConfig::new("anthropic/claude-sonnet-4", SYSTEM_PROMPT);
/// let handler = LoggingHandler;
/// let mut orchestrator = Orchestrator::new(&client, "./my-project", config)?
///     .with_event_handler(&handler);
///
/// let result = orchestrator.submit_turn("Add a --verbose flag").await?;
/// println!("{}", result.answer);
/// ```
///
/// Only one turn runs at a time: `submit_turn` takes `&mut self`.
pub struct Orchestrator<'a> {
    client: &'a dyn ModelClient,
    config: OrchestratorConfig,
    workspace: Workspace,
    context: ContextManager,
    session: Session,
    event_handler: &'a dyn EventHandler,
    tools: Vec<ToolDef>,
    state_dir: Option<PathBuf>,
    project_key: String,
}

impl<'a> Orchestrator<'a> {
    /// Open a workspace rooted at `root`, which must be an existing directory.
    pub fn new(
        client: &'a dyn ModelClient,
        root: impl AsRef<Path>,
        config: OrchestratorConfig,
    ) -> Result<Self, StewardError> {
        let policy = Arc::new(SandboxPolicy::new(root, &config.sandbox)?);

        let state_dir = config.storage.state_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                policy.root().join(dir)
            }
        });
        let project_key = config
            .storage
            .project_key
            .clone()
            .or_else(|| {
                policy
                    .root()
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "default".to_string());

        let undo = match &state_dir {
            Some(dir) => UndoLog::open(dir)?,
            None => UndoLog::in_memory(),
        };
        let summaries = SummaryStore::open(
            state_dir.as_deref(),
            &project_key,
            config.storage.carry_summaries,
        )?;

        let workspace = Workspace {
            mutations: MutationProtocol::new(policy.clone(), Arc::new(undo)),
            runner: CommandRunner::new(
                policy.root(),
                config.command_timeout(),
                config.max_result_bytes,
            ),
            policy,
            max_result_bytes: config.max_result_bytes,
        };
        let context = ContextManager::new(
            config.context.clone(),
            Summarizer::new(config.summarizer.clone(), config.model.clone()),
        );
        let session = Session::new(config.context.chars_per_token, config.rate.clone(), summaries);
        info!(
            "Workspace opened at {} (project {project_key}, session {})",
            workspace.policy.root().display(),
            session.id
        );

        Ok(Self {
            client,
            config,
            workspace,
            context,
            session,
            event_handler: &NoopHandler,
            tools: Operation::definitions(),
            state_dir,
            project_key,
        })
    }

    /// Attach an event handler.
    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Seed the session with earlier messages, e.g. to resume a transcript.
    pub fn with_history(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.session.conversation.extend(messages);
        self
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.policy.root()
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.session.conversation
    }

    pub fn summaries(&self) -> &SummaryStore {
        &self.session.summaries
    }

    /// Context size as the next request would see it.
    pub fn budget_status(&self) -> BudgetStatus {
        self.context.status(
            &self.config.system_prompt,
            &self.session.conversation,
            &self.session.summaries,
        )
    }

    /// Undoable deletes, oldest first.
    pub fn undo_log(&self) -> Vec<UndoEntry> {
        self.workspace.mutations.undo_log().entries()
    }

    /// Restore the file removed by delete `id`.
    pub fn undo(&self, id: u64) -> Result<UndoEntry, UndoError> {
        let entry = self
            .workspace
            .mutations
            .undo_log()
            .undo(id, &self.workspace.policy)?;
        info!("Undo {id}: restored {}", entry.path.display());
        Ok(entry)
    }

    // ── Session lifecycle ─────────────────────────────────────────

    /// End the current session: forget retry-guard records and the rate
    /// window. Persisted summaries stay.
    pub fn end_session(&mut self) {
        self.session.end();
    }

    /// End the current session and start a fresh one with an empty
    /// conversation. Summaries carry over when `storage.carry_summaries` is set.
    pub fn new_session(&mut self) -> Result<&str, StewardError> {
        self.session.end();
        let carry = self.config.storage.carry_summaries;
        let summaries = match &self.state_dir {
            Some(dir) => SummaryStore::open(Some(dir.as_path()), &self.project_key, carry)?,
            None if carry => std::mem::replace(&mut self.session.summaries, SummaryStore::in_memory()),
            None => SummaryStore::in_memory(),
        };
        self.session = Session::new(
            self.config.context.chars_per_token,
            self.config.rate.clone(),
            summaries,
        );
        Ok(self.session.id.as_str())
    }

    // ── Turns ─────────────────────────────────────────────────────

    /// Run one turn to completion.
    pub async fn submit_turn(&mut self, input: &str) -> Result<TurnResult, TurnError> {
        self.submit_turn_cancellable(input, &CancellationToken::new())
            .await
    }

    /// Run one turn, stopping early if `cancel` fires.
    ///
    /// Cancellation interrupts rate-limit waits, model calls, backoff sleeps
    /// and running commands, and is checked between operation waves. File
    /// mutations already committed stay committed, and so do their messages:
    /// the conversation keeps the calls that finished and their results, and
    /// drops the interrupted ones.
    pub async fn submit_turn_cancellable(
        &mut self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult, TurnError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TurnError::EmptyInput);
        }
        self.event_handler.on_event(&TurnEvent::TurnStarted {
            session_id: &self.session.id,
            input,
        });
        self.session.conversation.push(Message::user(input));

        let max_iterations = self.config.max_iterations;
        let mut trace: Vec<OperationTrace> = Vec::new();
        let mut iterations = 0u32;
        let mut summaries_created = 0usize;
        let mut prompt_tokens = 0u32;
        let mut completion_tokens = 0u32;
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if iterations >= max_iterations {
                        self.event_handler
                            .on_event(&TurnEvent::IterationLimitReached { max_iterations });
                        TurnState::Aborted(TurnError::IterationLimit {
                            iterations,
                            trace: std::mem::take(&mut trace),
                        })
                    } else if cancel.is_cancelled() {
                        TurnState::Aborted(TurnError::Cancelled {
                            trace: std::mem::take(&mut trace),
                        })
                    } else {
                        iterations += 1;
                        match self.prepare_and_call(iterations, cancel).await {
                            Ok((completion, created)) => {
                                summaries_created += created;
                                if let Some(usage) = &completion.usage {
                                    let p = usage.prompt_tokens.unwrap_or(0);
                                    let c = usage.completion_tokens.unwrap_or(0);
                                    prompt_tokens += p;
                                    completion_tokens += c;
                                    self.event_handler.on_event(&TurnEvent::TokenUsage {
                                        prompt_tokens: p,
                                        completion_tokens: c,
                                    });
                                }
                                TurnState::ExecutingOperations(completion)
                            }
                            Err(TurnError::Cancelled { .. }) => {
                                TurnState::Aborted(TurnError::Cancelled {
                                    trace: std::mem::take(&mut trace),
                                })
                            }
                            Err(e) => TurnState::Aborted(e),
                        }
                    }
                }

                TurnState::ExecutingOperations(completion) => {
                    let text = completion.content.filter(|t| !t.trim().is_empty());
                    if let Some(text) = &text {
                        self.event_handler.on_event(&TurnEvent::Text(text));
                    }

                    if completion.tool_calls.is_empty() {
                        let answer = text.unwrap_or_default();
                        self.session
                            .conversation
                            .push(Message::assistant_text(answer.clone()));
                        TurnState::Done(answer)
                    } else {
                        let outcome = execute_operations(
                            &completion.tool_calls,
                            &self.workspace,
                            &mut self.session.guard,
                            self.event_handler,
                            cancel,
                            iterations,
                        )
                        .await;

                        let calls = if outcome.cancelled {
                            outcome.finished_calls(&completion.tool_calls)
                        } else {
                            completion.tool_calls
                        };
                        trace.extend(outcome.traces);

                        // Commit the request, then its results. A cancelled
                        // iteration keeps only the calls that finished.
                        if !calls.is_empty() {
                            self.session
                                .conversation
                                .push(Message::assistant_tool_calls(text, calls));
                            self.session.conversation.extend(outcome.messages);
                        }

                        if outcome.cancelled {
                            TurnState::Aborted(TurnError::Cancelled {
                                trace: std::mem::take(&mut trace),
                            })
                        } else {
                            TurnState::AwaitingModel
                        }
                    }
                }

                TurnState::Done(answer) => {
                    self.session.turns += 1;
                    self.event_handler
                        .on_event(&TurnEvent::Finished { iterations });
                    return Ok(TurnResult {
                        answer,
                        trace,
                        iterations,
                        summaries_created,
                        budget: self.budget_status(),
                        prompt_tokens,
                        completion_tokens,
                    });
                }

                TurnState::Aborted(error) => {
                    match &error {
                        TurnError::Cancelled { .. } => {
                            self.event_handler.on_event(&TurnEvent::Cancelled);
                        }
                        TurnError::BudgetExhausted {
                            current_tokens,
                            max_tokens,
                        } => {
                            self.event_handler.on_event(&TurnEvent::BudgetExhausted {
                                current_tokens: *current_tokens,
                                max_tokens: *max_tokens,
                            });
                        }
                        other => warn!("Turn aborted: {other}"),
                    }
                    return Err(error);
                }
            };
        }
    }

    /// One `AwaitingModel` step. Returns the completion and the number of
    /// summaries created while enforcing the budget.
    async fn prepare_and_call(
        &mut self,
        iteration: u32,
        cancel: &CancellationToken,
    ) -> Result<(ChatCompletion, usize), TurnError> {
        let cpt = self.config.context.chars_per_token;

        // (1) Budget.
        let created = {
            let session = &mut self.session;
            let governed = GovernedModel::new(self.client, &session.rate, cancel, cpt);
            let report = self
                .context
                .enforce(
                    &session.id,
                    &self.config.system_prompt,
                    &mut session.conversation,
                    &mut session.summaries,
                    &governed,
                )
                .await?;
            if let Some(summary) = &report.summary {
                self.event_handler.on_event(&TurnEvent::Summarized {
                    first_ordinal: summary.first_ordinal,
                    last_ordinal: summary.last_ordinal,
                    generated: summary.generated,
                    tokens_before: summary.tokens_before,
                    tokens_after: summary.tokens_after,
                });
            }
            let removed = report.removed();
            if removed > 0 {
                self.event_handler
                    .on_event(&TurnEvent::Pruned { count: removed });
            }
            usize::from(report.summary.is_some())
        };

        // (2) Prompt.
        let summaries = self
            .session
            .summaries
            .summaries_for_prompt(self.context.config().max_summaries_in_prompt);
        let messages = layout::assemble(
            &self.config.system_prompt,
            &summaries,
            &self.session.conversation,
        );
        let breakdown = self.context.breakdown(
            &self.config.system_prompt,
            &self.session.conversation,
            &self.session.summaries,
        );
        let budget = self.budget_status();
        self.event_handler.on_event(&TurnEvent::IterationStart {
            iteration,
            max_iterations: self.config.max_iterations,
            budget: &budget,
            breakdown: &breakdown,
        });

        let request = ChatRequest {
            model: Some(self.config.model.clone()),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: Some(self.tools.clone()),
            ..Default::default()
        };

        // (3) + (4) Rate gate and model call.
        let completion = self.call_model(&request, cancel).await?;
        Ok((completion, created))
    }

    /// Acquire from the governor and call the model, retrying transient
    /// failures. Every attempt, retries included, goes through the governor.
    async fn call_model(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletion, TurnError> {
        let estimate = estimate_request_tokens(request, self.config.context.chars_per_token);
        let governor = &self.session.rate;
        let client = self.client;
        let rate_error: Mutex<Option<RateLimitError>> = Mutex::new(None);
        let rate_error_ref = &rate_error;

        let attempt = || async move {
            if let Err(e) = governor.acquire(estimate, cancel).await {
                let msg = e.to_string();
                *rate_error_ref.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                return Err(msg);
            }
            client.chat(request).await
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Model call cancelled");
                return Err(TurnError::Cancelled { trace: Vec::new() });
            }
            r = retry_api_call(&self.config.retry, attempt) => r,
        };

        result.map_err(|e| {
            match rate_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
                Some(RateLimitError::Cancelled) => TurnError::Cancelled { trace: Vec::new() },
                Some(rate) => TurnError::RateLimited(rate),
                None => TurnError::Model(e),
            }
        })
    }
}
