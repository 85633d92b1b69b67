//! Per-iteration operation execution.
//!
//! Called by the [`Orchestrator`](super::orchestrator::Orchestrator) once the
//! model has requested operations. Each call goes through the same pipeline:
//!
//! 1. parse into an [`Operation`] (bad arguments become input errors);
//! 2. retry-guard check (a blocked fingerprint never runs);
//! 3. sandbox check;
//! 4. apply, through the mutation protocol when it changes files;
//! 5. retry-guard bookkeeping.
//!
//! Operations are grouped into dependency-ordered waves. A wave's operations
//! run concurrently; the next wave starts after the whole wave has finished.
//! Guard bookkeeping for a wave is applied in request order once it completes.

use super::events::{EventHandler, OperationOutcome, OperationTrace, TurnEvent};
use crate::error::{ErrorKind, OperationError};
use crate::tools::dag::build_execution_waves;
use crate::tools::operation::{Operation, OperationOutput, Workspace};
use crate::tools::reflection::format_operation_failure;
use crate::tools::retry_guard::{FailureState, GuardDecision, OperationFingerprint, RetryGuard};
use crate::{Message, ToolCall};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Results of one iteration's operations, in request order.
#[derive(Debug, Default)]
pub(crate) struct ExecutionOutcome {
    /// One tool-result message per call that finished. A call interrupted by
    /// cancellation has a trace but no message.
    pub messages: Vec<Message>,
    pub traces: Vec<OperationTrace>,
    /// Cancellation stopped execution before every call had a result.
    pub cancelled: bool,
}

struct Pending<'a> {
    call: &'a ToolCall,
    op: Operation,
    fingerprint: OperationFingerprint,
}

impl Pending<'_> {
    fn trace(&self, iteration: u32) -> OperationTrace {
        OperationTrace {
            kind: Some(self.op.kind()),
            target: self.op.target_label(),
            fingerprint: self.fingerprint.to_string(),
            ..base_trace(self.call, iteration)
        }
    }
}

/// Per-call result slot, filled as operations resolve.
type Slot = Option<(Message, OperationTrace)>;

fn base_trace(call: &ToolCall, iteration: u32) -> OperationTrace {
    OperationTrace {
        call_id: call.id.clone(),
        name: call.function.name.clone(),
        kind: None,
        target: String::new(),
        fingerprint: String::new(),
        outcome: OperationOutcome::Error,
        error_kind: None,
        message: String::new(),
        rolled_back: false,
        source_preserved: None,
        undo_id: None,
        exit_code: None,
        iteration,
    }
}

fn with_guidance(text: String, state: Option<&FailureState>) -> String {
    match state {
        Some(state) => format!("{text}\n\n{}", state.guidance()),
        None => text,
    }
}

/// Build the failure trace and tool message for `error`.
fn failure(
    call: &ToolCall,
    mut trace: OperationTrace,
    error: &OperationError,
    state: Option<&FailureState>,
) -> (Message, OperationTrace) {
    let text = with_guidance(
        format_operation_failure(&call.function.name, &call.function.arguments, error),
        state,
    );
    trace.outcome = match error {
        OperationError::RetryExceeded(_) => OperationOutcome::Blocked,
        e if e.is_rollback() => OperationOutcome::RolledBack,
        _ => OperationOutcome::Error,
    };
    trace.error_kind = Some(error.kind());
    trace.rolled_back = error.is_rollback();
    if let OperationError::Validation {
        source_preserved, ..
    } = error
    {
        trace.source_preserved = *source_preserved;
    }
    trace.message = text.clone();
    (Message::tool_result(call.id.clone(), text), trace)
}

/// Record a failure with the guard. Input errors only count on repeats.
fn record_guard_failure(
    guard: &mut RetryGuard,
    fingerprint: &OperationFingerprint,
    error: &OperationError,
) -> Option<FailureState> {
    match error {
        OperationError::Input(msg) => guard.record_input_error(fingerprint, msg),
        OperationError::RetryExceeded(_) | OperationError::Cancelled => None,
        other => Some(guard.record_failure(fingerprint, &other.to_string())),
    }
}

fn emit_finished(handler: &dyn EventHandler, slot: &Slot) {
    if let Some((_, trace)) = slot {
        handler.on_event(&TurnEvent::OperationFinished { trace });
    }
}

/// Execute one iteration's tool calls.
pub(crate) async fn execute_operations(
    calls: &[ToolCall],
    workspace: &Workspace,
    guard: &mut RetryGuard,
    handler: &dyn EventHandler,
    cancel: &CancellationToken,
    iteration: u32,
) -> ExecutionOutcome {
    let policy = &workspace.policy;
    let mut slots: Vec<Slot> = (0..calls.len()).map(|_| None).collect();

    // ── Parse ──
    let mut pending: Vec<(usize, Pending<'_>)> = Vec::new();
    for (i, call) in calls.iter().enumerate() {
        crate::tools::core::log_tool_call(&call.function.name, &call.function.arguments);
        match Operation::from_call(&call.function.name, &call.function.arguments) {
            Ok(op) => {
                let fingerprint = op.fingerprint(policy);
                pending.push((i, Pending { call, op, fingerprint }));
            }
            Err(error) => {
                let fingerprint =
                    Operation::invalid_fingerprint(&call.function.name, &call.function.arguments);
                let mut trace = base_trace(call, iteration);
                trace.fingerprint = fingerprint.to_string();
                let result = match guard.check_before_execute(&fingerprint) {
                    GuardDecision::Blocked(reason) => {
                        failure(call, trace, &OperationError::RetryExceeded(reason), None)
                    }
                    GuardDecision::Allow => {
                        let state = record_guard_failure(guard, &fingerprint, &error);
                        failure(call, trace, &error, state.as_ref())
                    }
                };
                slots[i] = Some(result);
            }
        }
    }

    // ── Plan ──
    let plans: Vec<_> = pending.iter().map(|(_, p)| p.op.plan(policy)).collect();
    let waves = build_execution_waves(&plans);
    handler.on_event(&TurnEvent::OperationsReceived {
        iteration,
        count: calls.len(),
        waves: waves.len(),
    });
    for slot in &slots {
        emit_finished(handler, slot);
    }

    // ── Execute ──
    let mut cancelled = false;
    for (wave_no, wave) in waves.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Cancelled before wave {}", wave_no + 1);
            cancelled = true;
            break;
        }

        let mut runnable: Vec<usize> = Vec::new();
        for &w in wave {
            let (i, p) = &pending[w];
            let trace = p.trace(iteration);

            if let GuardDecision::Blocked(reason) = guard.check_before_execute(&p.fingerprint) {
                slots[*i] = Some(failure(p.call, trace, &OperationError::RetryExceeded(reason), None));
                emit_finished(handler, &slots[*i]);
                continue;
            }
            if let Err(violation) = p.op.validate(policy) {
                let error = OperationError::Sandbox(violation);
                let state = record_guard_failure(guard, &p.fingerprint, &error);
                slots[*i] = Some(failure(p.call, trace, &error, state.as_ref()));
                emit_finished(handler, &slots[*i]);
                continue;
            }
            runnable.push(w);
        }
        if runnable.is_empty() {
            continue;
        }

        debug!(
            "Wave {}/{}: running {} operation(s)",
            wave_no + 1,
            waves.len(),
            runnable.len()
        );
        let futures = runnable.iter().map(|&w| {
            let p = &pending[w].1;
            let target = p.op.target_label();
            handler.on_event(&TurnEvent::OperationStarted {
                name: &p.call.function.name,
                target: &target,
            });
            p.op.apply(workspace, cancel)
        });
        let results: Vec<Result<OperationOutput, OperationError>> =
            futures::future::join_all(futures).await;

        for (&w, result) in runnable.iter().zip(results) {
            let (i, p) = &pending[w];
            let mut trace = p.trace(iteration);

            match result {
                Ok(output) => {
                    guard.record_success(&p.fingerprint);
                    let text = output.render(policy, workspace.max_result_bytes);
                    trace.outcome = OperationOutcome::Committed;
                    trace.source_preserved = output.source_preserved();
                    trace.undo_id = output.undo_id();
                    trace.exit_code = output.exit_code();
                    trace.message = text.clone();
                    slots[*i] = Some((Message::tool_result(p.call.id.clone(), text), trace));
                }
                Err(OperationError::Cancelled) => {
                    cancelled = true;
                    slots[*i] = Some(failure(p.call, trace, &OperationError::Cancelled, None));
                }
                Err(error) => {
                    let state = record_guard_failure(guard, &p.fingerprint, &error);
                    slots[*i] = Some(failure(p.call, trace, &error, state.as_ref()));
                }
            }
            emit_finished(handler, &slots[*i]);
        }
        if cancelled {
            break;
        }
    }

    let mut outcome = ExecutionOutcome {
        cancelled,
        ..Default::default()
    };
    for (message, trace) in slots.into_iter().flatten() {
        if trace.error_kind != Some(ErrorKind::Cancelled) {
            outcome.messages.push(message);
        }
        outcome.traces.push(trace);
    }
    outcome
}

impl ExecutionOutcome {
    /// The calls that have a result message, in request order.
    pub fn finished_calls(&self, calls: &[ToolCall]) -> Vec<ToolCall> {
        calls
            .iter()
            .filter(|c| {
                self.messages
                    .iter()
                    .any(|m| m.tool_call_id.as_deref() == Some(c.id.as_str()))
            })
            .cloned()
            .collect()
    }
}
