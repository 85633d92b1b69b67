//! Terminal output for turn progress.

use std::io::Write;

use steward::agent::events::{
    EventHandler, OperationOutcome, OperationTrace, TurnEvent, TurnResult,
};
use steward::context::BudgetStatus;

/// Prints operation progress and context notices to stderr. The final
/// answer is left to the caller so one-shot output can be piped.
pub struct ConsoleHandler;

impl EventHandler for ConsoleHandler {
    fn on_event(&self, event: &TurnEvent<'_>) {
        let line = match event {
            TurnEvent::OperationFinished { trace } => Some(format_trace(trace)),
            TurnEvent::Summarized {
                first_ordinal,
                last_ordinal,
                generated,
                ..
            } => Some(format!(
                "  [context] condensed messages {first_ordinal}-{last_ordinal}{}",
                if *generated { "" } else { " (from extracted facts)" }
            )),
            TurnEvent::Pruned { count } => {
                Some(format!("  [context] dropped {count} old message(s)"))
            }
            TurnEvent::BudgetExhausted { .. } => {
                Some("  [context] budget exhausted; conversation reset".to_string())
            }
            TurnEvent::IterationLimitReached { max_iterations } => Some(format!(
                "  [stopped] reached the {max_iterations}-iteration limit"
            )),
            TurnEvent::Cancelled => Some("  [cancelled]".to_string()),
            _ => None,
        };
        if let Some(line) = line {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{line}");
        }
    }
}

/// One status line per operation.
pub fn format_trace(trace: &OperationTrace) -> String {
    let mark = match trace.outcome {
        OperationOutcome::Committed => "ok",
        OperationOutcome::RolledBack => "rolled back",
        OperationOutcome::Blocked => "blocked",
        OperationOutcome::Error => "error",
    };
    let mut line = format!("  [{mark}] {} {}", trace.name, trace.target);
    if trace.source_preserved == Some(true) {
        line.push_str(" (source preserved)");
    }
    if let Some(id) = trace.undo_id {
        line.push_str(&format!(" (undo id {id})"));
    }
    if let Some(code) = trace.exit_code {
        line.push_str(&format!(" (exit {code})"));
    }
    line
}

pub fn format_budget(status: &BudgetStatus) -> String {
    format!(
        "context: {} / {} tokens ({:.0}%), {} summar{}",
        status.current_tokens,
        status.max_tokens,
        status.usage_pct() * 100.0,
        status.summary_count,
        if status.summary_count == 1 { "y" } else { "ies" }
    )
}

/// Machine-readable turn result for `--json`.
pub fn turn_json(result: &TurnResult) -> serde_json::Value {
    serde_json::json!({
        "answer": result.answer,
        "iterations": result.iterations,
        "summaries_created": result.summaries_created,
        "budget": result.budget,
        "usage": {
            "prompt_tokens": result.prompt_tokens,
            "completion_tokens": result.completion_tokens,
        },
        "trace": result.trace,
    })
}
