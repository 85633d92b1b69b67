//! Rollback and retry-guard behavior across a full turn.

mod common;

use common::{MockModel, config, ops, write};
use steward::prelude::*;
use tempfile::tempdir;

const BROKEN: &str = "{\"port\": ";
const FIXED: &str = "{\"port\": 8080}";

#[tokio::test]
async fn repeated_broken_write_is_blocked_until_any_success() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("config.json");
    std::fs::write(&target, "{\"port\": 80}").unwrap();

    let model = MockModel::new(vec![
        ops(vec![write("a1", "config.json", BROKEN)]),
        ops(vec![write("a2", "config.json", BROKEN)]),
        ops(vec![write("a3", "config.json", BROKEN)]),
        ops(vec![write("b1", "config.json", FIXED)]),
        ops(vec![write("a4", "config.json", BROKEN)]),
        ChatCompletion::text("Port updated to 8080."),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("set the port to 8080").await.unwrap();
    assert_eq!(result.answer, "Port updated to 8080.");
    assert_eq!(result.iterations, 6);

    let outcomes: Vec<_> = result.trace.iter().map(|t| t.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            OperationOutcome::RolledBack,
            OperationOutcome::RolledBack,
            OperationOutcome::Blocked,
            OperationOutcome::Committed,
            OperationOutcome::RolledBack,
        ]
    );

    // First failure: guidance with the previous error and a strategy change.
    assert!(result.trace[0].message.contains("Previous error"));
    assert!(result.trace[0].message.contains("Change strategy"));
    // Second failure: told it is now blocked.
    assert!(result.trace[1].message.contains("BLOCKED"));
    // Third attempt never ran, and is reported distinctly.
    assert_eq!(result.trace[2].error_kind, Some(ErrorKind::RetryExceeded));
    assert!(!result.trace[2].rolled_back);
    // After the fixed write the old fingerprint runs again.
    assert_eq!(result.trace[4].error_kind, Some(ErrorKind::ValidationError));
    assert!(!result.trace[4].message.contains("BLOCKED"));

    // Every rollback restored the prior content; the committed write stands.
    assert_eq!(std::fs::read_to_string(&target).unwrap(), FIXED);
    assert_eq!(result.failures().count(), 4);
}

#[tokio::test]
async fn rolled_back_write_of_new_file_leaves_nothing_behind() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![
        ops(vec![write("c1", "src/lib.rs", "fn main() {")]),
        ChatCompletion::text("That failed."),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("add lib.rs").await.unwrap();
    let t = &result.trace[0];
    assert_eq!(t.outcome, OperationOutcome::RolledBack);
    assert!(t.rolled_back);
    assert!(!dir.path().join("src/lib.rs").exists());

    // The failure went back to the model as a tool result.
    let second = &model.turn_requests()[1];
    let fed_back = second.messages.last().unwrap();
    assert_eq!(fed_back.tool_call_id.as_deref(), Some("c1"));
    assert!(fed_back.text().contains("validation_error"));
}

#[tokio::test]
async fn failed_move_preserves_source() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("draft.txt"), "{ not json").unwrap();
    let model = MockModel::new(vec![
        ops(vec![common::call(
            "m1",
            "move_file",
            serde_json::json!({"from": "draft.txt", "to": "settings.json"}),
        )]),
        ChatCompletion::text("Could not move it."),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("rename the draft").await.unwrap();
    let t = &result.trace[0];
    assert_eq!(t.outcome, OperationOutcome::RolledBack);
    assert_eq!(t.source_preserved, Some(true));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("draft.txt")).unwrap(),
        "{ not json"
    );
    assert!(!dir.path().join("settings.json").exists());
}

#[tokio::test]
async fn successful_move_reports_source_gone() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.json"), "{\"ok\": true}").unwrap();
    let model = MockModel::new(vec![ops(vec![common::call(
        "m1",
        "move_file",
        serde_json::json!({"from": "a.json", "to": "conf/b.json"}),
    )])]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("move it").await.unwrap();
    let t = &result.trace[0];
    assert_eq!(t.outcome, OperationOutcome::Committed);
    assert_eq!(t.source_preserved, Some(false));
    assert!(!dir.path().join("a.json").exists());
    assert!(dir.path().join("conf/b.json").exists());
}

#[tokio::test]
async fn new_session_forgets_blocked_fingerprints() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![
        ops(vec![write("a1", "x.toml", "[broken")]),
        ops(vec![write("a2", "x.toml", "[broken")]),
        ChatCompletion::text("giving up"),
        ops(vec![write("a3", "x.toml", "[broken")]),
        ChatCompletion::text("still broken"),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let first = orch.submit_turn("write x.toml").await.unwrap();
    assert!(first.trace[1].message.contains("BLOCKED"));

    orch.new_session().unwrap();
    let second = orch.submit_turn("try again").await.unwrap();
    // Executed again rather than blocked.
    assert_eq!(second.trace[0].outcome, OperationOutcome::RolledBack);
    assert!(second.trace[0].message.contains("Previous error"));
}
