//! Cancelling a turn while its operations run.
#![cfg(unix)]

mod common;

use std::time::Duration;

use common::{MockModel, call, config, ops, write};
use steward::prelude::*;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn cancelled_turn_keeps_committed_operations_in_history() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![
        ops(vec![
            write("w1", "done.txt", "committed"),
            call(
                "c1",
                "run_command",
                serde_json::json!({"program": "tail", "args": ["-f", "done.txt"]}),
            ),
        ]),
        ChatCompletion::text("picked up where we left off"),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = orch.submit_turn_cancellable("go", &cancel).await.unwrap_err();
    let TurnError::Cancelled { trace } = err else {
        panic!("unexpected {err:?}");
    };
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].outcome, OperationOutcome::Committed);
    assert_eq!(trace[1].error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("done.txt")).unwrap(),
        "committed"
    );

    // User input, the request restricted to the write, and the write's result.
    let live: Vec<_> = orch
        .conversation()
        .live()
        .iter()
        .map(|m| m.message.clone())
        .collect();
    assert_eq!(live.len(), 3);
    let requested = live[1].tool_calls.as_ref().unwrap();
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].id, "w1");
    assert_eq!(live[2].tool_call_id.as_deref(), Some("w1"));

    // The next turn's prompt shows the committed write.
    orch.submit_turn("continue").await.unwrap();
    let last = model.turn_requests().pop().unwrap();
    assert!(
        last.messages
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("w1"))
    );
    assert!(
        !last.messages
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some("c1"))
    );
}
