//! Sandbox, delete/undo and command execution driven through turns.

mod common;

use common::{MockModel, call, config, ops, write};
use serde_json::json;
use steward::prelude::*;
use tempfile::tempdir;

#[tokio::test]
async fn sandbox_rejections_never_touch_the_workspace() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("project");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").unwrap();

    let model = MockModel::new(vec![
        ops(vec![
            write("s1", "../outside.txt", "escaped"),
            call("s2", "delete_file", json!({"path": "Cargo.toml"})),
            write("s3", ".env", "TOKEN=1"),
            call("s4", "run_command", json!({"program": "rm", "args": ["-rf", "/"]})),
            call("s5", "run_command", json!({"program": "curl", "args": ["example.com"]})),
            call("s6", "run_command", json!({"program": "sh -c", "args": ["ls"]})),
        ]),
        ChatCompletion::text("None of that was allowed."),
    ]);
    let mut orch = Orchestrator::new(&model, &root, config()).unwrap();

    let result = orch.submit_turn("do risky things").await.unwrap();
    assert_eq!(result.trace.len(), 6);
    for t in &result.trace {
        assert_eq!(t.outcome, OperationOutcome::Error, "{}", t.call_id);
        assert_eq!(t.error_kind, Some(ErrorKind::SandboxViolation), "{}", t.call_id);
    }
    let rules: Vec<_> = result.trace.iter().map(|t| t.message.clone()).collect();
    assert!(rules[0].contains("path outside workspace"));
    assert!(rules[1].contains("critical project file"));
    assert!(rules[2].contains("sensitive file"));
    assert!(rules[3].contains("destructive command"));
    assert!(rules[4].contains("command not allowed"));
    assert!(rules[5].contains("malformed command"));

    assert!(!dir.path().join("outside.txt").exists());
    assert!(root.join("Cargo.toml").exists());
    assert!(!root.join(".env").exists());
}

#[tokio::test]
async fn writing_inside_the_workspace_is_allowed() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ops(vec![write("w1", "src/inside.txt", "hello")])]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("write inside").await.unwrap();
    assert!(result.trace[0].is_success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("src/inside.txt")).unwrap(),
        "hello"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_out_of_the_workspace_is_rejected() {
    let outside = tempdir().unwrap();
    let dir = tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

    let model = MockModel::new(vec![ops(vec![write("w1", "link/pwned.txt", "x")])]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("write through the link").await.unwrap();
    assert_eq!(result.trace[0].error_kind, Some(ErrorKind::SandboxViolation));
    assert!(!outside.path().join("pwned.txt").exists());
}

#[tokio::test]
async fn deletes_survive_restart_and_can_be_undone() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("notes.md"), "# keep").unwrap();
    std::fs::write(dir.path().join("old.md"), "# old").unwrap();
    let cfg = config().with_state_dir(".steward");

    let model = MockModel::new(vec![ops(vec![
        call("d1", "delete_file", json!({"path": "notes.md"})),
        call("d2", "delete_file", json!({"path": "old.md"})),
    ])]);
    let ids = {
        let mut orch = Orchestrator::new(&model, dir.path(), cfg.clone()).unwrap();
        let result = orch.submit_turn("clean up").await.unwrap();
        result
            .trace
            .iter()
            .map(|t| t.undo_id.unwrap())
            .collect::<Vec<_>>()
    };
    assert!(ids[0] < ids[1]);
    assert!(!dir.path().join("notes.md").exists());

    let model = MockModel::new(vec![]);
    let orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();
    let log = orch.undo_log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].id, ids[0]);

    let restored = orch.undo(ids[0]).unwrap();
    assert!(restored.path.ends_with("notes.md"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.md")).unwrap(),
        "# keep"
    );
    assert_eq!(orch.undo_log().len(), 1);
    assert!(matches!(orch.undo(ids[0]), Err(UndoError::NotFound(_))));
}

#[tokio::test]
async fn undo_refuses_to_overwrite_a_recreated_file() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "original").unwrap();
    let model = MockModel::new(vec![
        ops(vec![call("d1", "delete_file", json!({"path": "a.txt"}))]),
        ops(vec![write("w1", "a.txt", "replacement")]),
    ]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("replace a.txt").await.unwrap();
    let id = result.trace[0].undo_id.unwrap();
    assert!(matches!(orch.undo(id), Err(UndoError::Conflict(_))));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "replacement"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn commands_run_with_argument_lists() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("present.txt"), "").unwrap();
    let model = MockModel::new(vec![ops(vec![
        call("c1", "run_command", json!({"program": "echo", "args": ["hello; $(whoami) | cat"]})),
        call("c2", "run_command", json!({"program": "ls", "args": ["missing-dir"]})),
    ])]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("run things").await.unwrap();
    let echo = &result.trace[0];
    assert_eq!(echo.outcome, OperationOutcome::Committed);
    assert_eq!(echo.exit_code, Some(0));
    // The metacharacters were a literal argument, not shell syntax.
    let fed_back = &model.turn_requests()[1].messages;
    let echo_result = fed_back
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("c1"))
        .unwrap();
    assert!(echo_result.text().contains("hello; $(whoami) | cat"));
    assert!(dir.path().join("present.txt").exists());

    let ls = &result.trace[1];
    assert_eq!(ls.outcome, OperationOutcome::Error);
    assert_eq!(ls.error_kind, Some(ErrorKind::ExecutionError));
}

#[tokio::test]
async fn malformed_arguments_are_input_errors() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ops(vec![
        ToolCall::new("i1", "write_file", "{not json"),
        call("i2", "read_file", json!({"file": "a.txt"})),
        call("i3", "read_file", json!({"path": "nope.txt"})),
    ])]);
    let mut orch = Orchestrator::new(&model, dir.path(), config()).unwrap();

    let result = orch.submit_turn("bad args").await.unwrap();
    assert_eq!(result.trace.len(), 3);
    for t in &result.trace {
        assert_eq!(t.error_kind, Some(ErrorKind::InputError), "{}", t.call_id);
        assert!(!t.rolled_back);
    }
    assert_eq!(result.answer, "done");
}
