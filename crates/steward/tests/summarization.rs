//! Context budget enforcement through full turns.

mod common;

use common::{MockModel, config};
use steward::prelude::*;
use tempfile::tempdir;

const MESSAGE_CHARS: usize = 462;

/// A 132-token message mentioning one file.
fn padded(i: usize) -> String {
    let text = format!("Step {i:03}: updated src/module_{i:03}.rs as planned.");
    format!("{text}{}", "x".repeat(MESSAGE_CHARS - text.len()))
}

fn history(n: usize) -> Vec<Message> {
    (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Message::user(padded(i))
            } else {
                Message::assistant_text(padded(i))
            }
        })
        .collect()
}

fn budget_config() -> OrchestratorConfig {
    config().with_context_window(8000, 0.7)
}

#[tokio::test]
async fn crossing_threshold_summarizes_before_the_model_call() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ChatCompletion::text("Continuing.")]);
    let mut orch = Orchestrator::new(&model, dir.path(), budget_config())
        .unwrap()
        .with_history(history(44));

    let input = padded(44);
    let before = orch.budget_status();
    assert!(before.usage_pct() > 0.7, "{before:?}");

    let result = orch.submit_turn(&input).await.unwrap();
    assert_eq!(result.summaries_created, 1);

    // The summary request went out first.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[0].has_tools());
    assert!(requests[1].has_tools());

    // Exactly one summary, covering everything but the last ten messages.
    let summaries = orch.summaries().all();
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.first_ordinal, 0);
    assert_eq!(summary.last_ordinal, 34);
    assert!(summary.generated);
    assert_eq!(summary.session_id, orch.session_id());
    assert!(
        summary
            .facts
            .files_touched
            .contains(&"src/module_000.rs".to_string())
    );

    // The model saw: system, summary block, acknowledgement, ten live messages.
    let prompt = &requests[1].messages;
    assert_eq!(prompt.len(), 13);
    assert!(prompt[1].text().starts_with("<context_summary>"));
    assert!(prompt[1].text().contains("[messages 0-34"));
    assert_eq!(prompt[3].text(), padded(35));
    assert_eq!(prompt.last().unwrap().text(), input);

    // Ten retained messages plus the answer.
    assert_eq!(orch.conversation().len(), 11);
    let after = orch.budget_status();
    assert!(after.current_tokens < 5600, "{after:?}");
    assert_eq!(after.summary_count, 1);
}

#[tokio::test]
async fn under_threshold_makes_no_summary_call() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ChatCompletion::text("ok")]);
    let mut orch = Orchestrator::new(&model, dir.path(), budget_config())
        .unwrap()
        .with_history(history(20));

    let result = orch.submit_turn("short question").await.unwrap();
    assert_eq!(result.summaries_created, 0);
    assert_eq!(model.requests().len(), 1);
    assert!(orch.summaries().is_empty());
    assert_eq!(orch.conversation().len(), 22);
}

#[tokio::test]
async fn failed_summary_call_falls_back_to_template() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ChatCompletion::text("Continuing.")])
        .with_summary_reply(Err("OpenRouter API HTTP 500: upstream".into()));
    let mut orch = Orchestrator::new(&model, dir.path(), budget_config())
        .unwrap()
        .with_history(history(44));

    orch.submit_turn(&padded(44)).await.unwrap();

    let summary = &orch.summaries().all()[0];
    assert!(!summary.generated);
    assert!(summary.text.starts_with("Messages 0-34"));
    assert!(summary.text.contains("Files touched: src/module_000.rs"));
    assert!(orch.budget_status().current_tokens < 5600);
}

#[tokio::test]
async fn summaries_persist_and_carry_into_later_sessions() {
    let dir = tempdir().unwrap();
    let cfg = budget_config()
        .with_state_dir(".steward")
        .with_project_key("demo");

    let model = MockModel::new(vec![ChatCompletion::text("Continuing.")]);
    {
        let mut orch = Orchestrator::new(&model, dir.path(), cfg.clone())
            .unwrap()
            .with_history(history(44));
        orch.submit_turn(&padded(44)).await.unwrap();
    }
    assert!(dir.path().join(".steward/summaries/demo.jsonl").is_file());

    let model = MockModel::new(vec![ChatCompletion::text("Welcome back.")]);
    let mut orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();
    assert_eq!(orch.budget_status().summary_count, 1);

    orch.submit_turn("where were we?").await.unwrap();
    let prompt = &model.turn_requests()[0].messages;
    assert!(prompt[1].text().contains("Earlier work: edited src/main.rs"));
}

#[tokio::test]
async fn oversized_input_exhausts_the_budget() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![]);
    let mut orch = Orchestrator::new(&model, dir.path(), budget_config()).unwrap();

    let err = orch.submit_turn(&"x".repeat(40_000)).await.unwrap_err();
    match err {
        TurnError::BudgetExhausted {
            current_tokens,
            max_tokens,
        } => {
            assert!(current_tokens > max_tokens);
            assert_eq!(max_tokens, 8000);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(orch.conversation().is_empty());
    assert!(model.requests().is_empty());
}
