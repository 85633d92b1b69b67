//! Rate governor behavior, alone and inside turns. All tests run on the
//! paused tokio clock.

mod common;

use std::time::Duration;

use common::{MockModel, config, ops, write};
use steward::api::rate::{RateGovernor, RateLimits, WINDOW};
use steward::error::RateLimitError;
use steward::prelude::*;
use tempfile::tempdir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn limits(rpm: u32, tpm: u64, max_wait_secs: u64) -> RateLimits {
    RateLimits {
        requests_per_minute: rpm,
        tokens_per_minute: tpm,
        max_wait_secs,
    }
}

/// Admission times and sizes never exceed either ceiling inside any
/// trailing window.
fn assert_window_respected(admitted: &[(Instant, u64)], rpm: usize, tpm: u64) {
    for (i, (at, _)) in admitted.iter().enumerate() {
        let in_window: Vec<_> = admitted[..=i]
            .iter()
            .filter(|(t, _)| at.duration_since(*t) < WINDOW)
            .collect();
        assert!(in_window.len() <= rpm, "{} requests in window", in_window.len());
        let tokens: u64 = in_window.iter().map(|(_, n)| n).sum();
        assert!(tokens <= tpm, "{tokens} tokens in window");
    }
}

#[tokio::test(start_paused = true)]
async fn request_ceiling_holds_over_any_window() {
    let gov = RateGovernor::new(limits(3, 10_000, 600));
    let cancel = CancellationToken::new();
    let mut admitted = Vec::new();
    for _ in 0..10 {
        gov.acquire(100, &cancel).await.unwrap();
        admitted.push((Instant::now(), 100));
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
    assert_window_respected(&admitted, 3, 10_000);
    // Ten requests at three per minute need at least three full windows.
    let span = admitted[9].0 - admitted[0].0;
    assert!(span >= WINDOW * 3, "{span:?}");
}

#[tokio::test(start_paused = true)]
async fn token_ceiling_holds_over_any_window() {
    let gov = RateGovernor::new(limits(0, 1_000, 600));
    let cancel = CancellationToken::new();
    let sizes = [400, 300, 500, 200, 600, 100, 900];
    let mut admitted = Vec::new();
    for size in sizes {
        gov.acquire(size, &cancel).await.unwrap();
        admitted.push((Instant::now(), size));
    }
    assert_window_respected(&admitted, usize::MAX, 1_000);
}

#[tokio::test(start_paused = true)]
async fn turn_waits_for_capacity_between_iterations() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![
        ops(vec![write("w1", "a.txt", "one")]),
        ops(vec![write("w2", "b.txt", "two")]),
        ChatCompletion::text("Both written."),
    ]);
    let cfg = config().with_rate_limits(limits(2, 0, 120));
    let mut orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();

    let started = Instant::now();
    let result = orch.submit_turn("write two files").await.unwrap();
    assert_eq!(result.iterations, 3);
    assert!(started.elapsed() >= WINDOW);
}

#[tokio::test(start_paused = true)]
async fn wait_beyond_ceiling_aborts_turn_as_retryable() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ops(vec![write("w1", "a.txt", "one")])]);
    let cfg = config().with_rate_limits(limits(1, 0, 5));
    let mut orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();

    let err = orch.submit_turn("write a file").await.unwrap_err();
    assert!(matches!(
        err,
        TurnError::RateLimited(RateLimitError::WaitExceeded { .. })
    ));
    assert!(err.is_retryable());
    // The first iteration committed before the limit was hit.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "one"
    );
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelling_during_rate_wait_keeps_committed_work() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ops(vec![write("w1", "a.txt", "one")])]);
    let cfg = config().with_rate_limits(limits(1, 0, 600));
    let mut orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = orch
        .submit_turn_cancellable("write a file", &cancel)
        .await
        .unwrap_err();
    assert!(started.elapsed() < WINDOW);
    match err {
        TurnError::Cancelled { trace } => {
            assert_eq!(trace.len(), 1);
            assert_eq!(trace[0].outcome, OperationOutcome::Committed);
        }
        other => panic!("unexpected {other:?}"),
    }
    // User input, the tool-call request and its result.
    assert_eq!(orch.conversation().len(), 3);
    assert!(dir.path().join("a.txt").exists());
}

#[tokio::test(start_paused = true)]
async fn summarization_calls_count_against_the_window() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![ChatCompletion::text("ok")]);
    let cfg = config()
        .with_context_window(2000, 0.7)
        .with_rate_limits(limits(1, 0, 120));
    let history = (0..30).map(|i| Message::user(format!("{i:03}{}", "m".repeat(180))));
    let mut orch = Orchestrator::new(&model, dir.path(), cfg)
        .unwrap()
        .with_history(history);

    let started = Instant::now();
    let result = orch.submit_turn("continue").await.unwrap();
    assert_eq!(result.summaries_created, 1);
    assert_eq!(model.summary_requests().len(), 1);
    // The summary took the only slot, so the turn's own call waited.
    assert!(started.elapsed() >= WINDOW);
}

#[tokio::test(start_paused = true)]
async fn end_session_clears_the_window() {
    let dir = tempdir().unwrap();
    let model = MockModel::new(vec![
        ChatCompletion::text("first"),
        ChatCompletion::text("second"),
    ]);
    let cfg = config().with_rate_limits(limits(1, 0, 5));
    let mut orch = Orchestrator::new(&model, dir.path(), cfg).unwrap();

    orch.submit_turn("one").await.unwrap();
    assert!(orch.submit_turn("two").await.is_err());

    orch.end_session();
    let started = Instant::now();
    let result = orch.submit_turn("two again").await.unwrap();
    assert_eq!(result.answer, "second");
    assert!(started.elapsed() < Duration::from_secs(1));
}
