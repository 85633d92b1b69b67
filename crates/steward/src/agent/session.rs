//! Per-session state owned by the orchestrator.
//!
//! A [`Session`] holds everything that must not leak between sessions: the
//! live conversation, retry-guard records, and the rate window. Summaries
//! live in the session's [`SummaryStore`], which may have been seeded from
//! earlier sessions on the same project.

use crate::api::rate::{RateGovernor, RateLimits};
use crate::context::conversation::Conversation;
use crate::context::store::SummaryStore;
use crate::tools::retry_guard::RetryGuard;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tracing::debug;

/// Generate a unique session id.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Use a counter to handle sub-nanosecond calls.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ss-{ts:x}-{count:04x}")
}

#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub conversation: Conversation,
    pub guard: RetryGuard,
    pub rate: RateGovernor,
    pub summaries: SummaryStore,
    /// Turns completed in this session.
    pub turns: u32,
}

impl Session {
    pub fn new(chars_per_token: f64, limits: RateLimits, summaries: SummaryStore) -> Self {
        let id = generate_session_id();
        debug!("Session {id} opened with {} carried summaries", summaries.len());
        Self {
            id,
            started_at: Utc::now(),
            conversation: Conversation::new(chars_per_token),
            guard: RetryGuard::new(),
            rate: RateGovernor::new(limits),
            summaries,
            turns: 0,
        }
    }

    /// Drop retry-guard records and the rate window. Persisted summaries
    /// are untouched.
    pub fn end(&mut self) {
        debug!("Session {} ended after {} turn(s)", self.id, self.turns);
        self.guard.reset();
        self.rate.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::retry_guard::OperationFingerprint;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert!(a.starts_with("ss-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn end_clears_guard_and_rate_window() {
        let mut session = Session::new(3.5, RateLimits::default(), SummaryStore::in_memory());
        let fp = OperationFingerprint::new("write", "a.json", "{");
        session.guard.record_failure(&fp, "bad json");
        session.rate.acquire(100, &CancellationToken::new()).await.unwrap();
        assert_eq!(session.rate.usage().requests, 1);

        session.end();
        assert_eq!(session.guard.failures(&fp), 0);
        assert_eq!(session.rate.usage().requests, 0);
    }
}
