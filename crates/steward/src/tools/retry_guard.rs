//! Retry guard: stops the model from repeating the same failing operation.
//!
//! Every requested operation is keyed by an [`OperationFingerprint`]. Two
//! consecutive failures of one fingerprint block it; a success of *any*
//! operation clears all failure state, since the workspace has changed and
//! earlier failures may no longer apply.
//!
//! ```text
//!  Clean ──failure──▶ OneFailure ──failure──▶ Blocked
//!    ▲                    │                      │
//!    └──── any success ───┴──────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Consecutive failures after which a fingerprint is blocked.
pub const BLOCK_AFTER_FAILURES: u8 = 2;

/// FNV-1a 64-bit hash.
pub(crate) fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Stable identity of an attempted operation.
///
/// Built from the operation kind, its normalized target, and a hash of the
/// arguments that distinguish one attempt from another (file content for a
/// write, argv for a command).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationFingerprint(String);

impl OperationFingerprint {
    pub fn new(kind: &str, target: &str, key_args: &str) -> Self {
        let target = target.trim().trim_start_matches("./").replace('\\', "/");
        Self(format!("{kind}:{target}:{:016x}", fnv1a(key_args)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure history for one fingerprint.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub fingerprint: OperationFingerprint,
    /// Clamped to [`BLOCK_AFTER_FAILURES`].
    pub consecutive_failures: u8,
    pub last_error: String,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Do not execute. Carries the text returned to the model.
    Blocked(String),
}

/// State of a fingerprint after recording a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureState {
    /// First failure: the guidance names the error and asks for a new approach.
    OneFailure { guidance: String },
    /// Second failure: further identical attempts will not run.
    Blocked { guidance: String },
}

impl FailureState {
    pub fn guidance(&self) -> &str {
        match self {
            FailureState::OneFailure { guidance } | FailureState::Blocked { guidance } => guidance,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, FailureState::Blocked { .. })
    }
}

/// Per-session failure tracker.
#[derive(Debug, Default)]
pub struct RetryGuard {
    records: HashMap<OperationFingerprint, OperationRecord>,
    /// Fingerprints that produced an input error once. A repeat counts as a
    /// real failure.
    input_errors_seen: HashSet<OperationFingerprint>,
    last_success: Option<DateTime<Utc>>,
}

impl RetryGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_before_execute(&self, fingerprint: &OperationFingerprint) -> GuardDecision {
        match self.records.get(fingerprint) {
            Some(record) if record.consecutive_failures >= BLOCK_AFTER_FAILURES => {
                debug!("Retry guard blocked {fingerprint}");
                GuardDecision::Blocked(blocked_message(&record.last_error))
            }
            _ => GuardDecision::Allow,
        }
    }

    pub fn record_failure(
        &mut self,
        fingerprint: &OperationFingerprint,
        error: &str,
    ) -> FailureState {
        let last_success = self.last_success;
        let record = self
            .records
            .entry(fingerprint.clone())
            .or_insert_with(|| OperationRecord {
                fingerprint: fingerprint.clone(),
                consecutive_failures: 0,
                last_error: String::new(),
                last_success,
            });
        record.consecutive_failures = (record.consecutive_failures + 1).min(BLOCK_AFTER_FAILURES);
        record.last_error = error.to_string();

        if record.consecutive_failures >= BLOCK_AFTER_FAILURES {
            info!("Retry guard: {fingerprint} now blocked after repeated failure");
            FailureState::Blocked {
                guidance: format!(
                    "This exact operation has now failed {BLOCK_AFTER_FAILURES} times in a row. \
                     Last error: {error}\n\
                     It is BLOCKED and will not run again as-is. Use a different approach: \
                     change the content, the target, or the command."
                ),
            }
        } else {
            debug!("Retry guard: first failure for {fingerprint}");
            FailureState::OneFailure {
                guidance: format!(
                    "Previous error: {error}\n\
                     Do not retry the identical operation. Change strategy: fix the cause \
                     shown above, or try a different operation. \
                     One more identical failure will block it."
                ),
            }
        }
    }

    /// Record an input error. Only a repeat of the same fingerprint counts
    /// toward blocking.
    pub fn record_input_error(
        &mut self,
        fingerprint: &OperationFingerprint,
        error: &str,
    ) -> Option<FailureState> {
        if self.input_errors_seen.insert(fingerprint.clone()) {
            None
        } else {
            Some(self.record_failure(fingerprint, error))
        }
    }

    /// Any success clears every fingerprint.
    pub fn record_success(&mut self, fingerprint: &OperationFingerprint) {
        if !self.records.is_empty() || !self.input_errors_seen.is_empty() {
            debug!(
                "Retry guard reset by success of {fingerprint} ({} tracked)",
                self.records.len()
            );
        }
        self.records.clear();
        self.input_errors_seen.clear();
        self.last_success = Some(Utc::now());
    }

    pub fn failures(&self, fingerprint: &OperationFingerprint) -> u8 {
        self.records
            .get(fingerprint)
            .map_or(0, |r| r.consecutive_failures)
    }

    pub fn record(&self, fingerprint: &OperationFingerprint) -> Option<&OperationRecord> {
        self.records.get(fingerprint)
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Forget everything. Called at session end.
    pub fn reset(&mut self) {
        self.records.clear();
        self.input_errors_seen.clear();
        self.last_success = None;
    }
}

fn blocked_message(last_error: &str) -> String {
    format!(
        "BLOCKED: this identical operation already failed {BLOCK_AFTER_FAILURES} times \
         (last error: {last_error}). It was not executed. \
         Choose a different strategy instead of repeating it."
    )
}
