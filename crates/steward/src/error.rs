//! Error taxonomy.
//!
//! Errors are split by how far they propagate:
//!
//! - [`OperationError`] is scoped to a single requested operation. It is
//!   rendered back to the model as a tool result and never ends the turn.
//! - [`TurnError`] ends a turn and is returned from
//!   [`Orchestrator::submit_turn`](crate::agent::orchestrator::Orchestrator::submit_turn).
//! - [`StewardError`] covers setup: loading config, opening a workspace.
//!
//! [`RateLimitError`] and [`UndoError`] are returned by the rate governor and
//! the undo log respectively.

use crate::agent::events::OperationTrace;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ── Sandbox ────────────────────────────────────────────────────────

/// The specific sandbox rule a path or command broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxRule {
    /// Path resolves outside the workspace root (`..`, absolute path, symlink).
    OutsideRoot,
    /// Write or delete of a credential, key, or environment file.
    SensitiveFile,
    /// Delete of a dependency manifest or version-control metadata.
    CriticalFile,
    /// Mutation of the workspace root itself.
    WorkspaceRoot,
    /// Executable is not on the allow-list.
    CommandNotAllowed,
    /// Argument list matches a known-destructive pattern.
    DestructiveCommand,
    /// Executable name is not a bare program name.
    MalformedCommand,
}

impl fmt::Display for SandboxRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxRule::OutsideRoot => "path outside workspace",
            SandboxRule::SensitiveFile => "sensitive file",
            SandboxRule::CriticalFile => "critical project file",
            SandboxRule::WorkspaceRoot => "workspace root",
            SandboxRule::CommandNotAllowed => "command not allowed",
            SandboxRule::DestructiveCommand => "destructive command",
            SandboxRule::MalformedCommand => "malformed command",
        };
        f.write_str(s)
    }
}

/// A path or command rejected before execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{rule}: {detail}")]
pub struct SandboxViolation {
    pub rule: SandboxRule,
    pub detail: String,
}

impl SandboxViolation {
    pub fn new(rule: SandboxRule, detail: impl Into<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
        }
    }
}

// ── Operation errors ───────────────────────────────────────────────

/// Coarse classification used in operation traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    ValidationError,
    SandboxViolation,
    RetryExceeded,
    ExecutionError,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InputError => "input_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::SandboxViolation => "sandbox_violation",
            ErrorKind::RetryExceeded => "retry_exceeded",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failure of a single requested operation.
#[derive(Error, Debug)]
pub enum OperationError {
    /// Malformed or unresolvable arguments.
    #[error("invalid input: {0}")]
    Input(String),

    /// The mutation was applied, failed structural validation, and was
    /// rolled back.
    #[error("validation failed for {}: {reason} (change rolled back)", .path.display())]
    Validation {
        path: PathBuf,
        reason: String,
        /// Set for moves: whether the source file is still in place.
        source_preserved: Option<bool>,
    },

    #[error("sandbox violation: {0}")]
    Sandbox(#[from] SandboxViolation),

    /// The retry guard refused to run this fingerprint again.
    #[error("{0}")]
    RetryExceeded(String),

    /// The command ran but failed, timed out, or could not be spawned.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OperationError {
    /// Create an input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Map to the trace-level classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperationError::Input(_) => ErrorKind::InputError,
            OperationError::Validation { .. } => ErrorKind::ValidationError,
            OperationError::Sandbox(_) => ErrorKind::SandboxViolation,
            OperationError::RetryExceeded(_) => ErrorKind::RetryExceeded,
            OperationError::Execution(_) | OperationError::Io(_) => ErrorKind::ExecutionError,
            OperationError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error means a mutation was reverted.
    pub fn is_rollback(&self) -> bool {
        matches!(self, OperationError::Validation { .. })
    }
}

// ── Rate limiting ──────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Capacity would free up, but later than the configured ceiling.
    #[error("rate limit wait of {wait:?} exceeds the {max_wait:?} ceiling")]
    WaitExceeded { wait: Duration, max_wait: Duration },

    /// A single request larger than the whole per-minute token budget.
    #[error("request of ~{estimated} tokens exceeds the {ceiling} tokens/minute ceiling")]
    RequestTooLarge { estimated: u64, ceiling: u64 },

    #[error("rate limit wait cancelled")]
    Cancelled,
}

// ── Undo ───────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum UndoError {
    #[error("no undoable operation with id {0}")]
    NotFound(u64),

    #[error("cannot restore {}: a file already exists there", .0.display())]
    Conflict(PathBuf),

    #[error("sandbox violation: {0}")]
    Sandbox(#[from] SandboxViolation),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Turn errors ────────────────────────────────────────────────────

/// A condition that ends a turn without a final answer.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("empty user input")]
    EmptyInput,

    /// The rate governor could not admit the request within its ceiling.
    /// Retryable at a higher level.
    #[error("rate limited: {0}")]
    RateLimited(#[from] RateLimitError),

    /// Context could not be brought under the limit even after summarization
    /// and pruning. The conversation has been reset.
    #[error(
        "context budget exhausted: {current_tokens} tokens remain over the {max_tokens}-token limit; conversation reset"
    )]
    BudgetExhausted {
        current_tokens: usize,
        max_tokens: usize,
    },

    #[error("turn aborted after reaching the {iterations}-iteration limit")]
    IterationLimit {
        iterations: u32,
        trace: Vec<OperationTrace>,
    },

    #[error("model call failed: {0}")]
    Model(String),

    #[error("turn cancelled")]
    Cancelled { trace: Vec<OperationTrace> },
}

impl TurnError {
    /// Whether retrying the same turn later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TurnError::RateLimited(RateLimitError::RequestTooLarge { .. }) => false,
            TurnError::RateLimited(_) => true,
            TurnError::Model(e) => crate::api::retry::is_transient_error(e),
            _ => false,
        }
    }

    /// Operations that ran before the turn ended, if any were recorded.
    pub fn trace(&self) -> &[OperationTrace] {
        match self {
            TurnError::IterationLimit { trace, .. } | TurnError::Cancelled { trace } => trace,
            _ => &[],
        }
    }
}

// ── Setup errors ───────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StewardError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn workspace(msg: impl Into<String>) -> Self {
        Self::Workspace(msg.into())
    }
}

pub type StewardResult<T> = Result<T, StewardError>;

impl From<StewardError> for String {
    fn from(err: StewardError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_kinds() {
        assert_eq!(OperationError::input("x").kind(), ErrorKind::InputError);
        let v = OperationError::Validation {
            path: PathBuf::from("a.json"),
            reason: "bad".into(),
            source_preserved: None,
        };
        assert_eq!(v.kind(), ErrorKind::ValidationError);
        assert!(v.is_rollback());
        let s: OperationError = SandboxViolation::new(SandboxRule::OutsideRoot, "../x").into();
        assert_eq!(s.kind(), ErrorKind::SandboxViolation);
        assert!(!s.is_rollback());
    }

    #[test]
    fn sandbox_violation_display_names_rule() {
        let v = SandboxViolation::new(SandboxRule::SensitiveFile, ".env");
        assert_eq!(v.to_string(), "sensitive file: .env");
    }

    #[test]
    fn rate_limited_is_retryable_unless_too_large() {
        let wait = TurnError::RateLimited(RateLimitError::WaitExceeded {
            wait: Duration::from_secs(90),
            max_wait: Duration::from_secs(30),
        });
        assert!(wait.is_retryable());
        let big = TurnError::RateLimited(RateLimitError::RequestTooLarge {
            estimated: 10,
            ceiling: 5,
        });
        assert!(!big.is_retryable());
        assert!(
            !TurnError::BudgetExhausted {
                current_tokens: 10,
                max_tokens: 5
            }
            .is_retryable()
        );
    }
}
