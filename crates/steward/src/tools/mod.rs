//! Operations the model can request, and the machinery that keeps them safe.
//!
//! The model never gets raw filesystem or shell access. Each tool call is
//! parsed into a closed [`Operation`] variant and goes through the same
//! pipeline: retry-guard check, sandbox check, execution (through the
//! mutation protocol when it changes files), and retry-guard bookkeeping.
//!
//! # Submodules
//!
//! - [`operation`]: [`Operation`] variants, argument schemas, and the
//!   [`Workspace`] they apply against.
//! - [`sandbox`]: [`SandboxPolicy`] with path confinement, sensitive and
//!   critical file rules, command allow-list, destructive-pattern scan.
//! - [`mutation`]: snapshot, apply, validate, commit-or-rollback for writes,
//!   moves and deletes.
//! - [`validate`]: post-write structural [`Validator`](validate::Validator)s.
//! - [`undo`]: append-only [`UndoLog`] of deleted files.
//! - [`retry_guard`]: [`RetryGuard`] blocking repeated identical failures.
//! - [`exec`]: argument-list command runner with timeout and cancellation.
//! - [`dag`]: conflict-aware grouping of one iteration's operations into waves.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder for operation descriptions.
//! - [`reflection`]: failure text that steers the model toward a new strategy.
//! - [`core`]: argument validation, logging, and truncation helpers.

pub mod core;
pub mod dag;
pub mod exec;
pub mod mutation;
pub mod operation;
pub mod reflection;
pub mod retry_guard;
pub mod sandbox;
pub mod spec;
pub mod undo;
pub mod validate;

// Re-export commonly used items at the module level.
pub use core::{DEFAULT_MAX_RESULT_BYTES, truncate_result};
pub use mutation::{MutationProtocol, MutationReport};
pub use operation::{Operation, OperationKind, OperationOutput, Workspace};
pub use retry_guard::{GuardDecision, OperationFingerprint, RetryGuard};
pub use sandbox::{PathAccess, SandboxConfig, SandboxPolicy};
pub use undo::{UndoEntry, UndoLog};
