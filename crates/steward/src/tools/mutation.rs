//! Snapshot → apply → validate → commit-or-rollback for file mutations.
//!
//! Every write goes through [`MutationProtocol::apply`]. The prior content is
//! captured first, the new content is written atomically (temp file plus
//! rename), and the registered [`Validator`](crate::tools::validate::Validator)
//! for the file type runs on the result. A failed validation restores the
//! prior bytes, or removes the file and any directories the write created,
//! and is returned as an error. There is no degraded-success path.
//!
//! Moves and deletes compose on top:
//!
//! - **move**: read source → apply to destination → remove source only if the
//!   destination committed.
//! - **delete**: snapshot into the [`UndoLog`] → remove.

use crate::error::OperationError;
use crate::tools::sandbox::{PathAccess, SandboxPolicy};
use crate::tools::undo::UndoLog;
use crate::tools::validate::ValidatorRegistry;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to a sibling temp file and rename it over `path`, keeping
/// the permissions of any file already there.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(ErrorKind::InvalidInput, "path has no parent directory")
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = std::fs::write(&tmp, bytes).and_then(|()| {
        if let Ok(meta) = std::fs::metadata(path) {
            std::fs::set_permissions(&tmp, meta.permissions())?;
        }
        std::fs::rename(&tmp, path)
    });
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Outcome of a committed write or move.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReport {
    pub path: PathBuf,
    /// The target did not exist before.
    pub created: bool,
    pub bytes_written: usize,
    /// Name of the validator that passed, or `"none"`.
    pub validator: &'static str,
    /// Always false on a returned report: rollbacks are errors.
    pub rolled_back: bool,
    /// For moves: whether the source is still on disk.
    pub source_preserved: Option<bool>,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub path: PathBuf,
    pub undo_id: u64,
    pub bytes: u64,
}

pub struct MutationProtocol {
    policy: Arc<SandboxPolicy>,
    validators: ValidatorRegistry,
    undo: Arc<UndoLog>,
}

impl MutationProtocol {
    pub fn new(policy: Arc<SandboxPolicy>, undo: Arc<UndoLog>) -> Self {
        Self {
            policy,
            validators: ValidatorRegistry::default(),
            undo,
        }
    }

    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn undo_log(&self) -> &Arc<UndoLog> {
        &self.undo
    }

    /// Write `content` to `path` and keep it only if it validates.
    pub fn apply(&self, path: &str, content: &[u8]) -> Result<MutationReport, OperationError> {
        let target = self.policy.validate_path(path, PathAccess::Write)?;
        self.apply_resolved(&target, content)
    }

    fn apply_resolved(
        &self,
        target: &Path,
        content: &[u8],
    ) -> Result<MutationReport, OperationError> {
        if target.is_dir() {
            return Err(OperationError::input(format!(
                "{} is a directory",
                self.policy.display_path(target)
            )));
        }

        let prior = match std::fs::read(target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let created_dir = create_missing_parents(target)?;

        if let Err(e) = write_atomic(target, content) {
            remove_created_dirs(target, created_dir.as_deref());
            return Err(e.into());
        }

        match self.validators.validate(target, content) {
            Ok(validator) => {
                debug!(
                    "Committed {} ({} bytes, validator={validator})",
                    target.display(),
                    content.len()
                );
                Ok(MutationReport {
                    path: target.to_path_buf(),
                    created: prior.is_none(),
                    bytes_written: content.len(),
                    validator,
                    rolled_back: false,
                    source_preserved: None,
                })
            }
            Err(reason) => {
                info!("Validation failed for {}: {reason}; rolling back", target.display());
                if let Err(e) = rollback(target, prior.as_deref(), created_dir.as_deref()) {
                    error!("Rollback of {} failed: {e}", target.display());
                    return Err(OperationError::execution(format!(
                        "validation failed ({reason}) and rollback failed: {e}"
                    )));
                }
                Err(OperationError::Validation {
                    path: PathBuf::from(self.policy.display_path(target)),
                    reason,
                    source_preserved: None,
                })
            }
        }
    }

    /// Move `from` to `to`. The source is removed only after the destination
    /// has committed.
    pub fn move_file(&self, from: &str, to: &str) -> Result<MutationReport, OperationError> {
        let source = self.policy.validate_path(from, PathAccess::Delete)?;
        let dest = self.policy.validate_path(to, PathAccess::Write)?;
        if source == dest {
            return Err(OperationError::input("source and destination are the same file"));
        }

        let meta = match std::fs::symlink_metadata(&source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OperationError::input(format!("{from} does not exist")));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(OperationError::input(format!("{from} is not a regular file")));
        }
        let bytes = std::fs::read(&source)?;

        let mut report = match self.apply_resolved(&dest, &bytes) {
            Ok(report) => report,
            Err(OperationError::Validation { path, reason, .. }) => {
                return Err(OperationError::Validation {
                    path,
                    reason,
                    source_preserved: Some(true),
                });
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = std::fs::set_permissions(&dest, meta.permissions()) {
            debug!("Could not copy permissions to {}: {e}", dest.display());
        }
        report.source_preserved = Some(match std::fs::remove_file(&source) {
            Ok(()) => false,
            Err(e) => {
                warn!("Moved {} but could not remove source: {e}", source.display());
                true
            }
        });
        Ok(report)
    }

    /// Snapshot `path` into the undo log, then remove it.
    pub fn delete(&self, path: &str) -> Result<DeleteReport, OperationError> {
        let target = self.policy.validate_path(path, PathAccess::Delete)?;
        let meta = match std::fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(OperationError::input(format!("{path} does not exist")));
            }
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Err(OperationError::input(format!(
                "{path} is a directory; only files can be deleted"
            )));
        }

        let bytes = std::fs::read(&target)?;
        let size = bytes.len() as u64;
        let undo_id = self.undo.record(&target, bytes)?;
        if let Err(e) = std::fs::remove_file(&target) {
            self.undo.discard(undo_id);
            return Err(e.into());
        }
        info!("Deleted {} (undo id {undo_id})", target.display());

        Ok(DeleteReport {
            path: target,
            undo_id,
            bytes: size,
        })
    }
}

/// Create the missing ancestors of `target`. Returns the topmost directory
/// created, if any.
fn create_missing_parents(target: &Path) -> std::io::Result<Option<PathBuf>> {
    let Some(parent) = target.parent() else {
        return Ok(None);
    };
    let mut topmost = None;
    let mut cursor = Some(parent);
    while let Some(dir) = cursor {
        if dir.exists() {
            break;
        }
        topmost = Some(dir.to_path_buf());
        cursor = dir.parent();
    }
    if topmost.is_some() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(topmost)
}

/// Remove directories created for `target`, deepest first. Stops at the
/// first non-empty one.
fn remove_created_dirs(target: &Path, topmost: Option<&Path>) {
    let Some(topmost) = topmost else {
        return;
    };
    let mut cursor = target.parent();
    while let Some(dir) = cursor {
        if !dir.starts_with(topmost) || std::fs::remove_dir(dir).is_err() {
            break;
        }
        if dir == topmost {
            break;
        }
        cursor = dir.parent();
    }
}

fn rollback(target: &Path, prior: Option<&[u8]>, created_dir: Option<&Path>) -> std::io::Result<()> {
    match prior {
        Some(bytes) => write_atomic(target, bytes),
        None => {
            std::fs::remove_file(target)?;
            remove_created_dirs(target, created_dir);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxRule;
    use crate::tools::sandbox::SandboxConfig;
    use tempfile::{TempDir, tempdir};

    fn protocol() -> (TempDir, MutationProtocol) {
        let dir = tempdir().unwrap();
        let policy = Arc::new(SandboxPolicy::new(dir.path(), &SandboxConfig::default()).unwrap());
        let protocol = MutationProtocol::new(policy, Arc::new(UndoLog::in_memory()));
        (dir, protocol)
    }

    #[test]
    fn valid_write_commits() {
        let (dir, p) = protocol();
        let report = p.apply("config/app.json", br#"{"ok": true}"#).unwrap();
        assert!(report.created);
        assert_eq!(report.validator, "json");
        assert!(!report.rolled_back);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("config/app.json")).unwrap(),
            r#"{"ok": true}"#
        );
    }

    #[test]
    fn invalid_write_restores_prior_content() {
        let (dir, p) = protocol();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = p.apply("data.json", b"[1, 2").unwrap_err();
        assert!(err.is_rollback());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1, 2]");
    }

    #[test]
    fn invalid_new_file_is_removed_with_created_dirs() {
        let (dir, p) = protocol();
        let err = p.apply("deep/nested/bad.rs", b"fn main() {").unwrap_err();
        assert!(err.is_rollback());
        assert!(!dir.path().join("deep").exists());
    }

    #[test]
    fn move_commits_then_removes_source() {
        let (dir, p) = protocol();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let report = p.move_file("a.rs", "src/a.rs").unwrap();
        assert_eq!(report.source_preserved, Some(false));
        assert!(!dir.path().join("a.rs").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.rs")).unwrap(),
            "fn a() {}"
        );
    }

    #[test]
    fn failed_move_preserves_source() {
        let (dir, p) = protocol();
        std::fs::write(dir.path().join("notes.txt"), "{ not json").unwrap();
        let err = p.move_file("notes.txt", "notes.json").unwrap_err();
        match err {
            OperationError::Validation {
                source_preserved, ..
            } => assert_eq!(source_preserved, Some(true)),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(dir.path().join("notes.txt").exists());
        assert!(!dir.path().join("notes.json").exists());
    }

    #[test]
    fn delete_snapshots_into_undo_log() {
        let (dir, p) = protocol();
        std::fs::write(dir.path().join("old.txt"), "bye").unwrap();
        let report = p.delete("old.txt").unwrap();
        assert!(!dir.path().join("old.txt").exists());
        assert_eq!(p.undo_log().entries()[0].id, report.undo_id);

        p.undo_log().undo(report.undo_id, p.policy()).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("old.txt")).unwrap(), "bye");
    }

    #[test]
    fn delete_of_critical_file_refused() {
        let (dir, p) = protocol();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        match p.delete("Cargo.toml").unwrap_err() {
            OperationError::Sandbox(v) => assert_eq!(v.rule, SandboxRule::CriticalFile),
            other => panic!("expected sandbox violation, got {other:?}"),
        }
        assert!(dir.path().join("Cargo.toml").exists());
        assert!(p.undo_log().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn failed_removal_leaves_no_undo_entry() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, p) = protocol();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::write(locked.join("keep.txt"), "still here").unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Permission bits are not enforced for privileged users.
        let enforced = std::fs::write(locked.join("canary"), "").is_err();
        if enforced {
            let err = p.delete("locked/keep.txt").unwrap_err();
            assert!(matches!(err, OperationError::Io(_)), "{err:?}");
            assert!(locked.join("keep.txt").exists());
            assert!(p.undo_log().is_empty());
        }

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
