//! Append-only undo log for deleted files.
//!
//! Every delete snapshots the file's bytes under a monotonically increasing
//! operation id before removing it. With a state directory the log survives
//! restarts:
//!
//! ```text
//! <state_dir>/undo/log.jsonl            one record per line
//! <state_dir>/undo/snapshots/<id>.bin   raw bytes of the deleted file
//! ```
//!
//! Restores append a `restored` record instead of rewriting history, and a
//! delete that fails after its snapshot appends `discarded`. Each
//! record is written with a single `write_all` under the append lock, so
//! concurrent deletes never interleave bytes within a line.

use crate::error::{StewardError, UndoError};
use crate::tools::mutation::write_atomic;
use crate::tools::sandbox::{PathAccess, SandboxPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum UndoRecord {
    Snapshot {
        id: u64,
        path: PathBuf,
        size: u64,
        at: DateTime<Utc>,
    },
    Restored {
        id: u64,
        at: DateTime<Utc>,
    },
    /// The delete never happened; the snapshot is void.
    Discarded {
        id: u64,
        at: DateTime<Utc>,
    },
}

/// One undoable delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoEntry {
    pub id: u64,
    pub path: PathBuf,
    pub size: u64,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Stored {
    entry: UndoEntry,
    /// Held in memory only when nothing is persisted.
    bytes: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct UndoLog {
    dir: Option<PathBuf>,
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Stored>>,
    append_lock: Mutex<()>,
}

impl UndoLog {
    /// A log that lives only as long as this value.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            next_id: AtomicU64::new(1),
            entries: Mutex::new(BTreeMap::new()),
            append_lock: Mutex::new(()),
        }
    }

    /// Open (or create) the log under `state_dir/undo`, replaying existing
    /// records so ids continue where they left off.
    pub fn open(state_dir: &Path) -> Result<Self, StewardError> {
        let dir = state_dir.join("undo");
        std::fs::create_dir_all(dir.join("snapshots"))?;

        let mut entries = BTreeMap::new();
        let mut max_id = 0;
        let log_path = dir.join("log.jsonl");
        if log_path.exists() {
            let text = std::fs::read_to_string(&log_path)?;
            for (n, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<UndoRecord>(line) {
                    Ok(UndoRecord::Snapshot { id, path, size, at }) => {
                        max_id = max_id.max(id);
                        entries.insert(
                            id,
                            Stored {
                                entry: UndoEntry {
                                    id,
                                    path,
                                    size,
                                    deleted_at: at,
                                },
                                bytes: None,
                            },
                        );
                    }
                    Ok(UndoRecord::Restored { id, .. } | UndoRecord::Discarded { id, .. }) => {
                        max_id = max_id.max(id);
                        entries.remove(&id);
                    }
                    Err(e) => warn!("Skipping corrupt undo log line {}: {e}", n + 1),
                }
            }
        }
        debug!("Undo log opened: {} entries, next id {}", entries.len(), max_id + 1);

        Ok(Self {
            dir: Some(dir),
            next_id: AtomicU64::new(max_id + 1),
            entries: Mutex::new(entries),
            append_lock: Mutex::new(()),
        })
    }

    fn snapshot_path(&self, id: u64) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|d| d.join("snapshots").join(format!("{id:08}.bin")))
    }

    fn append(&self, record: &UndoRecord) -> std::io::Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let mut line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        line.push('\n');
        let _guard = self.append_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("log.jsonl"))?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Snapshot `bytes` as the prior content of `path`. Must complete before
    /// the file is removed.
    pub fn record(&self, path: &Path, bytes: Vec<u8>) -> std::io::Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let deleted_at = Utc::now();
        let size = bytes.len() as u64;

        let in_memory = match self.snapshot_path(id) {
            Some(snapshot) => {
                write_atomic(&snapshot, &bytes)?;
                self.append(&UndoRecord::Snapshot {
                    id,
                    path: path.to_path_buf(),
                    size,
                    at: deleted_at,
                })?;
                None
            }
            None => Some(bytes),
        };

        let entry = UndoEntry {
            id,
            path: path.to_path_buf(),
            size,
            deleted_at,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Stored { entry, bytes: in_memory });
        debug!("Undo snapshot {id} for {} ({size} bytes)", path.display());
        Ok(id)
    }

    /// Void the snapshot `id` because its file was not removed after all.
    pub fn discard(&self, id: u64) {
        if self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_none()
        {
            return;
        }
        if let Err(e) = self.append(&UndoRecord::Discarded { id, at: Utc::now() }) {
            warn!("Failed to record discarded undo entry {id}: {e}");
        }
        if let Some(snapshot) = self.snapshot_path(id)
            && let Err(e) = std::fs::remove_file(&snapshot)
        {
            debug!("Failed to remove undo snapshot {}: {e}", snapshot.display());
        }
        debug!("Undo snapshot {id} discarded");
    }

    /// Undoable operations, oldest first.
    pub fn entries(&self) -> Vec<UndoEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.entry.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore the file deleted by operation `id`.
    ///
    /// Refuses to overwrite a file that has since been re-created.
    pub fn undo(&self, id: u64, policy: &SandboxPolicy) -> Result<UndoEntry, UndoError> {
        let (entry, bytes) = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let stored = entries.get(&id).ok_or(UndoError::NotFound(id))?;
            (stored.entry.clone(), stored.bytes.clone())
        };

        let target = policy.validate_path(&entry.path.to_string_lossy(), PathAccess::Write)?;
        if target.symlink_metadata().is_ok() {
            return Err(UndoError::Conflict(target));
        }

        let bytes = match (bytes, self.snapshot_path(id)) {
            (Some(bytes), _) => bytes,
            (None, Some(snapshot)) => std::fs::read(&snapshot)?,
            (None, None) => return Err(UndoError::NotFound(id)),
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&target, &bytes)?;
        self.append(&UndoRecord::Restored { id, at: Utc::now() })?;

        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(snapshot) = self.snapshot_path(id)
            && let Err(e) = std::fs::remove_file(&snapshot)
        {
            warn!("Failed to remove undo snapshot {}: {e}", snapshot.display());
        }

        info!("Undo {id}: restored {}", target.display());
        Ok(entry)
    }
}
