//! Ordered, append-only record of conversation summaries.
//!
//! With a state directory, summaries are appended to
//! `<state_dir>/summaries/<project_key>.jsonl`, one record per line. Each
//! record carries the id of the session that produced it. Later sessions on
//! the same project can reload them so earlier work stays visible.

use crate::context::summarizer::ConversationSummary;
use crate::error::StewardError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SummaryStore {
    file: Option<PathBuf>,
    summaries: Vec<ConversationSummary>,
}

/// Keep project keys usable as file names.
fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "default".into() } else { cleaned }
}

impl SummaryStore {
    pub fn in_memory() -> Self {
        Self {
            file: None,
            summaries: Vec::new(),
        }
    }

    /// Open the store for `project_key`. When `carry` is set, summaries
    /// written by earlier sessions are loaded in their original order.
    pub fn open(
        state_dir: Option<&Path>,
        project_key: &str,
        carry: bool,
    ) -> Result<Self, StewardError> {
        let Some(state_dir) = state_dir else {
            return Ok(Self::in_memory());
        };
        let dir = state_dir.join("summaries");
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{}.jsonl", sanitize_key(project_key)));

        let mut summaries = Vec::new();
        if carry && file.exists() {
            let text = std::fs::read_to_string(&file)?;
            for (n, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ConversationSummary>(line) {
                    Ok(s) => summaries.push(s),
                    Err(e) => warn!("Skipping corrupt summary line {}: {e}", n + 1),
                }
            }
            debug!("Loaded {} carried summaries from {}", summaries.len(), file.display());
        }

        Ok(Self {
            file: Some(file),
            summaries,
        })
    }

    /// Append a summary. Persisted before it becomes visible in memory, so
    /// a failed write leaves both views unchanged.
    pub fn append(&mut self, summary: ConversationSummary) -> Result<(), StewardError> {
        if let Some(file) = &self.file {
            let mut line = serde_json::to_string(&summary)?;
            line.push('\n');
            let mut f = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)?;
            f.write_all(line.as_bytes())?;
        }
        self.summaries.push(summary);
        Ok(())
    }

    /// The `max_count` most recent summaries, most recent last.
    pub fn summaries_for_prompt(&self, max_count: usize) -> Vec<&ConversationSummary> {
        let start = self.summaries.len().saturating_sub(max_count);
        self.summaries[start..].iter().collect()
    }

    pub fn all(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::summarizer::ExtractedFacts;
    use chrono::Utc;

    fn summary(session: &str, first: u64, last: u64) -> ConversationSummary {
        ConversationSummary {
            session_id: session.into(),
            first_ordinal: first,
            last_ordinal: last,
            text: format!("covered {first}-{last}"),
            facts: ExtractedFacts::default(),
            tokens_before: 100,
            tokens_after: 10,
            created_at: Utc::now(),
            generated: false,
        }
    }

    #[test]
    fn prompt_selection_is_most_recent_last() {
        let mut store = SummaryStore::in_memory();
        for i in 0..4 {
            store.append(summary("s", i * 10, i * 10 + 9)).unwrap();
        }
        let picked: Vec<u64> = store
            .summaries_for_prompt(2)
            .iter()
            .map(|s| s.first_ordinal)
            .collect();
        assert_eq!(picked, vec![20, 30]);
        assert_eq!(store.summaries_for_prompt(10).len(), 4);
    }

    #[test]
    fn persisted_summaries_carry_across_sessions() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = SummaryStore::open(Some(dir.path()), "my project", true).unwrap();
            store.append(summary("ss-a", 0, 9)).unwrap();
            store.append(summary("ss-a", 10, 19)).unwrap();
        }
        assert!(dir.path().join("summaries/my_project.jsonl").exists());

        let carried = SummaryStore::open(Some(dir.path()), "my project", true).unwrap();
        assert_eq!(carried.len(), 2);
        assert_eq!(carried.all()[1].first_ordinal, 10);
        assert_eq!(carried.all()[0].session_id, "ss-a");

        let fresh = SummaryStore::open(Some(dir.path()), "my project", false).unwrap();
        assert!(fresh.is_empty());
    }
}
