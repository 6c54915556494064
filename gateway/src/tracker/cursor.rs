//! Activity cursor persistence.
//!
//! The cursor is rewritten after every processed operation so that a
//! restart resumes at the first operation not yet handed out.

use crate::{error::Result, objects::HistoryEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Progress through an account's operation history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCursor {
    /// Sequence number of the last processed account history entry.
    pub last_sequence: u64,

    /// Operation (`1.11.x`) of that entry.
    pub last_operation_id: String,

    /// The entry itself (`2.9.x`).
    pub most_recent_op: String,

    /// Unix timestamp of the last update.
    pub updated_at: u64,
}

impl ActivityCursor {
    /// Move past `entry`.
    pub fn advance(&mut self, entry: &HistoryEntry) {
        self.last_sequence = entry.sequence;
        self.last_operation_id = entry.operation_id.clone();
        self.most_recent_op = entry.id.clone();
        self.updated_at = chrono::Utc::now().timestamp().max(0) as u64;
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let updated = if self.updated_at > 0 {
            chrono::DateTime::from_timestamp(self.updated_at as i64, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            "never".to_string()
        };

        format!(
            "Activity cursor:\n  Last sequence: {}\n  Last operation: {}\n  History entry: {}\n  Updated: {}",
            self.last_sequence, self.last_operation_id, self.most_recent_op, updated
        )
    }
}

/// Durable home of the cursor.
pub trait CursorStore: Send + Sync {
    /// The persisted cursor, `None` before the first save.
    fn load(&self) -> Result<Option<ActivityCursor>>;

    fn save(&self, cursor: &ActivityCursor) -> Result<()>;
}

/// JSON file store.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self) -> Result<Option<ActivityCursor>> {
        if !self.path.exists() {
            tracing::info!("No cursor file at {}, starting fresh", self.path.display());
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let cursor: ActivityCursor = serde_json::from_str(&content)?;
        tracing::info!(
            "Loaded cursor: sequence={}, operation={}",
            cursor.last_sequence,
            cursor.last_operation_id
        );
        Ok(Some(cursor))
    }

    /// Write to a temp file, then rename over the old cursor.
    fn save(&self, cursor: &ActivityCursor) -> Result<()> {
        let content = serde_json::to_string_pretty(cursor)?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, &self.path)?;

        tracing::debug!("Saved cursor: sequence={}", cursor.last_sequence);
        Ok(())
    }
}

/// In-memory store that also counts writes.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    state: Mutex<(Option<ActivityCursor>, usize)>,
}

impl MemoryCursorStore {
    pub fn new(initial: Option<ActivityCursor>) -> Self {
        Self {
            state: Mutex::new((initial, 0)),
        }
    }

    pub fn current(&self) -> Option<ActivityCursor> {
        self.state.lock().0.clone()
    }

    pub fn saves(&self) -> usize {
        self.state.lock().1
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<Option<ActivityCursor>> {
        Ok(self.current())
    }

    fn save(&self, cursor: &ActivityCursor) -> Result<()> {
        let mut state = self.state.lock();
        state.0 = Some(cursor.clone());
        state.1 += 1;
        Ok(())
    }
}
