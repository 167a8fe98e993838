//! Persistence layer.
//!
//! - Core state (ledgers, lanes, audit log) saved to and loaded from a
//!   single JSON file.
//! - Terminal lane records appended to a JSON-lines history file.
//! - Feed inboxes: JSON-lines files drained once per tick.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::confidence::AuditEntry;
use crate::streak::registry::HistorySink;
use crate::streak::{StreakLane, TerminalRecord};
use crate::types::{MarketKey, Observation, Outcome};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "propline_state.json";

// ---------------------------------------------------------------------------
// Core state
// ---------------------------------------------------------------------------

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreState {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub observations: Vec<(MarketKey, Vec<Observation>)>,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
    #[serde(default)]
    pub lanes: Vec<StreakLane>,
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

/// Save core state to a JSON file.
pub fn save_state(state: &CoreState, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise core state")?;

    std::fs::write(path, &json).context(format!("Failed to write state to {path}"))?;

    debug!(path, lanes = state.lanes.len(), outcomes = state.outcomes.len(), "State saved");
    Ok(())
}

/// Load core state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<CoreState>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let state: CoreState =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        saved_at = %state.saved_at,
        lanes = state.lanes.len(),
        outcomes = state.outcomes.len(),
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lane history
// ---------------------------------------------------------------------------

/// Appends terminal lane records as JSON lines.
pub struct JsonlHistory {
    path: String,
    lock: parking_lot::Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lock: parking_lot::Mutex::new(()),
        }
    }

    /// Read back every record in the file.
    pub fn read_all(&self) -> Result<Vec<TerminalRecord>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context(format!("Failed to read history from {}", self.path))?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("Malformed history line"))
            .collect()
    }
}

impl HistorySink for JsonlHistory {
    fn append(&self, record: &TerminalRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("Failed to serialise terminal record")?;
        let _guard = self.lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context(format!("Failed to open history file {}", self.path))?;
        writeln!(file, "{line}").context(format!("Failed to append to {}", self.path))?;
        debug!(path = %self.path, lane = %record.lane_id, status = %record.status, "Terminal record appended");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Inboxes
// ---------------------------------------------------------------------------

/// Records read from one inbox drain.
#[derive(Debug)]
pub struct InboxBatch<T> {
    pub records: Vec<T>,
    /// Lines that failed to parse.
    pub malformed: usize,
}

impl<T> Default for InboxBatch<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            malformed: 0,
        }
    }
}

/// Take everything currently in a JSON-lines inbox.
///
/// The file is moved aside before reading so that writers appending
/// concurrently start a fresh inbox instead of losing lines.
pub fn drain_inbox<T: DeserializeOwned>(path: &str) -> Result<InboxBatch<T>> {
    if !Path::new(path).exists() {
        return Ok(InboxBatch::default());
    }

    let claimed = format!("{path}.{}.draining", uuid::Uuid::new_v4());
    std::fs::rename(path, &claimed).context(format!("Failed to claim inbox {path}"))?;
    let contents =
        std::fs::read_to_string(&claimed).context(format!("Failed to read inbox {claimed}"))?;

    let mut batch = InboxBatch::default();
    for (n, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(path, line = n + 1, error = %e, "Skipping malformed inbox line");
                batch.malformed += 1;
            }
        }
    }

    std::fs::remove_file(&claimed).context(format!("Failed to remove drained inbox {claimed}"))?;
    if !batch.records.is_empty() || batch.malformed > 0 {
        debug!(path, records = batch.records.len(), malformed = batch.malformed, "Inbox drained");
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
