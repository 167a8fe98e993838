//! Lane registry.
//!
//! Keyed store of live lanes with optimistic concurrency. Each lane sits
//! behind its own async mutex, so transitions on one lane never wait on
//! another. Callers pass the version they last saw; a mismatch is a
//! conflict rather than a silent overwrite.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info};

use crate::streak::selector::PickPreparer;
use crate::streak::{LaneSnapshot, LaneStats, LegOutcome, PickRef, StreakLane, StreakLaneConfig, TerminalRecord};
use crate::types::{PropLineError, Result};

/// Where terminal lane records go.
#[cfg_attr(test, mockall::automock)]
pub trait HistorySink: Send + Sync {
    fn append(&self, record: &TerminalRecord) -> anyhow::Result<()>;
}

/// Keeps terminal records in memory.
#[derive(Default)]
pub struct MemoryHistory {
    records: parking_lot::Mutex<Vec<TerminalRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TerminalRecord> {
        self.records.lock().clone()
    }
}

impl HistorySink for MemoryHistory {
    fn append(&self, record: &TerminalRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// A lane waiting on the result of its pending leg.
#[derive(Debug, Clone)]
pub struct AwaitingLeg {
    pub lane_id: String,
    pub version: u64,
    pub leg_index: u32,
    pub pick: PickRef,
}

type LaneCell = Arc<Mutex<StreakLane>>;

pub struct LaneRegistry {
    lanes: RwLock<HashMap<String, LaneCell>>,
    preparer: PickPreparer,
    history: Arc<dyn HistorySink>,
    updates: broadcast::Sender<LaneSnapshot>,
}

impl LaneRegistry {
    pub fn new(preparer: PickPreparer, history: Arc<dyn HistorySink>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            lanes: RwLock::new(HashMap::new()),
            preparer,
            history,
            updates,
        }
    }

    /// Receive a snapshot after every successful transition.
    pub fn subscribe(&self) -> broadcast::Receiver<LaneSnapshot> {
        self.updates.subscribe()
    }

    /// Create a lane from its config, preparing the first pick.
    pub async fn create(&self, config: StreakLaneConfig) -> Result<LaneSnapshot> {
        let mut lanes = self.lanes.write().await;
        if lanes.contains_key(&config.lane_id) {
            return Err(PropLineError::Config(format!("lane {} already exists", config.lane_id)));
        }
        let first = self.preparer.prepare(&config, &[])?;
        let lane_id = config.lane_id.clone();
        let lane = StreakLane::new(config, first, 1, LaneStats::default());
        let snapshot = lane.snapshot();
        lanes.insert(lane_id, Arc::new(Mutex::new(lane)));
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Report the result of the pending leg.
    pub async fn resolve_leg(
        &self,
        lane_id: &str,
        expected_version: u64,
        leg_index: u32,
        outcome: LegOutcome,
    ) -> Result<LaneSnapshot> {
        let cell = self.cell(lane_id).await?;
        let mut lane = cell.lock().await;
        lane.check_transition(expected_version, Some(leg_index))?;

        let now = Utc::now();
        let terminal = match outcome {
            LegOutcome::Win => {
                let next = if lane.final_leg_pending() {
                    None
                } else {
                    Some(self.preparer.prepare(&lane.config, &lane.used_keys())?)
                };
                lane.apply_win(next, now)?
            }
            LegOutcome::Loss => Some(lane.apply_loss(now)),
        };

        if let Some(record) = terminal {
            self.archive(&record);
        }
        let snapshot = lane.snapshot();
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Complete a lane early at its current payout.
    pub async fn cash_out(&self, lane_id: &str, expected_version: u64) -> Result<TerminalRecord> {
        let cell = self.cell(lane_id).await?;
        let mut lane = cell.lock().await;
        lane.check_transition(expected_version, None)?;
        let record = lane.cash_out(Utc::now())?;
        self.archive(&record);
        self.publish(&lane.snapshot());
        Ok(record)
    }

    /// Start a new instance of a terminal lane.
    pub async fn reinitialize(&self, lane_id: &str) -> Result<LaneSnapshot> {
        let cell = self.cell(lane_id).await?;
        let mut lane = cell.lock().await;
        if !lane.status.is_terminal() {
            return Err(PropLineError::LaneActive(lane_id.to_string()));
        }
        let first = self.preparer.prepare(&lane.config, &[])?;
        *lane = StreakLane::new(lane.config.clone(), first, lane.version + 1, lane.stats);
        let snapshot = lane.snapshot();
        self.publish(&snapshot);
        Ok(snapshot)
    }

    pub async fn snapshot(&self, lane_id: &str) -> Result<LaneSnapshot> {
        let cell = self.cell(lane_id).await?;
        let lane = cell.lock().await;
        Ok(lane.snapshot())
    }

    /// Snapshots of every lane, ordered by id.
    pub async fn snapshots(&self) -> Vec<LaneSnapshot> {
        let mut out = Vec::new();
        for cell in self.cells().await {
            out.push(cell.lock().await.snapshot());
        }
        out.sort_by(|a, b| a.lane_id.cmp(&b.lane_id));
        out
    }

    /// Lanes with a pending leg.
    pub async fn awaiting(&self) -> Vec<AwaitingLeg> {
        let mut out = Vec::new();
        for cell in self.cells().await {
            let lane = cell.lock().await;
            if let Some(leg) = lane.pending_leg() {
                out.push(AwaitingLeg {
                    lane_id: lane.lane_id().to_string(),
                    version: lane.version,
                    leg_index: leg.index,
                    pick: leg.pick.clone(),
                });
            }
        }
        out.sort_by(|a, b| a.lane_id.cmp(&b.lane_id));
        out
    }

    /// Live lanes whose potential payout has reached the target, with the
    /// version to cash out against.
    pub async fn cash_out_ready(&self) -> Vec<(String, u64)> {
        let mut out = Vec::new();
        for cell in self.cells().await {
            let lane = cell.lock().await;
            if lane.cash_out_ready() {
                out.push((lane.lane_id().to_string(), lane.version));
            }
        }
        out.sort();
        out
    }

    /// Ids of lanes whose current instance has ended.
    pub async fn terminal_lanes(&self) -> Vec<String> {
        let mut out = Vec::new();
        for cell in self.cells().await {
            let lane = cell.lock().await;
            if lane.status.is_terminal() {
                out.push(lane.lane_id().to_string());
            }
        }
        out.sort();
        out
    }

    pub async fn contains(&self, lane_id: &str) -> bool {
        self.lanes.read().await.contains_key(lane_id)
    }

    /// Full lane state, for persistence.
    pub async fn export(&self) -> Vec<StreakLane> {
        let mut out = Vec::new();
        for cell in self.cells().await {
            out.push(cell.lock().await.clone());
        }
        out.sort_by(|a, b| a.config.lane_id.cmp(&b.config.lane_id));
        out
    }

    /// Load persisted lanes, replacing any with the same id.
    pub async fn restore(&self, lanes: Vec<StreakLane>) {
        let mut map = self.lanes.write().await;
        for lane in lanes {
            info!(lane = %lane.lane_id(), status = %lane.status, version = lane.version, "Lane restored");
            map.insert(lane.lane_id().to_string(), Arc::new(Mutex::new(lane)));
        }
    }

    async fn cell(&self, lane_id: &str) -> Result<LaneCell> {
        self.lanes
            .read()
            .await
            .get(lane_id)
            .cloned()
            .ok_or_else(|| PropLineError::LaneNotFound(lane_id.to_string()))
    }

    async fn cells(&self) -> Vec<LaneCell> {
        self.lanes.read().await.values().cloned().collect()
    }

    fn archive(&self, record: &TerminalRecord) {
        if let Err(e) = self.history.append(record) {
            error!(lane = %record.lane_id, error = %e, "Failed to append terminal record");
        }
    }

    fn publish(&self, snapshot: &LaneSnapshot) {
        if self.updates.send(snapshot.clone()).is_err() {
            debug!(lane = %snapshot.lane_id, "No snapshot subscribers");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
