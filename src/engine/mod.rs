//! Core engine.
//!
//! Wires the ledgers, the confidence engine and the lane registry
//! together. Observations and outcomes come in here; scores and lane
//! snapshots go out.

pub mod router;

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::confidence::{ConfidenceEngine, ScoreRequest};
use crate::ledger::outcomes::{OutcomeLedger, OutcomeStatus};
use crate::ledger::{ObservationStore, RecordStatus};
use crate::storage::CoreState;
use crate::streak::registry::{HistorySink, LaneRegistry};
use crate::streak::selector::{CandidateSource, PickPreparer, StoreCandidates};
use crate::streak::{LaneSnapshot, StreakLaneConfig};
use crate::types::{ConfidenceScore, ObservationRecord, Outcome, PropLineError, Result};

/// What applying one outcome did.
#[derive(Debug, Clone)]
pub struct OutcomeReport {
    pub status: OutcomeStatus,
    /// Lanes whose pending leg this outcome settled.
    pub resolved: Vec<LaneSnapshot>,
}

/// Counts from one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub created: usize,
    pub restarted: usize,
    pub resolved: usize,
    pub cashed_out: usize,
}

pub struct Core {
    config: AppConfig,
    observations: Arc<ObservationStore>,
    outcomes: Arc<OutcomeLedger>,
    confidence: Arc<ConfidenceEngine>,
    lanes: Arc<LaneRegistry>,
}

impl Core {
    /// Core whose lanes draw candidates from the observation store.
    pub fn new(config: AppConfig, history: Arc<dyn HistorySink>) -> Self {
        Self::build(config, history, None)
    }

    /// Core with an external candidate source.
    pub fn with_candidates(
        config: AppConfig,
        history: Arc<dyn HistorySink>,
        source: Arc<dyn CandidateSource>,
    ) -> Self {
        Self::build(config, history, Some(source))
    }

    fn build(config: AppConfig, history: Arc<dyn HistorySink>, source: Option<Arc<dyn CandidateSource>>) -> Self {
        let observations = Arc::new(ObservationStore::new(Duration::seconds(
            config.store.late_tolerance_secs,
        )));
        let outcomes = Arc::new(OutcomeLedger::new());
        let confidence = Arc::new(ConfidenceEngine::new(&config, observations.clone(), outcomes.clone()));
        let source: Arc<dyn CandidateSource> = match source {
            Some(source) => source,
            None => Arc::new(StoreCandidates::new(observations.clone(), outcomes.clone())),
        };
        let preparer = PickPreparer::new(confidence.clone(), source, config.streak.min_american_odds);
        let lanes = Arc::new(LaneRegistry::new(preparer, history));
        Self {
            config,
            observations,
            outcomes,
            confidence,
            lanes,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn observations(&self) -> &Arc<ObservationStore> {
        &self.observations
    }

    pub fn outcomes(&self) -> &Arc<OutcomeLedger> {
        &self.outcomes
    }

    pub fn confidence(&self) -> &Arc<ConfidenceEngine> {
        &self.confidence
    }

    pub fn lanes(&self) -> &Arc<LaneRegistry> {
        &self.lanes
    }

    /// Validate and store one feed record.
    pub fn ingest_observation(&self, record: ObservationRecord) -> Result<RecordStatus> {
        Ok(self.observations.record(record)?)
    }

    /// Record an outcome and settle any lane legs it decides.
    /// Duplicates are no-ops.
    pub async fn apply_outcome(&self, outcome: Outcome) -> OutcomeReport {
        let status = self.outcomes.record(outcome.clone());
        if status == OutcomeStatus::Duplicate {
            debug!(key = %outcome.key(), date = %outcome.date, "Duplicate outcome, nothing to route");
            return OutcomeReport {
                status,
                resolved: Vec::new(),
            };
        }
        let resolved = router::route(&self.lanes, &outcome).await;
        if !resolved.is_empty() {
            info!(key = %outcome.key(), lanes = resolved.len(), "Outcome settled lane legs");
        }
        OutcomeReport { status, resolved }
    }

    pub fn score(&self, request: &ScoreRequest) -> ConfidenceScore {
        self.confidence.score(request)
    }

    pub async fn score_many(&self, requests: Vec<ScoreRequest>) -> Vec<ConfidenceScore> {
        self.confidence.score_many(requests).await
    }

    /// Create any configured lane not yet in the registry.
    pub async fn ensure_lanes(&self, configs: &[StreakLaneConfig]) -> usize {
        let mut created = 0;
        for config in configs {
            if self.lanes.contains(&config.lane_id).await {
                continue;
            }
            match self.lanes.create(config.clone()).await {
                Ok(snapshot) => {
                    info!(lane = %snapshot.lane_id, pick = ?snapshot.next_pick.as_ref().map(|p| p.pick.to_string()), "Lane started");
                    created += 1;
                }
                Err(PropLineError::NoCandidates(id)) => {
                    debug!(lane = %id, "Lane waiting for candidates");
                }
                Err(e) => warn!(lane = %config.lane_id, error = %e, "Failed to start lane"),
            }
        }
        created
    }

    /// One maintenance pass: start missing lanes, restart finished ones
    /// (when enabled), settle pending legs from outcomes already on the
    /// ledger, and cash out lanes whose payout has reached the target.
    pub async fn maintain(&self, configs: &[StreakLaneConfig]) -> MaintenanceReport {
        let mut report = MaintenanceReport {
            created: self.ensure_lanes(configs).await,
            ..MaintenanceReport::default()
        };

        if self.config.streak.auto_restart {
            for lane_id in self.lanes.terminal_lanes().await {
                match self.lanes.reinitialize(&lane_id).await {
                    Ok(_) => report.restarted += 1,
                    Err(e) => debug!(lane = %lane_id, error = %e, "Lane not restarted"),
                }
            }
        }

        for awaiting in self.lanes.awaiting().await {
            let key = awaiting.pick.key();
            let quoted = awaiting.pick.quoted_at.date_naive();
            // Pushes leave the leg pending, so look past them
            let decisive = self.outcomes.find_on_or_after(&key, quoted, |o| {
                router::leg_outcome(&awaiting.pick, o).is_some()
            });
            if let Some(outcome) = decisive {
                report.resolved += router::route(&self.lanes, &outcome).await.len();
            }
        }

        for (lane_id, version) in self.lanes.cash_out_ready().await {
            match self.lanes.cash_out(&lane_id, version).await {
                Ok(_) => report.cashed_out += 1,
                Err(e) => debug!(lane = %lane_id, error = %e, "Lane not cashed out"),
            }
        }

        if report != MaintenanceReport::default() {
            info!(
                created = report.created,
                restarted = report.restarted,
                resolved = report.resolved,
                cashed_out = report.cashed_out,
                "Lane maintenance"
            );
        }
        report
    }

    /// Everything needed to resume after a restart.
    pub async fn export_state(&self) -> CoreState {
        CoreState {
            saved_at: Utc::now(),
            observations: self.observations.export(),
            outcomes: self.outcomes.all(),
            lanes: self.lanes.export().await,
            audit: self.confidence.audit_log(),
        }
    }

    pub async fn restore_state(&self, state: CoreState) {
        info!(
            observations = state.observations.iter().map(|(_, o)| o.len()).sum::<usize>(),
            outcomes = state.outcomes.len(),
            lanes = state.lanes.len(),
            "Restoring state"
        );
        self.observations.restore(state.observations);
        self.outcomes.restore(state.outcomes);
        self.confidence.restore_audit(state.audit);
        self.lanes.restore(state.lanes).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
