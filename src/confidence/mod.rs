//! Confidence engine.
//!
//! Fuses a subject/market's hit record, line drift, trap findings and
//! market stability into a calibrated score in [0, 1] with a tier, a
//! risk level and tags explaining every contribution.
//!
//! Scoring reads the ledgers but never writes to them. Each score is
//! appended to a bounded audit log, which calibration later joins with
//! realised outcomes.

pub mod calibration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::analysis::drift::{DriftAnalyzer, DriftReport};
use crate::analysis::trap::{CompositeCatalog, CompositeTrap, ComponentQuote, JuiceTrap, TrapDetector};
use crate::config::{AppConfig, ConfidenceConfig};
use crate::ledger::outcomes::OutcomeLedger;
use crate::ledger::{ObservationStore, TimeWindow};
use crate::types::{
    ConfidenceScore, Direction, HitRecord, MarketKey, OutcomeResult, ReasonTag, RiskLevel, Side,
    Tier,
};
use calibration::{CalibrationPoint, CalibrationReport, Calibrator};

/// A request to score one side of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub key: MarketKey,
    pub side: Side,
    /// Score as of this instant (defaults to now).
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

impl ScoreRequest {
    pub fn new(key: MarketKey, side: Side) -> Self {
        Self { key, side, as_of: None }
    }
}

/// Everything the score formula consumes.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub key: MarketKey,
    pub side: Side,
    pub hits: HitRecord,
    pub drift: DriftReport,
    pub composite: Option<&'a CompositeTrap>,
    pub juice: Option<&'a JuiceTrap>,
    pub as_of: DateTime<Utc>,
}

/// One audited score, with the line it was computed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub score: ConfidenceScore,
    pub line: Option<f64>,
}

pub struct ConfidenceEngine {
    config: ConfidenceConfig,
    drift: DriftAnalyzer,
    traps: TrapDetector,
    catalog: CompositeCatalog,
    lookback: Duration,
    observations: Arc<ObservationStore>,
    outcomes: Arc<OutcomeLedger>,
    audit: Mutex<VecDeque<AuditEntry>>,
}

impl ConfidenceEngine {
    pub fn new(
        config: &AppConfig,
        observations: Arc<ObservationStore>,
        outcomes: Arc<OutcomeLedger>,
    ) -> Self {
        Self {
            config: config.confidence.clone(),
            drift: DriftAnalyzer::new(config.drift.clone()),
            traps: TrapDetector::new(config.trap.clone()),
            catalog: CompositeCatalog::new(&config.composites),
            lookback: Duration::hours(config.drift.lookback_hours),
            observations,
            outcomes,
            audit: Mutex::new(VecDeque::with_capacity(config.confidence.audit_capacity)),
        }
    }

    /// Score a request and append the result to the audit log.
    pub fn score(&self, request: &ScoreRequest) -> ConfidenceScore {
        let score = self.evaluate(request, true);
        let line = self
            .observations
            .latest(&request.key, request.side)
            .map(|o| o.line);
        self.record_audit(&score, line);
        score
    }

    /// Full score with the composite check, left out of the audit log.
    /// Callers that act on one of several assessed scores audit it with
    /// [`record_audit`](Self::record_audit).
    pub fn assess(&self, request: &ScoreRequest) -> ConfidenceScore {
        let score = self.evaluate(request, true);
        debug!(
            key = %score.key,
            side = %score.side,
            score = format!("{:.3}", score.score),
            "Confidence assessed"
        );
        score
    }

    /// Append a score, with the line it was computed against, to the audit log.
    pub fn record_audit(&self, score: &ConfidenceScore, line: Option<f64>) {
        self.push_audit(AuditEntry {
            score: score.clone(),
            line,
        });
        info!(
            key = %score.key,
            side = %score.side,
            score = format!("{:.3}", score.score),
            tier = %score.tier,
            risk = %score.risk,
            "Confidence scored"
        );
    }

    /// Score without the composite check and without auditing. This is the
    /// standalone confidence used for composite components.
    pub fn score_standalone(&self, request: &ScoreRequest) -> ConfidenceScore {
        self.evaluate(request, false)
    }

    /// Score many requests on blocking worker tasks. Results keep request
    /// order, one per request; a failed task yields an unavailable score.
    pub async fn score_many(self: &Arc<Self>, requests: Vec<ScoreRequest>) -> Vec<ConfidenceScore> {
        let total = requests.len();
        let targets: Vec<(MarketKey, Side, Option<DateTime<Utc>>)> = requests
            .iter()
            .map(|r| (r.key.clone(), r.side, r.as_of))
            .collect();
        let mut set = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let engine = Arc::clone(self);
            set.spawn_blocking(move || (index, engine.score(&request)));
        }

        let mut slots: Vec<Option<ConfidenceScore>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, score)) => slots[index] = Some(score),
                Err(e) => error!(error = %e, "Scoring task failed"),
            }
        }
        debug!(requests = total, "Batch scoring complete");
        fill_unavailable(slots, targets)
    }

    /// Pure score formula.
    pub fn compute(&self, inputs: ScoreInputs<'_>) -> ConfidenceScore {
        let cfg = &self.config;
        let mut tags = BTreeSet::new();

        let attempts = inputs.hits.attempts() as f64;
        let mut score = (inputs.hits.wins as f64 + cfg.prior_wins)
            / (attempts + cfg.prior_wins + cfg.prior_losses);
        if inputs.hits.attempts() == 0 {
            tags.insert(ReasonTag::PriorOnly);
        } else if inputs.hits.attempts() < cfg.thin_history_attempts {
            tags.insert(ReasonTag::ThinHistory);
        }

        let drift = &inputs.drift;
        tags.insert(match drift.direction {
            Direction::Rising => ReasonTag::Rising,
            Direction::Falling => ReasonTag::Falling,
            Direction::Stable => ReasonTag::Stable,
        });
        if drift.clv > 0.0 {
            tags.insert(ReasonTag::ClvPositive);
        } else if drift.clv < 0.0 {
            tags.insert(ReasonTag::ClvNegative);
        }
        match drift.direction {
            Direction::Rising if drift.clv > 0.0 => score += cfg.drift_weight,
            Direction::Falling if drift.clv < 0.0 => score -= cfg.drift_weight,
            _ => {}
        }

        score += cfg.stability_weight * drift.stability;
        if drift.stability >= 0.7 {
            tags.insert(ReasonTag::StableMarket);
        } else if drift.stability < 0.3 && !drift.insufficient {
            tags.insert(ReasonTag::VolatileMarket);
        }
        if drift.late_arrivals {
            tags.insert(ReasonTag::LateArrivals);
        }

        if inputs.composite.is_some() {
            score -= cfg.composite_trap_penalty;
            tags.insert(ReasonTag::TrapComposite);
        }
        if inputs.juice.is_some() {
            score -= cfg.juice_trap_penalty;
            tags.insert(ReasonTag::TrapJuice);
        }

        let score = score.clamp(0.0, 1.0);
        let trapped = tags.iter().any(ReasonTag::is_trap);
        let risk = if trapped || drift.stability < 0.3 {
            RiskLevel::High
        } else if drift.stability >= 0.7 {
            RiskLevel::Low
        } else {
            RiskLevel::Medium
        };

        ConfidenceScore {
            key: inputs.key,
            side: inputs.side,
            score,
            tier: Tier::from_score(score),
            risk,
            tags,
            direction: drift.direction,
            clv: drift.clv,
            stability: drift.stability,
            substitute: inputs.composite.map(|t| t.substitute.clone()),
            computed_at: inputs.as_of,
        }
    }

    /// Most recent audited scores, newest last.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().iter().cloned().collect()
    }

    /// Reload a persisted audit log, keeping only the newest entries.
    pub fn restore_audit(&self, entries: Vec<AuditEntry>) {
        for entry in entries {
            self.push_audit(entry);
        }
    }

    /// Join audited scores with realised outcomes.
    pub fn calibration(&self) -> CalibrationReport {
        let mut calibrator = Calibrator::new();
        for entry in self.audit.lock().iter() {
            let score = &entry.score;
            let date = score.computed_at.date_naive();
            let Some(outcome) = self.outcomes.get(&score.key, date) else {
                continue;
            };
            let result = match entry.line {
                Some(line) => score.side.grade(line, outcome.realized_value),
                None => outcome.result.for_side(score.side),
            };
            let hit = match result {
                OutcomeResult::Win => true,
                OutcomeResult::Loss => false,
                OutcomeResult::Push => continue,
            };
            calibrator.add_point(CalibrationPoint {
                key: score.key.clone(),
                tier: score.tier,
                score: score.score,
                hit,
            });
        }
        calibrator.report()
    }

    pub fn catalog(&self) -> &CompositeCatalog {
        &self.catalog
    }

    fn evaluate(&self, request: &ScoreRequest, composite_check: bool) -> ConfidenceScore {
        let as_of = request.as_of.unwrap_or_else(Utc::now);
        let window = self
            .observations
            .query(&request.key, TimeWindow::lookback(as_of, self.lookback));
        let drift = self.drift.analyze(&window, request.side);
        let juice = self.traps.check_juice(&window);
        let composite = if composite_check && request.side == Side::Over {
            self.check_composite(&request.key, as_of)
        } else {
            None
        };

        self.compute(ScoreInputs {
            key: request.key.clone(),
            side: request.side,
            hits: self.outcomes.hit_record(&request.key).for_side(request.side),
            drift,
            composite: composite.as_ref(),
            juice: juice.as_ref(),
            as_of,
        })
    }

    fn check_composite(&self, key: &MarketKey, as_of: DateTime<Utc>) -> Option<CompositeTrap> {
        let components = self.catalog.components(&key.market)?;
        let compound = self.observations.latest(key, Side::Over)?;

        let mut quotes = Vec::with_capacity(components.len());
        for market in components {
            let component_key = MarketKey::new(&key.subject_id, market);
            let Some(latest) = self.observations.latest(&component_key, Side::Over) else {
                debug!(key = %key, missing = %market, "No decomposition: component unquoted");
                return None;
            };
            let standalone = self.score_standalone(&ScoreRequest {
                key: component_key,
                side: Side::Over,
                as_of: Some(as_of),
            });
            quotes.push(ComponentQuote {
                market: market.clone(),
                line: latest.line,
                confidence: standalone.score,
            });
        }

        self.traps
            .check_composite(compound.line, compound.price, components.len(), &quotes)
    }

    fn push_audit(&self, entry: AuditEntry) {
        let mut audit = self.audit.lock();
        while audit.len() >= self.config.audit_capacity.max(1) {
            audit.pop_front();
        }
        audit.push_back(entry);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Replace empty slots with unavailable scores for the matching request.
fn fill_unavailable(
    slots: Vec<Option<ConfidenceScore>>,
    targets: Vec<(MarketKey, Side, Option<DateTime<Utc>>)>,
) -> Vec<ConfidenceScore> {
    slots
        .into_iter()
        .zip(targets)
        .map(|(slot, (key, side, as_of))| {
            slot.unwrap_or_else(|| {
                warn!(key = %key, side = %side, "Score unavailable");
                ConfidenceScore::unavailable(key, side, as_of.unwrap_or_else(Utc::now))
            })
        })
        .collect()
}
