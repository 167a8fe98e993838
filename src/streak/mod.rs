//! Streak lanes.
//!
//! A lane is an independent multi-leg progression: each winning leg
//! multiplies the running total, a single loss busts the instance, and
//! reaching the configured leg count completes it. Lane variants (safe,
//! risky) are rows in a config table driving the same machine.
//!
//! State flow: `pending → in_progress → {completed | busted}`. Terminal
//! instances accept nothing further; `registry::LaneRegistry::reinitialize`
//! starts a fresh instance from the same config.

pub mod registry;
pub mod selector;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{ConfidenceScore, MarketKey, OutcomeResult, PropLineError, Result, RiskLevel, Side, Tier};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskClass {
    Safe,
    Risky,
}

impl RiskClass {
    /// Whether a scored pick clears this lane's confidence gate.
    pub fn admits(&self, score: &ConfidenceScore) -> bool {
        match self {
            RiskClass::Safe => score.tier >= Tier::Reliable && score.risk != RiskLevel::High,
            RiskClass::Risky => score.tier >= Tier::Playable,
        }
    }
}

impl fmt::Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskClass::Safe => write!(f, "safe"),
            RiskClass::Risky => write!(f, "risky"),
        }
    }
}

/// One row of the lane table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakLaneConfig {
    pub lane_id: String,
    pub name: String,
    pub risk_class: RiskClass,
    pub entry_amount: Decimal,
    pub target_amount: Decimal,
    pub max_legs: u32,
    pub base_multiplier: f64,
    /// Per-leg growth of the multiplier.
    pub risk_progression_rate: f64,
    pub multiplier_ceiling: f64,
}

impl StreakLaneConfig {
    /// Multiplier applied by winning leg `n` (0-based):
    /// `base × (1 + n × rate)`, capped at the ceiling.
    pub fn leg_multiplier(&self, n: u32) -> f64 {
        let raw = self.base_multiplier * (1.0 + n as f64 * self.risk_progression_rate);
        raw.min(self.multiplier_ceiling)
    }
}

// ---------------------------------------------------------------------------
// Legs and picks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneStatus {
    Pending,
    InProgress,
    Completed,
    Busted,
}

impl LaneStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LaneStatus::Completed | LaneStatus::Busted)
    }
}

impl fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneStatus::Pending => write!(f, "pending"),
            LaneStatus::InProgress => write!(f, "in_progress"),
            LaneStatus::Completed => write!(f, "completed"),
            LaneStatus::Busted => write!(f, "busted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegResult {
    Pending,
    Win,
    Loss,
}

/// Result reported for the pending leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegOutcome {
    Win,
    Loss,
}

/// A quoted line a lane can play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickRef {
    pub subject_id: String,
    pub market: String,
    pub side: Side,
    pub line: f64,
    /// Decimal odds.
    pub price: f64,
    pub book: String,
    pub quoted_at: DateTime<Utc>,
}

impl PickRef {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(&self.subject_id, &self.market)
    }

    /// Grade a realised value against this pick.
    pub fn grade(&self, realized_value: f64) -> OutcomeResult {
        self.side.grade(self.line, realized_value)
    }
}

impl fmt::Display for PickRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {:.1} @ {:.2} ({})",
            self.subject_id, self.market, self.side, self.line, self.price, self.book
        )
    }
}

/// A selected pick together with the score that justified it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedPick {
    pub pick: PickRef,
    pub confidence: ConfidenceScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub index: u32,
    pub pick: PickRef,
    pub confidence: ConfidenceScore,
    /// Multiplier this leg applies when won.
    pub multiplier: f64,
    pub result: LegResult,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Counters carried across instances of the same lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneStats {
    pub legs_won: u32,
    pub legs_lost: u32,
    pub best_streak: u32,
    pub completions: u32,
    pub busts: u32,
}

// ---------------------------------------------------------------------------
// Lane instance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakLane {
    pub config: StreakLaneConfig,
    pub instance_id: Uuid,
    pub current_leg: u32,
    pub total_multiplier: f64,
    pub status: LaneStatus,
    pub legs: Vec<Leg>,
    pub version: u64,
    pub stats: LaneStats,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Final state of a lane instance, written to history when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalRecord {
    pub lane_id: String,
    pub instance_id: Uuid,
    pub status: LaneStatus,
    pub legs_won: u32,
    pub total_multiplier: f64,
    #[serde(default)]
    pub payout: Option<Decimal>,
    pub legs: Vec<Leg>,
    pub closed_at: DateTime<Utc>,
}

/// Read-only view of a lane, published on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub lane_id: String,
    pub name: String,
    pub risk_class: RiskClass,
    pub instance_id: Uuid,
    pub status: LaneStatus,
    pub current_leg: u32,
    pub max_legs: u32,
    pub total_multiplier: f64,
    /// `None` when entry × multiplier is not representable.
    pub potential_payout: Option<Decimal>,
    pub target_amount: Decimal,
    pub version: u64,
    pub next_pick: Option<PreparedPick>,
    pub status_line: String,
    pub stats: LaneStats,
}

impl fmt::Display for LaneSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] leg {}/{} x{:.3} ${} {}",
            self.name,
            self.status,
            self.current_leg,
            self.max_legs,
            self.total_multiplier,
            self.potential_payout.map_or_else(|| "n/a".to_string(), |p| p.to_string()),
            self.status_line,
        )
    }
}

const GLYPH_WON: &str = "✅";
const GLYPH_LOST: &str = "❌";
const GLYPH_LOCKED: &str = "🔒";

impl StreakLane {
    /// Fresh instance holding its first prepared pick.
    pub fn new(config: StreakLaneConfig, first: PreparedPick, version: u64, stats: LaneStats) -> Self {
        let now = Utc::now();
        let multiplier = config.leg_multiplier(0);
        let lane = Self {
            config,
            instance_id: Uuid::new_v4(),
            current_leg: 0,
            total_multiplier: 1.0,
            status: LaneStatus::Pending,
            legs: vec![Leg {
                index: 0,
                pick: first.pick,
                confidence: first.confidence,
                multiplier,
                result: LegResult::Pending,
                resolved_at: None,
            }],
            version,
            stats,
            started_at: now,
            closed_at: None,
        };
        info!(
            lane = %lane.config.lane_id,
            instance = %lane.instance_id,
            version = lane.version,
            "Lane instance created"
        );
        lane
    }

    pub fn lane_id(&self) -> &str {
        &self.config.lane_id
    }

    /// The leg awaiting a result, if the lane is live.
    pub fn pending_leg(&self) -> Option<&Leg> {
        if self.status.is_terminal() {
            return None;
        }
        self.legs.last().filter(|l| l.result == LegResult::Pending)
    }

    /// Picks this instance has already played or is playing.
    pub fn used_keys(&self) -> Vec<MarketKey> {
        self.legs.iter().map(|l| l.pick.key()).collect()
    }

    /// Whether the next win would complete the lane.
    pub fn final_leg_pending(&self) -> bool {
        self.current_leg + 1 >= self.config.max_legs
    }

    /// Entry × total multiplier, rounded to cents.
    pub fn potential_payout(&self) -> Option<Decimal> {
        let potential = payout(self.config.entry_amount, self.total_multiplier);
        if potential.is_none() {
            warn!(
                lane = %self.config.lane_id,
                multiplier = self.total_multiplier,
                "Payout not representable"
            );
        }
        potential
    }

    /// True when a live lane's potential payout has reached its target.
    pub fn cash_out_ready(&self) -> bool {
        !self.status.is_terminal()
            && self
                .potential_payout()
                .map_or(false, |p| p >= self.config.target_amount)
    }

    /// Check that a transition targets this version and the pending leg.
    /// A stale version is always a conflict, even once the lane has closed.
    pub fn check_transition(&self, expected_version: u64, leg_index: Option<u32>) -> Result<()> {
        if self.version != expected_version {
            return Err(PropLineError::Conflict {
                lane_id: self.config.lane_id.clone(),
                expected: expected_version,
                actual: self.version,
            });
        }
        if self.status.is_terminal() {
            return Err(PropLineError::LaneClosed(self.config.lane_id.clone()));
        }
        if let Some(leg_index) = leg_index {
            if leg_index != self.current_leg {
                return Err(PropLineError::LegConflict {
                    lane_id: self.config.lane_id.clone(),
                    leg_index,
                    pending: self.current_leg,
                });
            }
        }
        Ok(())
    }

    /// Record a win on the pending leg. `next` must be supplied unless this
    /// was the final leg; it becomes the new pending leg.
    pub fn apply_win(&mut self, next: Option<PreparedPick>, now: DateTime<Utc>) -> Result<Option<TerminalRecord>> {
        let completes = self.final_leg_pending();
        if !completes && next.is_none() {
            return Err(PropLineError::NoCandidates(self.config.lane_id.clone()));
        }

        let multiplier = self.config.leg_multiplier(self.current_leg);
        if let Some(leg) = self.legs.last_mut() {
            leg.result = LegResult::Win;
            leg.multiplier = multiplier;
            leg.resolved_at = Some(now);
        }
        self.total_multiplier *= multiplier;
        self.current_leg += 1;
        self.version += 1;
        self.stats.legs_won += 1;
        self.stats.best_streak = self.stats.best_streak.max(self.current_leg);

        if completes {
            self.status = LaneStatus::Completed;
            self.closed_at = Some(now);
            self.stats.completions += 1;
            let record = self.terminal_record(now, self.potential_payout());
            info!(
                lane = %self.config.lane_id,
                legs = self.current_leg,
                multiplier = format!("{:.4}", self.total_multiplier),
                payout = ?record.payout,
                "Lane completed"
            );
            return Ok(Some(record));
        }

        self.status = LaneStatus::InProgress;
        if let Some(next) = next {
            self.legs.push(Leg {
                index: self.current_leg,
                multiplier: self.config.leg_multiplier(self.current_leg),
                pick: next.pick,
                confidence: next.confidence,
                result: LegResult::Pending,
                resolved_at: None,
            });
        }
        info!(
            lane = %self.config.lane_id,
            leg = self.current_leg,
            multiplier = format!("{:.4}", self.total_multiplier),
            "Leg won"
        );
        Ok(None)
    }

    /// Record a loss: the instance busts and resets its running totals.
    /// The returned record keeps the values from before the reset.
    pub fn apply_loss(&mut self, now: DateTime<Utc>) -> TerminalRecord {
        if let Some(leg) = self.legs.last_mut() {
            leg.result = LegResult::Loss;
            leg.resolved_at = Some(now);
        }
        self.status = LaneStatus::Busted;
        self.closed_at = Some(now);
        self.version += 1;
        self.stats.legs_lost += 1;
        self.stats.busts += 1;
        let record = self.terminal_record(now, None);

        info!(
            lane = %self.config.lane_id,
            legs_won = record.legs_won,
            multiplier = format!("{:.4}", record.total_multiplier),
            "Lane busted"
        );
        self.total_multiplier = 1.0;
        self.current_leg = 0;
        record
    }

    /// Complete early once the potential payout has reached the target.
    /// The pending leg is dropped from the instance.
    pub fn cash_out(&mut self, now: DateTime<Utc>) -> Result<TerminalRecord> {
        let Some(potential) = self.potential_payout() else {
            return Err(PropLineError::PayoutUnrepresentable {
                lane_id: self.config.lane_id.clone(),
                multiplier: self.total_multiplier,
            });
        };
        if potential < self.config.target_amount {
            return Err(PropLineError::CashOutNotReady {
                lane_id: self.config.lane_id.clone(),
                potential,
                target: self.config.target_amount,
            });
        }
        if self.legs.last().map_or(false, |l| l.result == LegResult::Pending) {
            self.legs.pop();
        }
        self.status = LaneStatus::Completed;
        self.closed_at = Some(now);
        self.version += 1;
        self.stats.completions += 1;
        info!(lane = %self.config.lane_id, payout = %potential, "Lane cashed out");
        Ok(self.terminal_record(now, Some(potential)))
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        let next_pick = self.pending_leg().map(|l| PreparedPick {
            pick: l.pick.clone(),
            confidence: l.confidence.clone(),
        });
        LaneSnapshot {
            lane_id: self.config.lane_id.clone(),
            name: self.config.name.clone(),
            risk_class: self.config.risk_class,
            instance_id: self.instance_id,
            status: self.status,
            current_leg: self.current_leg,
            max_legs: self.config.max_legs,
            total_multiplier: self.total_multiplier,
            potential_payout: self.potential_payout(),
            target_amount: self.config.target_amount,
            version: self.version,
            next_pick,
            status_line: self.status_line(),
            stats: self.stats,
        }
    }

    /// One glyph per leg slot: won, lost, or still locked.
    pub fn status_line(&self) -> String {
        (0..self.config.max_legs)
            .map(|i| match self.legs.get(i as usize).map(|l| l.result) {
                Some(LegResult::Win) => GLYPH_WON,
                Some(LegResult::Loss) => GLYPH_LOST,
                _ => GLYPH_LOCKED,
            })
            .collect()
    }

    fn terminal_record(&self, now: DateTime<Utc>, payout: Option<Decimal>) -> TerminalRecord {
        TerminalRecord {
            lane_id: self.config.lane_id.clone(),
            instance_id: self.instance_id,
            status: self.status,
            legs_won: self.current_leg,
            total_multiplier: self.total_multiplier,
            payout,
            legs: self.legs.clone(),
            closed_at: now,
        }
    }
}

/// Entry × multiplier, rounded to cents. `None` for a non-finite multiplier
/// or a product outside the decimal range.
pub fn payout(entry: Decimal, multiplier: f64) -> Option<Decimal> {
    let multiplier = Decimal::from_f64(multiplier)?;
    entry.checked_mul(multiplier).map(|p| p.round_dp(2))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
