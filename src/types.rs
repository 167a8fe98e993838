//! Shared types for PropLine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that ledger, analysis, confidence
//! and streak modules can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Market identity
// ---------------------------------------------------------------------------

/// Identifies one line stream: a subject (player/team) on one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub subject_id: String,
    pub market: String,
}

impl MarketKey {
    pub fn new(subject_id: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            market: market.into(),
        }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.subject_id, self.market)
    }
}

/// Side of a two-sided market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Over,
    Under,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Over => Side::Under,
            Side::Under => Side::Over,
        }
    }

    /// Grade a realised value against a line from this side's point of view.
    pub fn grade(&self, line: f64, realized_value: f64) -> OutcomeResult {
        if realized_value == line {
            return OutcomeResult::Push;
        }
        let over_hit = realized_value > line;
        match (self, over_hit) {
            (Side::Over, true) | (Side::Under, false) => OutcomeResult::Win,
            _ => OutcomeResult::Loss,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Over => write!(f, "OVER"),
            Side::Under => write!(f, "UNDER"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "over" | "o" | "more" | "higher" => Ok(Side::Over),
            "under" | "u" | "less" | "lower" => Ok(Side::Under),
            _ => Err(anyhow::anyhow!("Unknown side: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// A raw line observation as delivered by the feed. `line` is optional so
/// that records with a missing line can be rejected instead of failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub subject_id: String,
    pub market: String,
    pub book: String,
    pub side: Side,
    #[serde(default)]
    pub line: Option<f64>,
    /// Decimal odds (e.g. 1.91 for -110).
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// A validated, stored line observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub subject_id: String,
    pub market: String,
    pub book: String,
    pub side: Side,
    pub line: f64,
    /// Decimal odds (always >= 1.0 once stored).
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// Arrived after a later observation for the same key, within tolerance.
    #[serde(default)]
    pub late: bool,
}

impl Observation {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(&self.subject_id, &self.market)
    }

    /// Implied probability of this quote (1 / decimal price).
    pub fn implied_probability(&self) -> f64 {
        crate::analysis::odds::implied_probability(self.price)
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} {:.1} @ {:.2} ({:.1}%)",
            self.book,
            self.subject_id,
            self.market,
            self.side,
            self.line,
            self.price,
            self.implied_probability() * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Graded result of a subject/market on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeResult {
    Win,
    Loss,
    Push,
}

impl fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeResult::Win => write!(f, "WIN"),
            OutcomeResult::Loss => write!(f, "LOSS"),
            OutcomeResult::Push => write!(f, "PUSH"),
        }
    }
}

impl OutcomeResult {
    /// Results are graded for the Over side; flip them for Under.
    pub fn for_side(self, side: Side) -> Self {
        match (side, self) {
            (Side::Under, OutcomeResult::Win) => OutcomeResult::Loss,
            (Side::Under, OutcomeResult::Loss) => OutcomeResult::Win,
            (_, result) => result,
        }
    }
}

/// A realised outcome. Written once per (subject, market, date).
/// `result` is graded from the Over side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub subject_id: String,
    pub market: String,
    pub date: NaiveDate,
    pub realized_value: f64,
    pub result: OutcomeResult,
}

impl Outcome {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(&self.subject_id, &self.market)
    }
}

/// Win/loss/push tally for one subject/market.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    pub wins: u32,
    pub losses: u32,
    pub pushes: u32,
}

impl HitRecord {
    /// Graded attempts (pushes excluded).
    pub fn attempts(&self) -> u32 {
        self.wins + self.losses
    }

    /// The tally as seen from `side`. Stored tallies are Over-graded.
    pub fn for_side(self, side: Side) -> Self {
        match side {
            Side::Over => self,
            Side::Under => HitRecord {
                wins: self.losses,
                losses: self.wins,
                pushes: self.pushes,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Confidence
// ---------------------------------------------------------------------------

/// Confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fade,
    Playable,
    Reliable,
    Elite,
}

impl Tier {
    pub const ALL: &'static [Tier] = &[Tier::Elite, Tier::Reliable, Tier::Playable, Tier::Fade];

    /// Bucket a score: >=0.80 elite, >=0.70 reliable, >=0.60 playable, else fade.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.80 {
            Tier::Elite
        } else if score >= 0.70 {
            Tier::Reliable
        } else if score >= 0.60 {
            Tier::Playable
        } else {
            Tier::Fade
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Elite => write!(f, "Elite"),
            Tier::Reliable => write!(f, "Reliable"),
            Tier::Playable => write!(f, "Playable"),
            Tier::Fade => write!(f, "Fade"),
        }
    }
}

/// Risk rating attached to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Direction of implied-probability drift across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rising,
    Falling,
    Stable,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rising => write!(f, "rising"),
            Direction::Falling => write!(f, "falling"),
            Direction::Stable => write!(f, "stable"),
        }
    }
}

/// Audit tag explaining one contribution to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReasonTag {
    #[serde(rename = "rising")]
    Rising,
    #[serde(rename = "falling")]
    Falling,
    #[serde(rename = "stable")]
    Stable,
    #[serde(rename = "clv_positive")]
    ClvPositive,
    #[serde(rename = "clv_negative")]
    ClvNegative,
    #[serde(rename = "trap:composite")]
    TrapComposite,
    #[serde(rename = "trap:juice")]
    TrapJuice,
    #[serde(rename = "prior_only")]
    PriorOnly,
    #[serde(rename = "thin_history")]
    ThinHistory,
    #[serde(rename = "stable_market")]
    StableMarket,
    #[serde(rename = "volatile_market")]
    VolatileMarket,
    #[serde(rename = "late_arrivals")]
    LateArrivals,
    #[serde(rename = "scoring_failed")]
    ScoringFailed,
}

impl ReasonTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonTag::Rising => "rising",
            ReasonTag::Falling => "falling",
            ReasonTag::Stable => "stable",
            ReasonTag::ClvPositive => "clv_positive",
            ReasonTag::ClvNegative => "clv_negative",
            ReasonTag::TrapComposite => "trap:composite",
            ReasonTag::TrapJuice => "trap:juice",
            ReasonTag::PriorOnly => "prior_only",
            ReasonTag::ThinHistory => "thin_history",
            ReasonTag::StableMarket => "stable_market",
            ReasonTag::VolatileMarket => "volatile_market",
            ReasonTag::LateArrivals => "late_arrivals",
            ReasonTag::ScoringFailed => "scoring_failed",
        }
    }

    /// Whether the tag is one of the trap flags.
    pub fn is_trap(&self) -> bool {
        matches!(self, ReasonTag::TrapComposite | ReasonTag::TrapJuice)
    }
}

impl fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calibrated confidence for a proposed pick. Derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub key: MarketKey,
    pub side: Side,
    /// In [0, 1].
    pub score: f64,
    pub tier: Tier,
    pub risk: RiskLevel,
    pub tags: BTreeSet<ReasonTag>,
    pub direction: Direction,
    pub clv: f64,
    pub stability: f64,
    /// Component market to play instead, set when the compound line is a trap.
    #[serde(default)]
    pub substitute: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl ConfidenceScore {
    /// Stand-in for a score that could not be computed. Zero confidence at
    /// high risk, so no lane will ever play it.
    pub fn unavailable(key: MarketKey, side: Side, computed_at: DateTime<Utc>) -> Self {
        Self {
            key,
            side,
            score: 0.0,
            tier: Tier::Fade,
            risk: RiskLevel::High,
            tags: BTreeSet::from([ReasonTag::ScoringFailed]),
            direction: Direction::Stable,
            clv: 0.0,
            stability: 0.0,
            substitute: None,
            computed_at,
        }
    }
}

impl fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<&str> = self.tags.iter().map(|t| t.as_str()).collect();
        write!(
            f,
            "{} {} | conf={:.0}% {} risk={} | clv={:+.3} stab={:.2} [{}]",
            self.key,
            self.side,
            self.score * 100.0,
            self.tier,
            self.risk,
            self.clv,
            self.stability,
            tags.join(", "),
        )
    }
}

impl ConfidenceScore {
    pub fn has_trap(&self) -> bool {
        self.tags.iter().any(ReasonTag::is_trap)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why an observation was refused by the store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("price must be positive and finite, got {0}")]
    NonPositivePrice(f64),

    #[error("decimal price {0} implies a probability above 1")]
    PriceBelowEven(f64),

    #[error("line is missing")]
    MissingLine,

    #[error("line is not finite: {0}")]
    NonFiniteLine(f64),

    #[error("subject id and market must be non-empty")]
    BlankKey,

    #[error("timestamp {timestamp} is older than last stored {last} beyond tolerance")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },
}

/// Domain-specific error types for PropLine.
#[derive(Debug, thiserror::Error)]
pub enum PropLineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict on lane {lane_id}: expected version {expected}, found {actual}")]
    Conflict {
        lane_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Conflict on lane {lane_id}: leg {leg_index} is not the pending leg (pending: {pending})")]
    LegConflict {
        lane_id: String,
        leg_index: u32,
        pending: u32,
    },

    #[error("Lane not found: {0}")]
    LaneNotFound(String),

    #[error("Lane {0} is closed; re-initialise it to continue")]
    LaneClosed(String),

    #[error("Lane {0} is still active")]
    LaneActive(String),

    #[error("No candidate pick available for lane {0}")]
    NoCandidates(String),

    #[error("Lane {lane_id} cannot cash out: potential payout {potential} below target {target}")]
    CashOutNotReady {
        lane_id: String,
        potential: rust_decimal::Decimal,
        target: rust_decimal::Decimal,
    },

    #[error("Lane {lane_id}: payout at multiplier {multiplier} is not representable")]
    PayoutUnrepresentable { lane_id: String, multiplier: f64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PropLineError {
    /// Whether the caller should re-read state and retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PropLineError::Conflict { .. } | PropLineError::LegConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, PropLineError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
