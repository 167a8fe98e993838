//! End-to-end scenarios against the public API.

mod lanes;
mod outcomes;
mod scoring;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use propline::config::AppConfig;
use propline::engine::Core;
use propline::streak::registry::MemoryHistory;
use propline::streak::selector::CandidateSource;
use propline::streak::{PickRef, RiskClass, StreakLaneConfig};
use propline::types::{ObservationRecord, Outcome, OutcomeResult, Side};

/// Serves the same fixed list of picks every time.
pub struct FixedCandidates(pub Vec<PickRef>);

impl CandidateSource for FixedCandidates {
    fn candidates(&self) -> Vec<PickRef> {
        self.0.clone()
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 17, 0, 0).unwrap()
}

pub fn pick(subject: &str) -> PickRef {
    PickRef {
        subject_id: subject.into(),
        market: "batter_total_bases".into(),
        side: Side::Over,
        line: 1.5,
        price: 1.95,
        book: "fd".into(),
        quoted_at: t0(),
    }
}

pub fn lane(max_legs: u32) -> StreakLaneConfig {
    StreakLaneConfig {
        lane_id: "safe-1".into(),
        name: "Safe Streak".into(),
        risk_class: RiskClass::Safe,
        entry_amount: dec!(1),
        target_amount: dec!(1000),
        max_legs,
        base_multiplier: 1.5,
        risk_progression_rate: 0.05,
        multiplier_ceiling: 3.0,
    }
}

/// Core whose lanes draw from `n` distinct fixed picks.
pub fn core_with_picks(n: usize) -> (Arc<Core>, Arc<MemoryHistory>) {
    let history = Arc::new(MemoryHistory::new());
    let picks = (0..n).map(|i| pick(&format!("p{i:02}"))).collect();
    let core = Core::with_candidates(
        AppConfig::default(),
        history.clone(),
        Arc::new(FixedCandidates(picks)),
    );
    (Arc::new(core), history)
}

pub fn observation(subject: &str, market: &str, side: Side, line: f64, price: f64, minutes: i64) -> ObservationRecord {
    ObservationRecord {
        subject_id: subject.into(),
        market: market.into(),
        book: "dk".into(),
        side,
        line: Some(line),
        price,
        timestamp: t0() + Duration::minutes(minutes),
    }
}

/// `wins` then `losses` graded outcomes on consecutive days before `t0`.
pub fn history(core: &Core, subject: &str, market: &str, wins: usize, losses: usize) {
    let results = std::iter::repeat(OutcomeResult::Win)
        .take(wins)
        .chain(std::iter::repeat(OutcomeResult::Loss).take(losses));
    for (i, result) in results.enumerate() {
        core.outcomes().record(Outcome {
            subject_id: subject.into(),
            market: market.into(),
            date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap() + chrono::Days::new(i as u64),
            realized_value: 0.0,
            result,
        });
    }
}
