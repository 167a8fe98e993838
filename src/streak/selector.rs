//! Pick preparation.
//!
//! Chooses the next pick for a lane from a candidate source: assess every
//! candidate, apply the lane's confidence gate and the minimum-odds rule,
//! and take the best survivor. Only the chosen pick is audited.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analysis::odds::{american_to_decimal, implied_probability};
use crate::confidence::{ConfidenceEngine, ScoreRequest};
use crate::ledger::outcomes::OutcomeLedger;
use crate::ledger::ObservationStore;
use crate::streak::{PickRef, PreparedPick, StreakLaneConfig};
use crate::types::{MarketKey, PropLineError, Result, Side};

/// Supplies quoted lines a lane may play.
#[cfg_attr(test, mockall::automock)]
pub trait CandidateSource: Send + Sync {
    fn candidates(&self) -> Vec<PickRef>;
}

/// Candidates from the latest quote of each side of each tracked market.
/// Quotes already settled by a recorded outcome are skipped.
pub struct StoreCandidates {
    store: Arc<ObservationStore>,
    outcomes: Arc<OutcomeLedger>,
}

impl StoreCandidates {
    pub fn new(store: Arc<ObservationStore>, outcomes: Arc<OutcomeLedger>) -> Self {
        Self { store, outcomes }
    }
}

impl CandidateSource for StoreCandidates {
    fn candidates(&self) -> Vec<PickRef> {
        let mut picks = Vec::new();
        for key in self.store.keys() {
            for side in [Side::Over, Side::Under] {
                if let Some(latest) = self.store.latest(&key, side) {
                    if self
                        .outcomes
                        .first_on_or_after(&key, latest.timestamp.date_naive())
                        .is_some()
                    {
                        continue;
                    }
                    picks.push(PickRef {
                        subject_id: latest.subject_id,
                        market: latest.market,
                        side,
                        line: latest.line,
                        price: latest.price,
                        book: latest.book,
                        quoted_at: latest.timestamp,
                    });
                }
            }
        }
        picks
    }
}

pub struct PickPreparer {
    engine: Arc<ConfidenceEngine>,
    source: Arc<dyn CandidateSource>,
    /// Highest implied probability a streak pick may carry.
    max_probability: f64,
}

impl PickPreparer {
    pub fn new(engine: Arc<ConfidenceEngine>, source: Arc<dyn CandidateSource>, min_american_odds: i32) -> Self {
        Self {
            engine,
            source,
            max_probability: implied_probability(american_to_decimal(min_american_odds)),
        }
    }

    /// Best pick for `lane`, skipping markets in `used`.
    pub fn prepare(&self, lane: &StreakLaneConfig, used: &[MarketKey]) -> Result<PreparedPick> {
        let used: HashSet<&MarketKey> = used.iter().collect();
        let mut candidates: Vec<PickRef> = self
            .source
            .candidates()
            .into_iter()
            .filter(|p| !used.contains(&p.key()))
            .collect();
        candidates.sort_by(|a, b| a.key().cmp(&b.key()).then(a.side.cmp(&b.side)));

        let scored: Vec<PreparedPick> = candidates
            .into_iter()
            .map(|pick| {
                let confidence = self.engine.assess(&ScoreRequest {
                    key: pick.key(),
                    side: pick.side,
                    as_of: Some(pick.quoted_at),
                });
                PreparedPick { pick, confidence }
            })
            .collect();

        let passing = scored
            .iter()
            .filter(|p| lane.risk_class.admits(&p.confidence))
            .filter(|p| implied_probability(p.pick.price) <= self.max_probability);

        if let Some(best) = best_of(passing) {
            debug!(
                lane = %lane.lane_id,
                pick = %best.pick,
                score = format!("{:.3}", best.confidence.score),
                "Pick prepared"
            );
            return Ok(self.chosen(best));
        }

        match best_of(scored.iter()) {
            Some(best) => {
                warn!(
                    lane = %lane.lane_id,
                    risk_class = %lane.risk_class,
                    pick = %best.pick,
                    score = format!("{:.3}", best.confidence.score),
                    tier = %best.confidence.tier,
                    "No candidate passed the lane gate; taking best available"
                );
                Ok(self.chosen(best))
            }
            None => Err(PropLineError::NoCandidates(lane.lane_id.clone())),
        }
    }

    fn chosen(&self, best: &PreparedPick) -> PreparedPick {
        self.engine.record_audit(&best.confidence, Some(best.pick.line));
        best.clone()
    }
}

/// Highest score; earlier candidates win ties.
fn best_of<'a>(picks: impl Iterator<Item = &'a PreparedPick>) -> Option<&'a PreparedPick> {
    picks.fold(None, |best: Option<&PreparedPick>, p| match best {
        Some(b) if b.confidence.score >= p.confidence.score => Some(b),
        _ => Some(p),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::streak::tests::lane_config;
    use crate::streak::RiskClass;
    use crate::types::{ObservationRecord, Outcome, OutcomeResult};
    use chrono::{NaiveDate, TimeZone, Utc};

    struct Fixture {
        store: Arc<ObservationStore>,
        outcomes: Arc<OutcomeLedger>,
        engine: Arc<ConfidenceEngine>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(ObservationStore::default());
        let outcomes = Arc::new(OutcomeLedger::new());
        let engine = Arc::new(ConfidenceEngine::new(&AppConfig::default(), store.clone(), outcomes.clone()));
        Fixture { store, outcomes, engine }
    }

    impl Fixture {
        /// Two identical quotes (fully stable) plus a hit record.
        fn market(&self, subject: &str, price: f64, wins: u32, losses: u32) {
            for minute in [0, 30] {
                self.store
                    .record(ObservationRecord {
                        subject_id: subject.into(),
                        market: "batter_hits".into(),
                        book: "dk".into(),
                        side: Side::Over,
                        line: Some(0.5),
                        price,
                        timestamp: Utc.with_ymd_and_hms(2026, 8, 1, 17, minute, 0).unwrap(),
                    })
                    .unwrap();
            }
            let results = std::iter::repeat(OutcomeResult::Win)
                .take(wins as usize)
                .chain(std::iter::repeat(OutcomeResult::Loss).take(losses as usize));
            for (i, result) in results.enumerate() {
                self.outcomes.record(Outcome {
                    subject_id: subject.into(),
                    market: "batter_hits".into(),
                    date: NaiveDate::from_ymd_opt(2026, 7, 1).unwrap() + chrono::Days::new(i as u64),
                    realized_value: 0.0,
                    result,
                });
            }
        }

        fn preparer(&self) -> PickPreparer {
            PickPreparer::new(
                self.engine.clone(),
                Arc::new(StoreCandidates::new(self.store.clone(), self.outcomes.clone())),
                -120,
            )
        }
    }

    #[test]
    fn test_picks_highest_scoring_candidate() {
        let fx = fixture();
        fx.market("a", 1.9, 6, 4);
        fx.market("b", 1.9, 9, 1);
        let pick = fx.preparer().prepare(&lane_config(5), &[]).unwrap();
        assert_eq!(pick.pick.subject_id, "b");
        assert!(RiskClass::Safe.admits(&pick.confidence));
    }

    #[test]
    fn test_only_the_chosen_pick_is_audited() {
        let fx = fixture();
        fx.market("a", 1.9, 6, 4);
        fx.market("b", 1.9, 9, 1);
        fx.market("c", 1.9, 2, 4);
        let pick = fx.preparer().prepare(&lane_config(5), &[]).unwrap();
        let log = fx.engine.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].score, pick.confidence);
        assert_eq!(log[0].line, Some(0.5));

        fx.market("d", 1.9, 1, 5);
        fx.preparer().prepare(&lane_config(5), &[]).unwrap();
        assert_eq!(fx.engine.audit_log().len(), 2);
    }

    #[test]
    fn test_skips_used_markets() {
        let fx = fixture();
        fx.market("a", 1.9, 6, 4);
        fx.market("b", 1.9, 9, 1);
        let used = vec![MarketKey::new("b", "batter_hits")];
        let pick = fx.preparer().prepare(&lane_config(5), &used).unwrap();
        assert_eq!(pick.pick.subject_id, "a");
    }

    #[test]
    fn test_min_odds_rule_excludes_heavy_favourites() {
        let fx = fixture();
        // 1.4 is about -250: implied 0.714 exceeds the -120 ceiling
        fx.market("fav", 1.4, 10, 0);
        fx.market("dog", 1.9, 9, 1);
        let pick = fx.preparer().prepare(&lane_config(5), &[]).unwrap();
        assert_eq!(pick.pick.subject_id, "dog");
    }

    #[test]
    fn test_falls_back_to_best_when_gate_rejects_all() {
        let fx = fixture();
        fx.market("a", 1.9, 1, 5);
        fx.market("b", 1.9, 2, 4);
        let pick = fx.preparer().prepare(&lane_config(5), &[]).unwrap();
        assert_eq!(pick.pick.subject_id, "b");
        assert!(!RiskClass::Safe.admits(&pick.confidence));
    }

    #[test]
    fn test_settled_quotes_are_not_candidates() {
        let fx = fixture();
        fx.market("a", 1.9, 9, 1);
        fx.outcomes.record(Outcome {
            subject_id: "a".into(),
            market: "batter_hits".into(),
            date: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            realized_value: 1.0,
            result: OutcomeResult::Win,
        });
        let source = StoreCandidates::new(fx.store.clone(), fx.outcomes.clone());
        assert!(source.candidates().is_empty());
    }

    #[test]
    fn test_no_candidates() {
        let fx = fixture();
        let err = fx.preparer().prepare(&lane_config(5), &[]).unwrap_err();
        assert!(matches!(err, PropLineError::NoCandidates(id) if id == "safe-1"));
    }

    #[test]
    fn test_mock_source() {
        let fx = fixture();
        let mut source = MockCandidateSource::new();
        source.expect_candidates().times(1).returning(Vec::new);
        let preparer = PickPreparer::new(fx.engine.clone(), Arc::new(source), -120);
        assert!(preparer.prepare(&lane_config(3), &[]).is_err());
    }
}
