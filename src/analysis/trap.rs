//! Trap line detection.
//!
//! Two kinds of trap are recognised:
//! - **Composite**: a compound market (e.g. hits+runs+RBIs 2.5) priced to
//!   look attractive while every component it decomposes into is weak.
//! - **Juice**: one side of a book's two-way quote carries noticeably more
//!   of the vig than an even split would.
//!
//! Checks never mutate anything and can be repeated freely.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::analysis::odds::implied_probability;
use crate::config::{CompositeDefinition, TrapConfig};
use crate::ledger::ObservationWindow;
use crate::types::{Observation, Side};

// ---------------------------------------------------------------------------
// Composite catalog
// ---------------------------------------------------------------------------

/// Compound markets and the component markets they add up from.
#[derive(Debug, Clone, Default)]
pub struct CompositeCatalog {
    compounds: HashMap<String, Vec<String>>,
}

impl CompositeCatalog {
    pub fn new(definitions: &[CompositeDefinition]) -> Self {
        let compounds = definitions
            .iter()
            .map(|d| (d.market.clone(), d.components.clone()))
            .collect();
        Self { compounds }
    }

    /// Component markets of `market`, if it is a known compound.
    pub fn components(&self, market: &str) -> Option<&[String]> {
        self.compounds.get(market).map(|c| c.as_slice())
    }

    pub fn is_compound(&self, market: &str) -> bool {
        self.compounds.contains_key(market)
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }
}

/// Smallest whole-number result that clears an over line.
pub fn clearing_count(line: f64) -> i64 {
    line.floor() as i64 + 1
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// A component market's current line and its standalone confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentQuote {
    pub market: String,
    pub line: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeTrap {
    pub compound_probability: f64,
    pub components: Vec<ComponentQuote>,
    /// Component market recommended instead of the compound.
    pub substitute: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JuiceTrap {
    pub book: String,
    pub line: f64,
    pub over_probability: f64,
    pub under_probability: f64,
    /// Overround: sum of both implied probabilities minus 1.
    pub vig: f64,
    pub imbalance: f64,
    /// Side carrying the extra juice.
    pub shaded_side: Side,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct TrapDetector {
    config: TrapConfig,
}

impl TrapDetector {
    pub fn new(config: TrapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrapConfig {
        &self.config
    }

    /// Whether the components' clearing counts add up to the compound's.
    pub fn decomposes(&self, compound_line: f64, components: &[ComponentQuote]) -> bool {
        if components.is_empty() {
            return false;
        }
        let total: i64 = components.iter().map(|c| clearing_count(c.line)).sum();
        total == clearing_count(compound_line)
    }

    /// Flag a compound over quote whose price looks attractive while every
    /// component is weak. `components` must hold one quote per catalogued
    /// component; a missing component means no decomposition.
    pub fn check_composite(
        &self,
        compound_line: f64,
        compound_price: f64,
        expected_components: usize,
        components: &[ComponentQuote],
    ) -> Option<CompositeTrap> {
        if components.len() != expected_components || !self.decomposes(compound_line, components) {
            return None;
        }

        let all_weak = components
            .iter()
            .all(|c| c.confidence < self.config.weak_component_threshold);
        let compound_probability = implied_probability(compound_price);
        let attractive = compound_probability <= self.config.attractive_probability_ceiling;

        if !(all_weak && attractive) {
            return None;
        }

        let strongest = components
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

        debug!(
            compound_line,
            compound_probability = format!("{compound_probability:.3}"),
            substitute = %strongest.market,
            "Composite trap detected"
        );

        Some(CompositeTrap {
            compound_probability,
            components: components.to_vec(),
            substitute: strongest.market.clone(),
        })
    }

    /// Check the most recent book that quotes both sides at the same line.
    pub fn check_juice(&self, window: &ObservationWindow) -> Option<JuiceTrap> {
        let (over, under) = latest_two_way_quote(window)?;
        let over_probability = over.implied_probability();
        let under_probability = under.implied_probability();
        let total = over_probability + under_probability;
        let expected = total / 2.0;
        let imbalance = (over_probability - expected).abs();

        if imbalance <= self.config.juice_imbalance_threshold {
            return None;
        }

        let shaded_side = if over_probability > under_probability {
            Side::Over
        } else {
            Side::Under
        };

        debug!(
            key = %window.key(),
            book = %over.book,
            imbalance = format!("{imbalance:.3}"),
            shaded = %shaded_side,
            "Juice trap detected"
        );

        Some(JuiceTrap {
            book: over.book.clone(),
            line: over.line,
            over_probability,
            under_probability,
            vig: total - 1.0,
            imbalance,
            shaded_side,
        })
    }
}

impl Default for TrapDetector {
    fn default() -> Self {
        Self::new(TrapConfig::default())
    }
}

/// Latest over/under pair from a single book at a single line, preferring
/// the book whose pair was completed most recently.
fn latest_two_way_quote(window: &ObservationWindow) -> Option<(&Observation, &Observation)> {
    let mut latest: HashMap<&str, (Option<&Observation>, Option<&Observation>)> = HashMap::new();
    let mut best: Option<(&Observation, &Observation)> = None;

    for obs in window.iter() {
        let entry = latest.entry(obs.book.as_str()).or_default();
        match obs.side {
            Side::Over => entry.0 = Some(obs),
            Side::Under => entry.1 = Some(obs),
        }
        if let (Some(o), Some(u)) = *entry {
            if o.line == u.line {
                best = Some((o, u));
            }
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketKey;
    use chrono::{Duration, TimeZone, Utc};

    fn comp(market: &str, line: f64, confidence: f64) -> ComponentQuote {
        ComponentQuote {
            market: market.to_string(),
            line,
            confidence,
        }
    }

    fn weak_components() -> Vec<ComponentQuote> {
        vec![
            comp("batter_hits", 0.5, 0.55),
            comp("batter_runs_scored", 0.5, 0.52),
            comp("batter_rbis", 0.5, 0.50),
        ]
    }

    #[test]
    fn test_clearing_count() {
        assert_eq!(clearing_count(0.5), 1);
        assert_eq!(clearing_count(2.5), 3);
        assert_eq!(clearing_count(3.0), 4);
    }

    #[test]
    fn test_composite_trap_flagged_with_substitute() {
        let detector = TrapDetector::default();
        // +110 compound: implied ~0.476
        let trap = detector
            .check_composite(2.5, 2.1, 3, &weak_components())
            .expect("trap");
        assert_eq!(trap.substitute, "batter_hits");
        assert!(trap.compound_probability <= 0.5);
    }

    #[test]
    fn test_no_trap_when_compound_is_short() {
        let detector = TrapDetector::default();
        // 1.6 implies 0.625: not an attractive price
        assert!(detector.check_composite(2.5, 1.6, 3, &weak_components()).is_none());
    }

    #[test]
    fn test_no_trap_when_a_component_is_strong() {
        let detector = TrapDetector::default();
        let mut components = weak_components();
        components[1].confidence = 0.65;
        assert!(detector.check_composite(2.5, 2.1, 3, &components).is_none());
    }

    #[test]
    fn test_no_decomposition_when_counts_differ() {
        let detector = TrapDetector::default();
        let mut components = weak_components();
        components[0].line = 1.5;
        assert!(!detector.decomposes(2.5, &components));
        assert!(detector.check_composite(2.5, 2.1, 3, &components).is_none());
    }

    #[test]
    fn test_no_decomposition_when_component_missing() {
        let detector = TrapDetector::default();
        let components = &weak_components()[..2];
        assert!(detector.check_composite(1.5, 2.1, 3, components).is_none());
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = CompositeCatalog::new(&crate::config::default_composites());
        assert!(catalog.is_compound("batter_hits_runs_rbis"));
        assert_eq!(catalog.components("player_points_rebounds").map(|c| c.len()), Some(2));
        assert!(catalog.components("batter_hits").is_none());
    }

    fn quote(book: &str, side: Side, line: f64, price: f64, minute: i64) -> Observation {
        Observation {
            subject_id: "tatum".into(),
            market: "player_points".into(),
            book: book.into(),
            side,
            line,
            price,
            timestamp: Utc.with_ymd_and_hms(2026, 5, 1, 18, 0, 0).unwrap()
                + Duration::minutes(minute),
            late: false,
        }
    }

    fn window(observations: Vec<Observation>) -> ObservationWindow {
        ObservationWindow::new(MarketKey::new("tatum", "player_points"), observations)
    }

    #[test]
    fn test_balanced_juice_not_flagged() {
        // -110 / -110
        let w = window(vec![
            quote("dk", Side::Over, 27.5, 1.909, 0),
            quote("dk", Side::Under, 27.5, 1.909, 1),
        ]);
        assert!(TrapDetector::default().check_juice(&w).is_none());
    }

    #[test]
    fn test_shaded_over_flagged() {
        // -150 / +120: over implies 0.60, under 0.4545
        let w = window(vec![
            quote("dk", Side::Over, 27.5, 1.6667, 0),
            quote("dk", Side::Under, 27.5, 2.2, 1),
        ]);
        let trap = TrapDetector::default().check_juice(&w).expect("juice trap");
        assert_eq!(trap.shaded_side, Side::Over);
        assert!(trap.imbalance > 0.07);
        assert!(trap.vig > 0.0);
    }

    #[test]
    fn test_juice_uses_most_recent_book() {
        let w = window(vec![
            quote("fd", Side::Over, 27.5, 1.6667, 0),
            quote("fd", Side::Under, 27.5, 2.2, 1),
            quote("dk", Side::Over, 27.5, 1.909, 5),
            quote("dk", Side::Under, 27.5, 1.909, 6),
        ]);
        assert!(TrapDetector::default().check_juice(&w).is_none());
    }

    #[test]
    fn test_one_sided_window_has_no_juice_check() {
        let w = window(vec![quote("dk", Side::Over, 27.5, 1.5, 0)]);
        assert!(TrapDetector::default().check_juice(&w).is_none());
    }
}
