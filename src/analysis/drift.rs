//! Line drift analysis.
//!
//! Reduces one side of an observation window to a direction, a closing
//! line value (CLV) and a stability measure.

use serde::Serialize;
use tracing::debug;

use crate::analysis::odds::variance;
use crate::config::DriftConfig;
use crate::ledger::ObservationWindow;
use crate::types::{Direction, Side};

/// Summary of how a side's implied probability moved across a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DriftReport {
    pub direction: Direction,
    /// Closing minus opening implied probability.
    pub clv: f64,
    /// 1 / (1 + variance / reference), in [0, 1].
    pub stability: f64,
    pub opening_probability: f64,
    pub closing_probability: f64,
    pub samples: usize,
    /// Too few observations to say anything.
    pub insufficient: bool,
    pub late_arrivals: bool,
}

impl DriftReport {
    fn insufficient(samples: usize, late_arrivals: bool) -> Self {
        Self {
            direction: Direction::Stable,
            clv: 0.0,
            stability: 0.0,
            opening_probability: 0.0,
            closing_probability: 0.0,
            samples,
            insufficient: true,
            late_arrivals,
        }
    }
}

pub struct DriftAnalyzer {
    config: DriftConfig,
}

impl DriftAnalyzer {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Analyze the observations for `side` in `window`.
    pub fn analyze(&self, window: &ObservationWindow, side: Side) -> DriftReport {
        let probabilities: Vec<f64> = window
            .side(side)
            .map(|o| o.implied_probability())
            .collect();
        let late = window.side(side).any(|o| o.late);

        if probabilities.len() < self.config.min_observations.max(1) {
            debug!(
                key = %window.key(),
                side = %side,
                samples = probabilities.len(),
                "Drift: insufficient observations"
            );
            return DriftReport::insufficient(probabilities.len(), late);
        }

        let (opening, closing) = match (probabilities.first(), probabilities.last()) {
            (Some(o), Some(c)) => (*o, *c),
            _ => return DriftReport::insufficient(0, late),
        };
        let clv = closing - opening;

        let direction = if clv.abs() > self.config.direction_threshold {
            if clv > 0.0 {
                Direction::Rising
            } else {
                Direction::Falling
            }
        } else {
            Direction::Stable
        };

        let reference = self.config.stability_reference_variance;
        let var = variance(&probabilities);
        let stability = if reference > 0.0 {
            1.0 / (1.0 + var / reference)
        } else if var == 0.0 {
            1.0
        } else {
            0.0
        };

        debug!(
            key = %window.key(),
            side = %side,
            direction = %direction,
            clv = format!("{clv:+.4}"),
            stability = format!("{stability:.3}"),
            samples = probabilities.len(),
            "Drift analyzed"
        );

        DriftReport {
            direction,
            clv,
            stability: stability.clamp(0.0, 1.0),
            opening_probability: opening,
            closing_probability: closing,
            samples: probabilities.len(),
            insufficient: false,
            late_arrivals: late,
        }
    }
}

impl Default for DriftAnalyzer {
    fn default() -> Self {
        Self::new(DriftConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
