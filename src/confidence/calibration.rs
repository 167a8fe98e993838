//! Calibration module.
//!
//! Measures how well audited confidence scores match realised outcomes.
//! Computes a calibration curve, Brier scores and realised hit rates per
//! tier, and a diagnosis of over- or under-confidence.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{MarketKey, Tier};

// ---------------------------------------------------------------------------
// Calibration data
// ---------------------------------------------------------------------------

/// A single score–outcome pair.
#[derive(Debug, Clone)]
pub struct CalibrationPoint {
    pub key: MarketKey,
    pub tier: Tier,
    pub score: f64,
    pub hit: bool,
}

/// Calibration analysis results.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationReport {
    pub total_predictions: usize,
    pub overall_brier: f64,
    pub tiers: BTreeMap<Tier, TierStats>,
    /// For each 10% bin, the predicted vs actual rate.
    pub calibration_curve: Vec<CalibrationBucket>,
    pub diagnosis: CalibrationDiagnosis,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub count: usize,
    pub hit_rate: f64,
    pub brier: f64,
}

/// A bucket in the calibration curve (e.g. all scores between 0.60-0.70).
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationBucket {
    pub bin_start: f64,
    pub bin_end: f64,
    pub mean_predicted: f64,
    pub actual_rate: f64,
    pub count: usize,
    /// |mean_predicted - actual_rate|
    pub deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationDiagnosis {
    WellCalibrated,
    OverConfident,
    UnderConfident,
    InsufficientData,
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

pub struct Calibrator {
    points: Vec<CalibrationPoint>,
    num_bins: usize,
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            num_bins: 10,
        }
    }

    pub fn add_point(&mut self, point: CalibrationPoint) {
        self.points.push(point);
    }

    pub fn add_points(&mut self, points: Vec<CalibrationPoint>) {
        self.points.extend(points);
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn report(&self) -> CalibrationReport {
        if self.points.is_empty() {
            return CalibrationReport {
                total_predictions: 0,
                overall_brier: 0.0,
                tiers: BTreeMap::new(),
                calibration_curve: Vec::new(),
                diagnosis: CalibrationDiagnosis::InsufficientData,
            };
        }

        let refs: Vec<&CalibrationPoint> = self.points.iter().collect();
        let calibration_curve = self.compute_calibration_curve();
        let diagnosis = self.diagnose(&calibration_curve);

        CalibrationReport {
            total_predictions: self.points.len(),
            overall_brier: brier(&refs),
            tiers: self.compute_tier_stats(),
            calibration_curve,
            diagnosis,
        }
    }

    fn compute_tier_stats(&self) -> BTreeMap<Tier, TierStats> {
        let mut by_tier: BTreeMap<Tier, Vec<&CalibrationPoint>> = BTreeMap::new();
        for p in &self.points {
            by_tier.entry(p.tier).or_default().push(p);
        }

        by_tier
            .into_iter()
            .map(|(tier, points)| {
                let hits = points.iter().filter(|p| p.hit).count();
                let stats = TierStats {
                    count: points.len(),
                    hit_rate: hits as f64 / points.len() as f64,
                    brier: brier(&points),
                };
                (tier, stats)
            })
            .collect()
    }

    fn compute_calibration_curve(&self) -> Vec<CalibrationBucket> {
        let bin_width = 1.0 / self.num_bins as f64;
        let mut buckets = Vec::with_capacity(self.num_bins);

        for i in 0..self.num_bins {
            let bin_start = i as f64 * bin_width;
            let bin_end = bin_start + bin_width;
            let last = i == self.num_bins - 1;

            let in_bin: Vec<&CalibrationPoint> = self
                .points
                .iter()
                .filter(|p| p.score >= bin_start && (p.score < bin_end || (last && p.score <= bin_end)))
                .collect();

            if in_bin.is_empty() {
                buckets.push(CalibrationBucket {
                    bin_start,
                    bin_end,
                    mean_predicted: (bin_start + bin_end) / 2.0,
                    actual_rate: 0.0,
                    count: 0,
                    deviation: 0.0,
                });
                continue;
            }

            let count = in_bin.len();
            let mean_predicted = in_bin.iter().map(|p| p.score).sum::<f64>() / count as f64;
            let actual_rate = in_bin.iter().filter(|p| p.hit).count() as f64 / count as f64;

            buckets.push(CalibrationBucket {
                bin_start,
                bin_end,
                mean_predicted,
                actual_rate,
                count,
                deviation: (mean_predicted - actual_rate).abs(),
            });
        }

        buckets
    }

    /// Scores cluster above 0.5, so any populated bin that misses in the
    /// same direction as its distance from 0.5 counts as a signal.
    fn diagnose(&self, curve: &[CalibrationBucket]) -> CalibrationDiagnosis {
        let populated: Vec<&CalibrationBucket> = curve.iter().filter(|b| b.count >= 3).collect();

        if populated.len() < 2 || self.points.len() < 20 {
            return CalibrationDiagnosis::InsufficientData;
        }

        let mut over = 0;
        let mut under = 0;
        for bucket in &populated {
            if bucket.deviation < 0.05 {
                continue;
            }
            let extreme = bucket.mean_predicted >= 0.5;
            let predicted_too_high = bucket.mean_predicted > bucket.actual_rate;
            if extreme == predicted_too_high {
                over += 1;
            } else {
                under += 1;
            }
        }

        if over > under {
            CalibrationDiagnosis::OverConfident
        } else if under > over {
            CalibrationDiagnosis::UnderConfident
        } else {
            CalibrationDiagnosis::WellCalibrated
        }
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Brier = (1/N) * Σ(predicted - outcome)². 0.0 is perfect.
fn brier(points: &[&CalibrationPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f64 = points
        .iter()
        .map(|p| {
            let outcome = if p.hit { 1.0 } else { 0.0 };
            (p.score - outcome).powi(2)
        })
        .sum();
    sum / points.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
