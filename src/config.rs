//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every tuning section has defaults so a minimal file only needs the
//! lane table. The lane table is validated once at load and never mutated.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::streak::{RiskClass, StreakLaneConfig};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub trap: TrapConfig,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub lanes: Vec<StreakLaneConfig>,
    #[serde(default)]
    pub composites: Vec<CompositeDefinition>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            store: StoreConfig::default(),
            drift: DriftConfig::default(),
            trap: TrapConfig::default(),
            confidence: ConfidenceConfig::default(),
            streak: StreakConfig::default(),
            storage: StorageConfig::default(),
            dashboard: DashboardConfig::default(),
            lanes: Vec::new(),
            composites: default_composites(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Seconds between inbox drains / lane maintenance passes.
    pub tick_interval_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "PROPLINE-001".to_string(),
            tick_interval_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// How far behind the newest stored timestamp a late arrival may be.
    pub late_tolerance_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            late_tolerance_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriftConfig {
    /// Minimum |Δ implied probability| to call a direction (0.03 = 3 points).
    pub direction_threshold: f64,
    pub lookback_hours: i64,
    /// Variance at which stability falls to 0.5.
    pub stability_reference_variance: f64,
    pub min_observations: usize,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            direction_threshold: 0.03,
            lookback_hours: 48,
            stability_reference_variance: 0.0025,
            min_observations: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrapConfig {
    /// Components scoring below this are "weak".
    pub weak_component_threshold: f64,
    /// Compound prices implying at most this probability look attractive.
    pub attractive_probability_ceiling: f64,
    /// Max deviation of one side from the even vig-adjusted split.
    pub juice_imbalance_threshold: f64,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            weak_component_threshold: 0.60,
            attractive_probability_ceiling: 0.50,
            juice_imbalance_threshold: 0.03,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfidenceConfig {
    pub prior_wins: f64,
    pub prior_losses: f64,
    pub drift_weight: f64,
    pub stability_weight: f64,
    pub composite_trap_penalty: f64,
    pub juice_trap_penalty: f64,
    /// Attempts below this add the `thin_history` tag.
    pub thin_history_attempts: u32,
    pub audit_capacity: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            prior_wins: 2.0,
            prior_losses: 2.0,
            drift_weight: 0.05,
            stability_weight: 0.05,
            composite_trap_penalty: 0.15,
            juice_trap_penalty: 0.08,
            thin_history_attempts: 5,
            audit_capacity: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreakConfig {
    /// Streak picks may not be priced shorter than this (American odds).
    pub min_american_odds: i32,
    /// Start a fresh instance as soon as a lane completes or busts.
    pub auto_restart: bool,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            min_american_odds: -120,
            auto_restart: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub state_file: String,
    pub history_file: String,
    pub observation_inbox: String,
    pub outcome_inbox: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: "propline_state.json".to_string(),
            history_file: "lane_history.jsonl".to_string(),
            observation_inbox: "inbox/observations.jsonl".to_string(),
            outcome_inbox: "inbox/outcomes.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

/// A compound market and the component markets whose counts sum to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CompositeDefinition {
    pub market: String,
    pub components: Vec<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let mut config: AppConfig =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        if config.composites.is_empty() {
            config.composites = default_composites();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject lane tables the state machine cannot run.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for lane in &self.lanes {
            if !seen.insert(lane.lane_id.as_str()) {
                anyhow::bail!("Duplicate lane id: {}", lane.lane_id);
            }
            if lane.max_legs == 0 {
                anyhow::bail!("Lane {} must allow at least one leg", lane.lane_id);
            }
            if lane.base_multiplier < 1.0 || !lane.base_multiplier.is_finite() {
                anyhow::bail!("Lane {} base multiplier must be >= 1.0", lane.lane_id);
            }
            if lane.multiplier_ceiling < lane.base_multiplier {
                anyhow::bail!("Lane {} multiplier ceiling below base multiplier", lane.lane_id);
            }
            if lane.risk_progression_rate < 0.0 {
                anyhow::bail!("Lane {} risk progression rate must be >= 0", lane.lane_id);
            }
            if lane.entry_amount <= Decimal::ZERO || lane.target_amount < lane.entry_amount {
                anyhow::bail!("Lane {} needs 0 < entry <= target", lane.lane_id);
            }
        }
        for composite in &self.composites {
            if composite.components.len() < 2 {
                anyhow::bail!("Composite {} needs at least two components", composite.market);
            }
        }
        Ok(())
    }
}

/// Compound markets recognised when the config file lists none.
pub fn default_composites() -> Vec<CompositeDefinition> {
    let def = |market: &str, components: &[&str]| CompositeDefinition {
        market: market.to_string(),
        components: components.iter().map(|c| c.to_string()).collect(),
    };
    vec![
        def("batter_hits_runs_rbis", &["batter_hits", "batter_runs_scored", "batter_rbis"]),
        def("player_points_rebounds_assists", &["player_points", "player_rebounds", "player_assists"]),
        def("player_points_rebounds", &["player_points", "player_rebounds"]),
        def("player_points_assists", &["player_points", "player_assists"]),
        def("player_rebounds_assists", &["player_rebounds", "player_assists"]),
        def("player_blocks_steals", &["player_blocks", "player_steals"]),
    ]
}

/// The three-lane table used when the config file defines none:
/// two safe lanes and one risky lane, $10 entry, $50k target.
pub fn default_lanes() -> Vec<StreakLaneConfig> {
    let safe = |id: &str, name: &str| StreakLaneConfig {
        lane_id: id.to_string(),
        name: name.to_string(),
        risk_class: RiskClass::Safe,
        entry_amount: dec!(10),
        target_amount: dec!(50000),
        max_legs: 12,
        base_multiplier: 1.5,
        risk_progression_rate: 0.05,
        multiplier_ceiling: 3.0,
    };
    vec![
        safe("safe-1", "Safe Streak 1"),
        safe("safe-2", "Safe Streak 2"),
        StreakLaneConfig {
            lane_id: "risky-1".to_string(),
            name: "Risky Streak".to_string(),
            risk_class: RiskClass::Risky,
            entry_amount: dec!(10),
            target_amount: dec!(50000),
            max_legs: 15,
            base_multiplier: 1.8,
            risk_progression_rate: 0.08,
            multiplier_ceiling: 3.0,
        },
    ]
}
