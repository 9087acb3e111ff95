use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::Component;
use crate::error::{Result, ScoringError};
use crate::features::FEATURE_NAMES;

/// Allowed drift of the component weight sum from 1.0.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub input: InputConfig,
    pub features: FeatureConfig,
    pub scoring: ScoringConfig,
    pub anomaly: AnomalyConfig,
    pub clustering: ClusterConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    /// Seed shared by the isolation forest and k-means.
    pub seed: u64,
    /// Feature worker tasks; 0 means one per available core.
    pub workers: usize,
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    /// The export carries `value` in wei.
    pub value_decimals: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationMeasure {
    /// Largest single-recipient share of sent value.
    MaxShare,
    /// Sum of squared recipient shares.
    Herfindahl,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FeatureConfig {
    pub burst_window_secs: i64,
    /// Lower bound on the activity span used as the frequency denominator.
    pub min_span_days: f64,
    pub concentration: ConcentrationMeasure,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ComponentConfig {
    pub weight: f64,
    pub features: Vec<String>,
}

/// Multiplies the base score when a normalized feature exceeds `threshold`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoostRule {
    pub feature: String,
    pub threshold: f64,
    pub multiplier: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub components: BTreeMap<Component, ComponentConfig>,
    /// Normalized value used for a feature that is constant across the batch.
    pub degenerate_fill: f64,
    pub boosts: Vec<BoostRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnomalyBoost {
    Multiplicative { factor: f64 },
    Additive { points: f64 },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AnomalyConfig {
    pub enabled: bool,
    pub contamination: f64,
    pub n_trees: usize,
    pub sample_size: usize,
    /// Smaller batches skip anomaly detection.
    pub min_batch: usize,
    pub boost: AnomalyBoost,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClusterAdjustment {
    /// base * (cluster mean / population mean - 1)
    Ratio,
    /// scale * (cluster mean - population mean)
    Deviation { scale: f64 },
    None,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClusterConfig {
    pub enabled: bool,
    pub k: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tolerance: f64,
    pub adjustment: ClusterAdjustment,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            workers: 0,
            deadline_secs: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { value_decimals: 18 }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            burst_window_secs: 3600,
            min_span_days: 1.0,
            concentration: ConcentrationMeasure::MaxShare,
        }
    }
}

fn component(weight: f64, features: &[&str]) -> ComponentConfig {
    ComponentConfig {
        weight,
        features: features.iter().map(|f| f.to_string()).collect(),
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let mut components = BTreeMap::new();
        components.insert(
            Component::Volume,
            component(0.20, &["total_transactions", "total_value_sent", "max_transaction_value"]),
        );
        components.insert(
            Component::Behavioral,
            component(
                0.25,
                &[
                    "send_receive_ratio",
                    "recipient_concentration",
                    "transaction_frequency",
                    "zero_value_ratio",
                ],
            ),
        );
        components.insert(
            Component::Technical,
            component(0.20, &["avg_gas_used", "total_gas_cost", "error_rate"]),
        );
        components.insert(
            Component::Temporal,
            component(0.15, &["avg_time_between_txns_hr", "burst_ratio"]),
        );
        components.insert(
            Component::Diversity,
            component(
                0.20,
                &[
                    "unique_recipients",
                    "unique_senders",
                    "contract_complexity",
                    "function_diversity",
                ],
            ),
        );
        Self {
            components,
            degenerate_fill: 0.5,
            boosts: Vec::new(),
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            contamination: 0.05,
            n_trees: 100,
            sample_size: 256,
            min_batch: 2,
            boost: AnomalyBoost::Multiplicative { factor: 1.5 },
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 5,
            n_init: 10,
            max_iter: 300,
            tolerance: 1e-4,
            adjustment: ClusterAdjustment::Ratio,
        }
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist;
    /// a file that exists but does not parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Config loaded from {}", path.display());
        Ok(config)
    }

    /// Reject configurations the pipeline cannot honour. Weights are never renormalized.
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        self.features.validate()?;
        self.anomaly.validate()?;
        self.clustering.validate()?;
        Ok(())
    }

    /// Number of feature workers to spawn.
    pub fn worker_count(&self) -> usize {
        if self.run.workers > 0 {
            return self.run.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

fn known_feature(name: &str) -> bool {
    FEATURE_NAMES.contains(&name)
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        for required in Component::ALL {
            if !self.components.contains_key(&required) {
                return Err(ScoringError::config_error(format!(
                    "missing weight for component {}",
                    required.name()
                )));
            }
        }

        let mut sum = 0.0;
        for (component, cfg) in &self.components {
            if !cfg.weight.is_finite() || cfg.weight < 0.0 {
                return Err(ScoringError::config_error(format!(
                    "component {} has invalid weight {}",
                    component.name(),
                    cfg.weight
                )));
            }
            if let Some(unknown) = cfg.features.iter().find(|f| !known_feature(f)) {
                return Err(ScoringError::config_error(format!(
                    "component {} references unknown feature '{unknown}'",
                    component.name()
                )));
            }
            if cfg.features.is_empty() {
                tracing::warn!("Component {} has no features and will score 0", component.name());
            }
            sum += cfg.weight;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ScoringError::config_error(format!(
                "component weights sum to {sum}, expected 1.0"
            )));
        }

        if !(0.0..=1.0).contains(&self.degenerate_fill) {
            return Err(ScoringError::config_error(format!(
                "degenerate_fill {} outside [0, 1]",
                self.degenerate_fill
            )));
        }

        for boost in &self.boosts {
            if !known_feature(&boost.feature) {
                return Err(ScoringError::config_error(format!(
                    "boost references unknown feature '{}'",
                    boost.feature
                )));
            }
            if !boost.multiplier.is_finite() || boost.multiplier < 0.0 {
                return Err(ScoringError::config_error(format!(
                    "boost on {} has invalid multiplier {}",
                    boost.feature, boost.multiplier
                )));
            }
        }
        Ok(())
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.burst_window_secs < 0 {
            return Err(ScoringError::config_error("burst_window_secs must be >= 0"));
        }
        if !self.min_span_days.is_finite() || self.min_span_days <= 0.0 {
            return Err(ScoringError::config_error("min_span_days must be > 0"));
        }
        Ok(())
    }
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.contamination) {
            return Err(ScoringError::config_error(format!(
                "contamination {} outside [0, 0.5]",
                self.contamination
            )));
        }
        if self.n_trees == 0 {
            return Err(ScoringError::config_error("n_trees must be >= 1"));
        }
        if self.sample_size < 2 {
            return Err(ScoringError::config_error("sample_size must be >= 2"));
        }
        let magnitude = match self.boost {
            AnomalyBoost::Multiplicative { factor } => factor,
            AnomalyBoost::Additive { points } => points,
        };
        if !magnitude.is_finite() {
            return Err(ScoringError::config_error("anomaly boost must be finite"));
        }
        Ok(())
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ScoringError::config_error("k must be >= 1"));
        }
        if self.n_init == 0 || self.max_iter == 0 {
            return Err(ScoringError::config_error("n_init and max_iter must be >= 1"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ScoringError::config_error("tolerance must be >= 0"));
        }
        if let ClusterAdjustment::Deviation { scale } = self.adjustment {
            if !scale.is_finite() {
                return Err(ScoringError::config_error("deviation scale must be finite"));
            }
        }
        Ok(())
    }
}
