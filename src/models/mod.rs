//! Unsupervised models fit once per batch.
//!
//! Both stages are pure functions of the normalized matrix, their config and a seed.
//! They return fresh outcomes; no fitted model outlives the run that produced it.

pub mod anomaly;
pub mod cluster;
pub mod isolation;
pub mod kmeans;

use serde::{Deserialize, Serialize};

use crate::config::AnomalyBoost;

pub use anomaly::detect_anomalies;
pub use cluster::adjust_by_cluster;

/// How a model stage ran for this batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Applied,
    Disabled,
    /// Fewer clusters than configured because the batch was small.
    Reduced { requested: usize, used: usize },
    Skipped { reason: String },
}

impl StageStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, StageStatus::Reduced { .. } | StageStatus::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyOutcome {
    pub flags: Vec<bool>,
    /// Isolation score per wallet, in (0, 1]; higher is more isolated.
    pub scores: Vec<f64>,
    /// Lowest score that was flagged.
    pub threshold: Option<f64>,
    pub boost: AnomalyBoost,
    pub status: StageStatus,
}

impl AnomalyOutcome {
    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|f| **f).count()
    }

    /// Additive score adjustment for row `i`.
    pub fn adjustment(&self, i: usize, base_score: f64) -> f64 {
        if !self.flags.get(i).copied().unwrap_or(false) {
            return 0.0;
        }
        match self.boost {
            AnomalyBoost::Multiplicative { factor } => base_score * (factor - 1.0),
            AnomalyBoost::Additive { points } => points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: usize,
    pub size: usize,
    pub mean_base_score: f64,
    /// Cluster mean over population mean (1 when the population mean is 0).
    pub relative_risk: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOutcome {
    pub labels: Vec<Option<usize>>,
    pub adjustments: Vec<f64>,
    pub clusters: Vec<ClusterSummary>,
    pub status: StageStatus,
}

impl ClusterOutcome {
    /// No cluster assignment and zero adjustment for every row.
    pub fn without_adjustment(rows: usize, status: StageStatus) -> Self {
        Self {
            labels: vec![None; rows],
            adjustments: vec![0.0; rows],
            clusters: Vec::new(),
            status,
        }
    }
}
