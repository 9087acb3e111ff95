use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::LoadReport;
use crate::core::pipeline::ScoringRun;
use crate::core::RiskCategory;
use crate::error::Result;
use crate::models::{ClusterSummary, StageStatus};

/// Summary of one scoring run, written next to the scores.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub wallets: usize,
    pub transactions: usize,
    pub suspect_rows: usize,
    pub unattributed_rows: usize,
    pub anomalies: usize,
    pub anomaly: StageStatus,
    pub anomaly_threshold: Option<f64>,
    pub clustering: StageStatus,
    pub clusters: Vec<ClusterSummary>,
    pub categories: BTreeMap<&'static str, usize>,
    pub mean_score: f64,
    pub degraded: bool,
}

impl RunReport {
    pub fn new(run: &ScoringRun, load: &LoadReport) -> Self {
        let mut categories: BTreeMap<&'static str, usize> =
            RiskCategory::ALL.iter().map(|c| (c.label(), 0)).collect();
        for scored in &run.scores {
            *categories.entry(scored.category.label()).or_insert(0) += 1;
        }
        let mean_score = if run.scores.is_empty() {
            0.0
        } else {
            run.scores.iter().map(|s| s.score as f64).sum::<f64>() / run.scores.len() as f64
        };

        Self {
            generated_at: Utc::now(),
            seed: run.seed,
            wallets: run.scores.len(),
            transactions: load.records,
            suspect_rows: load.suspect_rows.len(),
            unattributed_rows: load.unattributed.len(),
            anomalies: run.scores.iter().filter(|s| s.is_anomaly).count(),
            anomaly: run.anomaly_status.clone(),
            anomaly_threshold: run.anomaly_threshold,
            clustering: run.cluster_status.clone(),
            clusters: run.clusters.clone(),
            categories,
            mean_score,
            degraded: run.is_degraded(),
        }
    }

    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}
