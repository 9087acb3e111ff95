use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use super::isolation::IsolationForest;
use super::{AnomalyOutcome, StageStatus};
use crate::config::AnomalyConfig;
use crate::scoring::NormalizedMatrix;

/// Fit an isolation forest on the batch and flag the `round(contamination * n)` most
/// isolated wallets. Score ties go to the lower row index.
pub fn detect_anomalies(matrix: &NormalizedMatrix, config: &AnomalyConfig, seed: u64) -> AnomalyOutcome {
    let n = matrix.len();
    let idle = |status: StageStatus| AnomalyOutcome {
        flags: vec![false; n],
        scores: vec![0.0; n],
        threshold: None,
        boost: config.boost,
        status,
    };

    if !config.enabled {
        return idle(StageStatus::Disabled);
    }
    if n < config.min_batch.max(2) {
        warn!("Anomaly detection skipped: batch of {n} wallets is too small");
        return idle(StageStatus::Skipped {
            reason: format!("batch of {n} wallets below minimum {}", config.min_batch.max(2)),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let forest = IsolationForest::fit(&matrix.rows, config.n_trees, config.sample_size, &mut rng);
    let scores: Vec<f64> = matrix.rows.iter().map(|row| forest.score(row)).collect();

    let target = ((config.contamination * n as f64).round() as usize).min(n);
    let mut ranked: Vec<usize> = (0..n).collect();
    ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));

    let mut flags = vec![false; n];
    for &i in ranked.iter().take(target) {
        flags[i] = true;
    }
    let threshold = target.checked_sub(1).map(|last| scores[ranked[last]]);

    info!(
        "Isolation forest flagged {target} of {n} wallets (contamination {:.3})",
        config.contamination
    );

    AnomalyOutcome {
        flags,
        scores,
        threshold,
        boost: config.boost,
        status: StageStatus::Applied,
    }
}
