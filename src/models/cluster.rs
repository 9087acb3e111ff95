use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use super::kmeans::{self, KMeansParams};
use super::{ClusterOutcome, ClusterSummary, StageStatus};
use crate::config::{ClusterAdjustment, ClusterConfig};
use crate::scoring::NormalizedMatrix;

/// Partition the batch with k-means and derive each wallet's adjustment from how its
/// cluster's mean base score compares to the population mean.
///
/// A batch smaller than `k` runs with `k = n`; an empty batch or a fit that never
/// converges leaves every adjustment at 0.
pub fn adjust_by_cluster(
    matrix: &NormalizedMatrix,
    base_scores: &[f64],
    config: &ClusterConfig,
    seed: u64,
) -> ClusterOutcome {
    let n = matrix.len();
    if !config.enabled {
        return ClusterOutcome::without_adjustment(n, StageStatus::Disabled);
    }
    if n == 0 {
        return ClusterOutcome::without_adjustment(
            n,
            StageStatus::Skipped {
                reason: "empty batch".to_string(),
            },
        );
    }
    if config.k == 0 {
        warn!("Clustering skipped: k is 0");
        return ClusterOutcome::without_adjustment(
            n,
            StageStatus::Skipped {
                reason: "k is 0".to_string(),
            },
        );
    }

    let k = config.k.min(n);
    if k < config.k {
        warn!("Batch of {n} wallets is smaller than k={}, clustering with k={k}", config.k);
    }

    let params = KMeansParams {
        k,
        n_init: config.n_init,
        max_iter: config.max_iter,
        tolerance: config.tolerance,
    };
    let fit = kmeans::fit(&matrix.rows, params, &mut StdRng::seed_from_u64(seed));
    if !fit.converged {
        warn!("k-means did not converge in {} iterations, skipping cluster adjustment", config.max_iter);
        return ClusterOutcome::without_adjustment(
            n,
            StageStatus::Skipped {
                reason: format!("k-means did not converge within {} iterations", config.max_iter),
            },
        );
    }

    let population_mean = mean(base_scores);
    let clusters: Vec<ClusterSummary> = (0..k)
        .map(|id| {
            let members: Vec<f64> = fit
                .labels
                .iter()
                .zip(base_scores)
                .filter(|(label, _)| **label == id)
                .map(|(_, score)| *score)
                .collect();
            let mean_base_score = mean(&members);
            let relative_risk = if population_mean > 0.0 {
                mean_base_score / population_mean
            } else {
                1.0
            };
            ClusterSummary {
                id,
                size: members.len(),
                mean_base_score,
                relative_risk,
            }
        })
        .collect();

    let adjustments = fit
        .labels
        .iter()
        .zip(base_scores)
        .map(|(&label, &base)| {
            let cluster = &clusters[label];
            match config.adjustment {
                ClusterAdjustment::Ratio => base * (cluster.relative_risk - 1.0),
                ClusterAdjustment::Deviation { scale } => {
                    scale * (cluster.mean_base_score - population_mean)
                }
                ClusterAdjustment::None => 0.0,
            }
        })
        .collect();

    info!(
        "Clustered {n} wallets into {k} groups (inertia {:.4}, {} iterations)",
        fit.inertia, fit.iterations
    );

    let status = if k < config.k {
        StageStatus::Reduced {
            requested: config.k,
            used: k,
        }
    } else {
        StageStatus::Applied
    };

    ClusterOutcome {
        labels: fit.labels.into_iter().map(Some).collect(),
        adjustments,
        clusters,
        status,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
