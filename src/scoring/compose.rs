use super::components::{BaseScore, MAX_SCORE};
use crate::core::{RiskCategory, WalletScore};
use crate::models::{AnomalyOutcome, ClusterOutcome};

/// `round(clip(base + anomaly + cluster, 0, 1000))`
pub fn final_score(base: f64, anomaly_adjustment: f64, cluster_adjustment: f64) -> u16 {
    let raw = base + anomaly_adjustment + cluster_adjustment;
    if !raw.is_finite() {
        return 0;
    }
    raw.clamp(0.0, MAX_SCORE).round() as u16
}

/// Merge the base scores with both fitted models. All inputs come from the same batch
/// and share row order.
pub fn compose_scores(
    wallets: &[String],
    bases: &[BaseScore],
    anomaly: &AnomalyOutcome,
    clusters: &ClusterOutcome,
) -> Vec<WalletScore> {
    wallets
        .iter()
        .zip(bases)
        .enumerate()
        .map(|(i, (wallet, base))| {
            let is_anomaly = anomaly.flags.get(i).copied().unwrap_or(false);
            let anomaly_adjustment = anomaly.adjustment(i, base.base_score);
            let cluster_adjustment = clusters.adjustments.get(i).copied().unwrap_or(0.0);
            let score = final_score(base.base_score, anomaly_adjustment, cluster_adjustment);

            WalletScore {
                wallet_id: wallet.clone(),
                components: base.components.clone(),
                base_score: base.base_score,
                is_anomaly,
                anomaly_score: anomaly.scores.get(i).copied().unwrap_or(0.0),
                cluster: clusters.labels.get(i).copied().flatten(),
                anomaly_adjustment,
                cluster_adjustment,
                score,
                category: RiskCategory::from_score(score),
            }
        })
        .collect()
}
