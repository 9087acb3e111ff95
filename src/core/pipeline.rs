use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::core::{RiskScoreRecord, TransactionRecord, WalletScore};
use crate::error::{Result, ScoringError};
use crate::features::{build_feature_matrix, group_by_wallet, FeatureMatrix};
use crate::models::{adjust_by_cluster, detect_anomalies, ClusterSummary, StageStatus};
use crate::scoring::{compose_scores, normalize, score_components};

/// Everything one run scores together. Normalization, contamination and clustering are
/// all relative to this set.
#[derive(Debug, Clone, Default)]
pub struct ScoringBatch {
    pub transactions: Vec<TransactionRecord>,
    /// Wallets to score even if they have no transactions.
    pub wallets: Vec<String>,
}

/// Output of a complete run. Only ever built once both models have been fit on the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRun {
    pub seed: u64,
    pub scores: Vec<WalletScore>,
    pub anomaly_status: StageStatus,
    pub anomaly_threshold: Option<f64>,
    pub cluster_status: StageStatus,
    pub clusters: Vec<ClusterSummary>,
}

impl ScoringRun {
    pub fn records(&self) -> Vec<RiskScoreRecord> {
        self.scores.iter().map(RiskScoreRecord::from).collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.anomaly_status.is_degraded() || self.cluster_status.is_degraded()
    }
}

/// Phase one only: raw features for every wallet in the batch.
pub async fn extract_features(batch: ScoringBatch, config: &Config) -> Result<FeatureMatrix> {
    config.validate()?;
    let groups = group_by_wallet(batch.transactions, &batch.wallets);
    if groups.is_empty() {
        return Err(ScoringError::EmptyBatch);
    }
    build_feature_matrix(groups, &config.features, config.worker_count()).await
}

/// Run the pipeline: per-wallet features, then the population-wide stages.
pub async fn run_pipeline(batch: ScoringBatch, config: &Config) -> Result<ScoringRun> {
    info!(
        "Pipeline started: {} transactions, {} listed wallets",
        batch.transactions.len(),
        batch.wallets.len()
    );
    let matrix = extract_features(batch, config).await?;
    score_matrix(matrix, config).await
}

/// Phase two. Needs the complete feature matrix; anomaly detection and clustering run
/// concurrently and both finish before any final score is composed.
pub async fn score_matrix(matrix: FeatureMatrix, config: &Config) -> Result<ScoringRun> {
    config.validate()?;
    if matrix.is_empty() {
        return Err(ScoringError::EmptyBatch);
    }
    let seed = config.run.seed;
    let normalized = Arc::new(normalize(&matrix, config.scoring.degenerate_fill));
    let bases = score_components(&normalized, &config.scoring)?;
    let base_values: Vec<f64> = bases.iter().map(|b| b.base_score).collect();

    let anomaly_task = {
        let matrix = Arc::clone(&normalized);
        let anomaly_config = config.anomaly.clone();
        tokio::task::spawn_blocking(move || detect_anomalies(&matrix, &anomaly_config, seed))
    };
    let cluster_task = {
        let matrix = Arc::clone(&normalized);
        let cluster_config = config.clustering.clone();
        tokio::task::spawn_blocking(move || {
            adjust_by_cluster(&matrix, &base_values, &cluster_config, seed)
        })
    };
    let (anomaly, clusters) = tokio::try_join!(anomaly_task, cluster_task)?;

    let flagged = anomaly.flagged_count();
    let scores = compose_scores(&normalized.wallets, &bases, &anomaly, &clusters);

    let run = ScoringRun {
        seed,
        scores,
        anomaly_status: anomaly.status,
        anomaly_threshold: anomaly.threshold,
        cluster_status: clusters.status,
        clusters: clusters.clusters,
    };
    if run.is_degraded() {
        warn!(
            "Degraded run: anomaly={:?} clustering={:?}",
            run.anomaly_status, run.cluster_status
        );
    }
    info!(
        "Pipeline finished: {} wallets scored, {flagged} anomalous",
        run.scores.len()
    );
    Ok(run)
}

/// Run with an optional overall deadline. An expired deadline yields no scores at all.
pub async fn run_with_deadline(
    batch: ScoringBatch,
    config: &Config,
    deadline: Option<Duration>,
) -> Result<ScoringRun> {
    with_deadline(deadline, run_pipeline(batch, config)).await
}

/// A zero deadline has already expired and `work` is never polled.
pub async fn with_deadline<T, F>(deadline: Option<Duration>, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => work.await,
        Some(limit) if limit.is_zero() => Err(ScoringError::DeadlineExceeded(limit)),
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| ScoringError::DeadlineExceeded(limit))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterAdjustment;
    use crate::core::RiskCategory;
    use crate::features::tests::make_tx;
    use crate::store::{write_breakdown, write_scores, LoadReport, RunReport};

    const DAY: i64 = 86_400;

    fn tx(wallet: &str, to: &str, value: f64, ts: i64) -> TransactionRecord {
        let mut tx = make_tx(to, value, ts);
        tx.wallet_address = wallet.to_string();
        tx.from = wallet.to_string();
        tx
    }

    /// W1: 100 daily transactions spread over four pools. W2: five zero-value calls to
    /// one pool within minutes. W3: a single transaction.
    fn three_wallets() -> ScoringBatch {
        let pools = ["0xpool0", "0xpool1", "0xpool2", "0xpool3"];
        let mut transactions: Vec<TransactionRecord> = (0..100)
            .map(|i| tx("0xw1", pools[i as usize % 4], (i % 10 + 1) as f64, 1_600_000_000 + i * DAY))
            .collect();
        transactions.extend((0..5).map(|i| tx("0xw2", "0xpool0", 0.0, 1_600_000_000 + i * 60)));
        transactions.push(tx("0xw3", "0xpool1", 2.0, 1_600_000_000));
        ScoringBatch {
            transactions,
            wallets: Vec::new(),
        }
    }

    fn score_of<'a>(run: &'a ScoringRun, wallet: &str) -> &'a WalletScore {
        run.scores.iter().find(|s| s.wallet_id == wallet).unwrap()
    }

    fn csv_bytes(run: &ScoringRun) -> Vec<u8> {
        let mut out = Vec::new();
        write_scores(&mut out, &run.records(), true).unwrap();
        write_breakdown(&mut out, &run.scores).unwrap();
        out
    }

    #[tokio::test]
    async fn three_wallet_scenario() {
        let config = Config::default();
        let matrix = extract_features(three_wallets(), &config).await.unwrap();
        let w2 = &matrix.rows[1];
        assert_eq!(w2.wallet_id, "0xw2");
        assert_eq!(w2.zero_value_ratio, 1.0);
        assert_eq!(w2.recipient_concentration, 1.0);
        let w3 = &matrix.rows[2];
        assert_eq!(w3.transaction_frequency, 0.0);

        let run = score_matrix(matrix, &config).await.unwrap();
        let w1 = score_of(&run, "0xw1");
        let w2 = score_of(&run, "0xw2");
        assert!(
            w2.components.behavioral > w1.components.behavioral + 0.5,
            "w1 {} w2 {}",
            w1.components.behavioral,
            w2.components.behavioral
        );
        for scored in &run.scores {
            assert!(scored.score <= 1000);
            assert_eq!(scored.category, RiskCategory::from_score(scored.score));
        }
        // Three wallets cannot fill five clusters.
        assert!(matches!(run.cluster_status, StageStatus::Reduced { used: 3, .. }));
        assert!(run.is_degraded());
    }

    #[tokio::test]
    async fn identical_batches_give_identical_bytes() {
        let config = Config::default();
        let first = run_pipeline(three_wallets(), &config).await.unwrap();
        let second = run_pipeline(three_wallets(), &config).await.unwrap();
        assert_eq!(csv_bytes(&first), csv_bytes(&second));
    }

    #[tokio::test]
    async fn worker_count_does_not_change_output() {
        let mut config = Config::default();
        config.run.workers = 1;
        let serial = run_pipeline(three_wallets(), &config).await.unwrap();
        config.run.workers = 3;
        let parallel = run_pipeline(three_wallets(), &config).await.unwrap();
        assert_eq!(serial, parallel);
    }

    #[tokio::test]
    async fn idle_wallets_score_from_defaults() {
        let batch = ScoringBatch {
            transactions: Vec::new(),
            wallets: vec!["0xidle1".into(), "0xidle2".into()],
        };
        let run = run_pipeline(batch, &Config::default()).await.unwrap();
        // Every column is constant, so each normalizes to 0.5.
        for scored in &run.scores {
            assert!((scored.base_score - 500.0).abs() < 1e-9);
            assert_eq!(scored.score, 500);
            assert_eq!(scored.category, RiskCategory::Medium);
        }
    }

    #[tokio::test]
    async fn idle_wallet_in_mixed_batch_is_reproducible() {
        let mut batch = three_wallets();
        batch.wallets.push("0xidle".into());
        let config = Config::default();
        let a = run_pipeline(batch.clone(), &config).await.unwrap();
        let b = run_pipeline(batch, &config).await.unwrap();
        let idle_a = score_of(&a, "0xidle");
        assert_eq!(idle_a, score_of(&b, "0xidle"));
        assert_eq!(idle_a.components.volume, 0.0);
    }

    #[tokio::test]
    async fn adding_a_wallet_moves_other_scores() {
        let mut config = Config::default();
        config.anomaly.enabled = false;
        config.clustering.adjustment = ClusterAdjustment::None;

        let mut ab: Vec<TransactionRecord> =
            (0..10).map(|i| tx("0xa", "0xpool", 1.0, i * DAY)).collect();
        ab.extend((0..2).map(|i| tx("0xb", "0xpool", 5.0, i * DAY)));
        let mut abc = ab.clone();
        abc.extend((0..50).map(|i| tx("0xc", "0xpool", 100.0, i * DAY)));

        let run_ab = run_pipeline(ScoringBatch { transactions: ab, wallets: vec![] }, &config)
            .await
            .unwrap();
        let run_abc = run_pipeline(ScoringBatch { transactions: abc, wallets: vec![] }, &config)
            .await
            .unwrap();

        let a_before = score_of(&run_ab, "0xa");
        let a_after = score_of(&run_abc, "0xa");
        assert!((a_before.base_score - a_after.base_score).abs() > 10.0);
        assert_ne!(a_before.score, a_after.score);
    }

    #[tokio::test]
    async fn flag_rate_tracks_contamination() {
        let mut transactions = Vec::new();
        for w in 0..400i64 {
            let wallet = format!("0x{w:04}");
            let count = 1 + (w * 7919) % 13;
            for i in 0..count {
                let value = ((w * 31 + i * 17) % 23) as f64;
                transactions.push(tx(&wallet, &format!("0xpool{}", (w + i) % 3), value, i * (3600 + w * 97)));
            }
        }
        let config = Config::default();
        let run = run_pipeline(ScoringBatch { transactions, wallets: vec![] }, &config)
            .await
            .unwrap();
        let flagged = run.scores.iter().filter(|s| s.is_anomaly).count();
        assert_eq!(flagged, 20);
        assert!(run.scores.iter().all(|s| s.score <= 1000));
    }

    #[tokio::test]
    async fn empty_batch_is_an_error() {
        let err = run_pipeline(ScoringBatch::default(), &Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::EmptyBatch));
    }

    #[tokio::test]
    async fn score_matrix_validates_config() {
        let valid = Config::default();
        let matrix = extract_features(three_wallets(), &valid).await.unwrap();

        let mut zero_k = Config::default();
        zero_k.clustering.k = 0;
        let err = score_matrix(matrix.clone(), &zero_k).await.unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));

        let mut bad_weights = Config::default();
        for component in bad_weights.scoring.components.values_mut() {
            component.weight = 0.5;
        }
        let err = score_matrix(matrix, &bad_weights).await.unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));
    }

    #[tokio::test]
    async fn absurd_timestamps_do_not_abort_the_batch() {
        let export = "\
wallet_address,from,to,value,gas,gasPrice,gasUsed,timeStamp
0xa,0xa,0xpool,1000000000000000000,1,1,1,-9000000000000000000
0xa,0xa,0xpool,1000000000000000000,1,1,1,9000000000000000000
0xa,0xa,0xpool,1000000000000000000,1,1,1,1600000000
0xb,0xb,0xpool,0,1,1,1,1600000600
";
        let (transactions, load) =
            crate::store::read_transactions(export.as_bytes(), &crate::config::InputConfig::default())
                .unwrap();
        assert_eq!(load.suspect_rows.len(), 2);

        let batch = ScoringBatch {
            transactions,
            wallets: vec![],
        };
        let run = run_pipeline(batch, &Config::default()).await.unwrap();
        assert_eq!(run.scores.len(), 2);
        assert!(run.scores.iter().all(|s| s.score <= 1000));
    }

    #[tokio::test]
    async fn invalid_weights_fail_before_scoring() {
        let mut config = Config::default();
        for component in config.scoring.components.values_mut() {
            component.weight = 0.3;
        }
        let err = run_pipeline(three_wallets(), &config).await.unwrap_err();
        assert!(matches!(err, ScoringError::Config(_)));
    }

    #[tokio::test]
    async fn slow_work_is_abandoned_at_deadline() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let err = with_deadline(Some(Duration::from_millis(10)), slow).await.unwrap_err();
        assert!(matches!(err, ScoringError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn zero_deadline_yields_no_run() {
        let result = run_with_deadline(three_wallets(), &Config::default(), Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(ScoringError::DeadlineExceeded(d)) if d.is_zero()));
    }

    #[tokio::test]
    async fn large_batch_times_out_as_a_whole() {
        let mut transactions = Vec::new();
        for w in 0..1500i64 {
            let wallet = format!("0x{w:05}");
            for i in 0..40i64 {
                transactions.push(tx(&wallet, "0xpool", ((w + i) % 17) as f64, i * 600 + w));
            }
        }
        let batch = ScoringBatch {
            transactions,
            wallets: vec![],
        };
        let result = run_with_deadline(batch, &Config::default(), Some(Duration::from_millis(1))).await;
        assert!(matches!(result, Err(ScoringError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn generous_deadline_completes() {
        let run = run_with_deadline(three_wallets(), &Config::default(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(run.records().len(), 3);
    }

    #[tokio::test]
    async fn report_summarises_run() {
        let run = run_pipeline(three_wallets(), &Config::default()).await.unwrap();
        let load = LoadReport {
            rows_read: 106,
            records: 106,
            ..Default::default()
        };
        let report = RunReport::new(&run, &load);
        assert_eq!(report.wallets, 3);
        assert_eq!(report.transactions, 106);
        assert_eq!(report.categories.values().sum::<usize>(), 3);
        assert!(report.degraded);

        let mut out = Vec::new();
        report.write_json(&mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["seed"], 42);
        assert_eq!(value["clustering"]["status"], "reduced");
    }
}
