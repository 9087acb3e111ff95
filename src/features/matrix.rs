use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{WalletFeatures, FEATURE_NAMES};
use crate::config::FeatureConfig;
use crate::core::TransactionRecord;
use crate::error::{Result, ScoringError};

/// All records attributed to one wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletTransactions {
    pub wallet: String,
    pub transactions: Vec<TransactionRecord>,
}

/// Raw features for every wallet in a batch, rows sorted by wallet id.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub rows: Vec<WalletFeatures>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn wallet_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.wallet_id.as_str())
    }

    /// Dense values, one row per wallet, columns in `FEATURE_NAMES` order.
    pub fn values(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(WalletFeatures::to_row).collect()
    }

    pub fn column_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}

/// Split records by wallet. Wallets listed in `known_wallets` are kept even when they
/// have no records. Records keep their input order inside each wallet.
pub fn group_by_wallet(
    records: Vec<TransactionRecord>,
    known_wallets: &[String],
) -> Vec<WalletTransactions> {
    let mut grouped: BTreeMap<String, Vec<TransactionRecord>> = BTreeMap::new();
    for wallet in known_wallets {
        grouped.entry(wallet.clone()).or_default();
    }
    for record in records {
        grouped
            .entry(record.wallet_address.clone())
            .or_default()
            .push(record);
    }
    grouped
        .into_iter()
        .map(|(wallet, transactions)| WalletTransactions {
            wallet,
            transactions,
        })
        .collect()
}

/// Phase one of a scoring run. Each worker owns a disjoint slice of wallets and returns
/// its own slot; slots are stitched back together in wallet order.
pub async fn build_feature_matrix(
    groups: Vec<WalletTransactions>,
    config: &FeatureConfig,
    workers: usize,
) -> Result<FeatureMatrix> {
    let total = groups.len();
    let workers = workers.max(1).min(total.max(1));
    let chunk_size = total.div_ceil(workers).max(1);
    let config = Arc::new(config.clone());

    let mut slices: Vec<Vec<WalletTransactions>> = Vec::with_capacity(workers);
    let mut remaining = groups.into_iter().peekable();
    while remaining.peek().is_some() {
        slices.push(remaining.by_ref().take(chunk_size).collect());
    }

    let handles: Vec<_> = slices
        .into_iter()
        .enumerate()
        .map(|(slot, slice)| {
            let config = Arc::clone(&config);
            tokio::task::spawn_blocking(move || {
                debug!("Feature worker {slot} processing {} wallets", slice.len());
                slice
                    .iter()
                    .map(|g| WalletFeatures::from_transactions(&g.wallet, &g.transactions, &config))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut rows = Vec::with_capacity(total);
    for (slot, handle) in handles.into_iter().enumerate() {
        let slot_rows = handle
            .await
            .map_err(|e| ScoringError::worker_error(format!("feature worker {slot}: {e}")))?;
        rows.extend(slot_rows);
    }

    info!("Computed features for {} wallets using {workers} workers", rows.len());
    Ok(FeatureMatrix { rows })
}
