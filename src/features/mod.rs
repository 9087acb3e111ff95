pub mod matrix;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConcentrationMeasure, FeatureConfig};
use crate::core::{ProtocolVersion, TransactionRecord};

pub use matrix::{build_feature_matrix, group_by_wallet, FeatureMatrix};

const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
const WEI_PER_ETH: f64 = 1e18;

/// Matrix column order. Every name here is a valid component member.
pub const FEATURE_NAMES: [&str; 23] = [
    "total_transactions",
    "sent_transactions",
    "received_transactions",
    "total_value_sent",
    "total_value_received",
    "avg_transaction_value",
    "max_transaction_value",
    "value_std",
    "zero_value_ratio",
    "error_rate",
    "avg_gas_used",
    "total_gas_cost",
    "avg_time_between_txns_hr",
    "activity_span_days",
    "transaction_frequency",
    "burst_ratio",
    "unique_recipients",
    "unique_senders",
    "recipient_concentration",
    "send_receive_ratio",
    "contract_complexity",
    "function_diversity",
    "v3_share",
];

/// Raw (un-normalized) behaviour of one wallet.
///
/// Ratios lie in [0, 1] and counts are whole numbers. A wallet without transactions
/// yields the all-zero vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WalletFeatures {
    pub wallet_id: String,
    pub total_transactions: u64,
    pub sent_transactions: u64,
    pub received_transactions: u64,
    pub total_value_sent: f64,
    pub total_value_received: f64,
    pub avg_transaction_value: f64,
    pub max_transaction_value: f64,
    pub value_std: f64,
    pub zero_value_ratio: f64,
    pub error_rate: f64,
    pub avg_gas_used: f64,
    /// ETH.
    pub total_gas_cost: f64,
    pub avg_time_between_txns_hr: f64,
    pub activity_span_days: f64,
    pub transaction_frequency: f64,
    pub burst_ratio: f64,
    pub unique_recipients: u64,
    pub unique_senders: u64,
    pub recipient_concentration: f64,
    pub send_receive_ratio: f64,
    pub contract_complexity: u64,
    pub function_diversity: f64,
    pub v3_share: f64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl WalletFeatures {
    /// Aggregate one wallet's transactions. Only `transactions` is read; the result is
    /// independent of record order.
    pub fn from_transactions(
        wallet: &str,
        transactions: &[TransactionRecord],
        config: &FeatureConfig,
    ) -> Self {
        let mut features = WalletFeatures {
            wallet_id: wallet.to_string(),
            ..Default::default()
        };
        if transactions.is_empty() {
            return features;
        }

        let n = transactions.len() as f64;
        let sent: Vec<&TransactionRecord> =
            transactions.iter().filter(|t| t.from == wallet).collect();
        let received: Vec<&TransactionRecord> =
            transactions.iter().filter(|t| t.to == wallet).collect();

        features.total_transactions = transactions.len() as u64;
        features.sent_transactions = sent.len() as u64;
        features.received_transactions = received.len() as u64;
        features.total_value_sent = ordered_sum(sent.iter().map(|t| t.value));
        features.total_value_received = ordered_sum(received.iter().map(|t| t.value));

        let mut values: Vec<f64> = transactions.iter().map(|t| t.value).collect();
        values.sort_by(f64::total_cmp);
        features.avg_transaction_value = values.iter().sum::<f64>() / n;
        features.max_transaction_value = values.iter().cloned().fold(0.0, f64::max);
        features.value_std = sample_std(&values, features.avg_transaction_value);
        features.zero_value_ratio = values.iter().filter(|v| **v == 0.0).count() as f64 / n;

        features.error_rate = transactions.iter().filter(|t| t.is_error).count() as f64 / n;
        // Summed as integers.
        let gas_used: u128 = transactions.iter().map(|t| t.gas_used as u128).sum();
        features.avg_gas_used = gas_used as f64 / n;
        let gas_cost_wei = transactions.iter().fold(0u128, |acc, t| {
            acc.saturating_add((t.gas_used as u128).saturating_mul(t.gas_price as u128))
        });
        features.total_gas_cost = gas_cost_wei as f64 / WEI_PER_ETH;

        features.apply_timing(transactions, config);

        features.unique_recipients = sent.iter().map(|t| t.to.as_str()).collect::<BTreeSet<_>>().len() as u64;
        features.unique_senders = received.iter().map(|t| t.from.as_str()).collect::<BTreeSet<_>>().len() as u64;
        features.recipient_concentration = recipient_concentration(&sent, config.concentration);

        let directional = (sent.len() + received.len()) as f64;
        features.send_receive_ratio = if directional > 0.0 {
            sent.len() as f64 / directional
        } else {
            0.0
        };

        let mut function_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for tx in transactions.iter().filter(|t| !t.function.is_empty()) {
            *function_counts.entry(tx.function.as_str()).or_insert(0) += 1;
        }
        features.contract_complexity = function_counts.len() as u64;
        let invoked: usize = function_counts.values().sum();
        features.function_diversity = match function_counts.values().max() {
            Some(dominant) if invoked > 0 => 1.0 - *dominant as f64 / invoked as f64,
            _ => 0.0,
        };

        features.v3_share = transactions
            .iter()
            .filter(|t| t.protocol_version == ProtocolVersion::V3)
            .count() as f64
            / n;

        features
    }

    /// Timestamp-derived features. Stable sort keeps equal timestamps in record order.
    fn apply_timing(&mut self, transactions: &[TransactionRecord], config: &FeatureConfig) {
        let mut ordered: Vec<&TransactionRecord> = transactions.iter().collect();
        ordered.sort_by_key(|t| t.timestamp);

        self.first_seen = ordered.first().and_then(|t| t.seen_at());
        self.last_seen = ordered.last().and_then(|t| t.seen_at());

        if ordered.len() < 2 {
            return;
        }

        let gaps: Vec<i64> = ordered
            .windows(2)
            .map(|pair| pair[1].timestamp.saturating_sub(pair[0].timestamp))
            .collect();
        let n = ordered.len() as f64;

        self.avg_time_between_txns_hr =
            gaps.iter().map(|gap| *gap as f64).sum::<f64>() / gaps.len() as f64 / SECONDS_PER_HOUR;

        let span_secs = ordered[ordered.len() - 1]
            .timestamp
            .saturating_sub(ordered[0].timestamp);
        self.activity_span_days = span_secs as f64 / SECONDS_PER_DAY;
        self.transaction_frequency = n / self.activity_span_days.max(config.min_span_days);

        let bursty = gaps.iter().filter(|gap| **gap <= config.burst_window_secs).count();
        self.burst_ratio = bursty as f64 / n;
    }

    /// Values in `FEATURE_NAMES` order.
    pub fn to_row(&self) -> Vec<f64> {
        FEATURE_NAMES
            .iter()
            .map(|name| self.value(name).unwrap_or(0.0))
            .collect()
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        let value = match name {
            "total_transactions" => self.total_transactions as f64,
            "sent_transactions" => self.sent_transactions as f64,
            "received_transactions" => self.received_transactions as f64,
            "total_value_sent" => self.total_value_sent,
            "total_value_received" => self.total_value_received,
            "avg_transaction_value" => self.avg_transaction_value,
            "max_transaction_value" => self.max_transaction_value,
            "value_std" => self.value_std,
            "zero_value_ratio" => self.zero_value_ratio,
            "error_rate" => self.error_rate,
            "avg_gas_used" => self.avg_gas_used,
            "total_gas_cost" => self.total_gas_cost,
            "avg_time_between_txns_hr" => self.avg_time_between_txns_hr,
            "activity_span_days" => self.activity_span_days,
            "transaction_frequency" => self.transaction_frequency,
            "burst_ratio" => self.burst_ratio,
            "unique_recipients" => self.unique_recipients as f64,
            "unique_senders" => self.unique_senders as f64,
            "recipient_concentration" => self.recipient_concentration,
            "send_receive_ratio" => self.send_receive_ratio,
            "contract_complexity" => self.contract_complexity as f64,
            "function_diversity" => self.function_diversity,
            "v3_share" => self.v3_share,
            _ => return None,
        };
        Some(value)
    }
}

/// Sum in ascending order so the result does not depend on record order.
fn ordered_sum(values: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    values.iter().sum()
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Share of sent value held by recipients. Falls back to transaction counts when
/// every sent transaction carried zero value.
fn recipient_concentration(sent: &[&TransactionRecord], measure: ConcentrationMeasure) -> f64 {
    if sent.is_empty() {
        return 0.0;
    }
    let total_value = ordered_sum(sent.iter().map(|t| t.value));
    let by_value = total_value > 0.0;

    let mut per_recipient: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for tx in sent {
        let weight = if by_value { tx.value } else { 1.0 };
        per_recipient.entry(tx.to.as_str()).or_default().push(weight);
    }
    let total = if by_value { total_value } else { sent.len() as f64 };

    let shares = per_recipient
        .into_values()
        .map(|weights| ordered_sum(weights.into_iter()) / total);
    let concentration = match measure {
        ConcentrationMeasure::MaxShare => shares.fold(0.0, f64::max),
        ConcentrationMeasure::Herfindahl => shares.map(|s| s * s).sum(),
    };
    concentration.clamp(0.0, 1.0)
}
