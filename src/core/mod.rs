pub mod pipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol generation a transaction's target contract belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProtocolVersion {
    V2,
    V3,
    #[default]
    Unknown,
}

impl ProtocolVersion {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "V2" | "2" => ProtocolVersion::V2,
            "V3" | "3" => ProtocolVersion::V3,
            _ => ProtocolVersion::Unknown,
        }
    }
}

/// One on-chain transaction attributed to a wallet. Read-only to the scoring core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub wallet_address: String,
    pub from: String,
    pub to: String,
    /// Native units (ETH).
    pub value: f64,
    pub gas: u64,
    /// Wei per gas unit.
    pub gas_price: u64,
    pub gas_used: u64,
    /// Epoch seconds.
    pub timestamp: i64,
    pub is_error: bool,
    /// Function name or selector; empty for plain transfers.
    pub function: String,
    pub protocol_version: ProtocolVersion,
}

impl TransactionRecord {
    pub fn seen_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Risk grouping of related features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Volume,
    Behavioral,
    Technical,
    Temporal,
    Diversity,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::Volume,
        Component::Behavioral,
        Component::Technical,
        Component::Temporal,
        Component::Diversity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Volume => "volume",
            Component::Behavioral => "behavioral",
            Component::Technical => "technical",
            Component::Temporal => "temporal",
            Component::Diversity => "diversity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    #[serde(rename = "Very Low")]
    VeryLow, // [0, 200)
    Low, // [200, 400)
    Medium, // [400, 600)
    High, // [600, 800)
    #[serde(rename = "Very High")]
    VeryHigh, // [800, 1000]
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        RiskCategory::VeryLow,
        RiskCategory::Low,
        RiskCategory::Medium,
        RiskCategory::High,
        RiskCategory::VeryHigh,
    ];

    /// Left-closed partition of the score range: 200 is Low, 800 is Very High.
    pub fn from_score(score: u16) -> Self {
        if score >= 800 {
            RiskCategory::VeryHigh
        } else if score >= 600 {
            RiskCategory::High
        } else if score >= 400 {
            RiskCategory::Medium
        } else if score >= 200 {
            RiskCategory::Low
        } else {
            RiskCategory::VeryLow
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskCategory::VeryLow => "Very Low",
            RiskCategory::Low => "Low",
            RiskCategory::Medium => "Medium",
            RiskCategory::High => "High",
            RiskCategory::VeryHigh => "Very High",
        }
    }
}

/// Per-component scores for one wallet, each in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ComponentScores {
    pub volume: f64,
    pub behavioral: f64,
    pub technical: f64,
    pub temporal: f64,
    pub diversity: f64,
}

impl ComponentScores {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::Volume => self.volume,
            Component::Behavioral => self.behavioral,
            Component::Technical => self.technical,
            Component::Temporal => self.temporal,
            Component::Diversity => self.diversity,
        }
    }

    pub fn set(&mut self, component: Component, value: f64) {
        match component {
            Component::Volume => self.volume = value,
            Component::Behavioral => self.behavioral = value,
            Component::Technical => self.technical = value,
            Component::Temporal => self.temporal = value,
            Component::Diversity => self.diversity = value,
        }
    }
}

/// Everything the run knows about one wallet's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletScore {
    pub wallet_id: String,
    pub components: ComponentScores,
    /// 0-1000, before anomaly/cluster adjustment.
    pub base_score: f64,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub cluster: Option<usize>,
    pub anomaly_adjustment: f64,
    pub cluster_adjustment: f64,
    pub score: u16,
    pub category: RiskCategory,
}

/// The published output row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScoreRecord {
    pub wallet_id: String,
    pub score: u16,
    pub category: RiskCategory,
}

impl From<&WalletScore> for RiskScoreRecord {
    fn from(scored: &WalletScore) -> Self {
        Self {
            wallet_id: scored.wallet_id.clone(),
            score: scored.score,
            category: scored.category,
        }
    }
}
