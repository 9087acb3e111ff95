//! Column names of the CSV files the batch reads and writes.

// Transaction export. Matched case-insensitively.
pub const WALLET_ADDRESS: &str = "wallet_address";
pub const FROM: &str = "from";
pub const TO: &str = "to";
pub const VALUE: &str = "value";
pub const GAS: &str = "gas";
pub const GAS_PRICE: &str = "gasprice";
pub const GAS_USED: &str = "gasused";
pub const TIMESTAMP: &str = "timestamp";
pub const IS_ERROR: &str = "iserror";
pub const RECEIPT_STATUS: &str = "txreceipt_status";
pub const FUNCTION_NAME: &str = "functionname";
pub const METHOD_ID: &str = "methodid";
pub const PROTOCOL_VERSION: &str = "protocol_version";

// Wallet list.
pub const WALLET_ID: &str = "wallet_id";

pub const SCORE_HEADER: [&str; 2] = ["wallet_id", "score"];
pub const CATEGORY: &str = "category";

pub const BREAKDOWN_HEADER: [&str; 14] = [
    "wallet_id",
    "base_score",
    "volume",
    "behavioral",
    "technical",
    "temporal",
    "diversity",
    "is_anomaly",
    "anomaly_score",
    "cluster",
    "anomaly_adjustment",
    "cluster_adjustment",
    "score",
    "category",
];
