pub mod report;
pub mod schema;

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::DateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::InputConfig;
use crate::core::{Component, ProtocolVersion, RiskScoreRecord, TransactionRecord, WalletScore};
use crate::error::Result;
use crate::features::FeatureMatrix;

pub use report::RunReport;

/// Individual suspect rows logged before switching to a summary.
const SUSPECT_LOG_LIMIT: usize = 10;

/// A row whose fields had to be coerced to defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspectRow {
    pub line: u64,
    pub wallet: String,
    pub fields: Vec<&'static str>,
}

/// What happened while reading a transaction export.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub records: usize,
    /// Rows with neither a wallet address nor a sender; they cannot be attributed.
    pub unattributed: Vec<u64>,
    pub suspect_rows: Vec<SuspectRow>,
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
            .collect();
        Self { index }
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> Option<&'r str> {
        self.index
            .get(name)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }
}

/// Tracks the fields coerced for one row.
#[derive(Default)]
struct Coercions(Vec<&'static str>);

impl Coercions {
    fn float(&mut self, raw: Option<&str>, field: &'static str) -> f64 {
        match raw.and_then(|v| v.parse::<f64>().ok()) {
            Some(v) if v.is_finite() && v >= 0.0 => v,
            _ => {
                self.0.push(field);
                0.0
            }
        }
    }

    fn unsigned(&mut self, raw: Option<&str>, field: &'static str) -> u64 {
        if let Some(v) = raw.and_then(|v| v.parse::<u64>().ok()) {
            return v;
        }
        self.float(raw, field) as u64
    }

    /// Epoch seconds, float seconds or RFC 3339. Values outside chrono's range are malformed.
    fn timestamp(&mut self, raw: Option<&str>) -> i64 {
        let parsed = raw
            .and_then(|v| {
                v.parse::<i64>()
                    .ok()
                    .or_else(|| v.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
                    .or_else(|| DateTime::parse_from_rfc3339(v).ok().map(|dt| dt.timestamp()))
            })
            .filter(|secs| DateTime::from_timestamp(*secs, 0).is_some());
        parsed.unwrap_or_else(|| {
            self.0.push("timeStamp");
            0
        })
    }

    fn flag(&mut self, raw: Option<&str>, field: &'static str) -> bool {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(_) => {
                self.0.push(field);
                false
            }
        }
    }
}

/// Parse a transaction export. Missing or malformed numeric fields become 0 and the row
/// is reported as suspect; they never abort the batch.
pub fn read_transactions<R: Read>(
    reader: R,
    input: &InputConfig,
) -> Result<(Vec<TransactionRecord>, LoadReport)> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = Columns::new(csv_reader.headers()?);
    let value_scale = 10f64.powi(input.value_decimals as i32);

    let mut records = Vec::new();
    let mut report = LoadReport::default();

    for row in csv_reader.records() {
        let row = row?;
        report.rows_read += 1;
        let line = row.position().map(|p| p.line()).unwrap_or(report.rows_read as u64 + 1);

        let lower = |name: &str| columns.get(&row, name).map(str::to_ascii_lowercase);
        let from = lower(schema::FROM).unwrap_or_default();
        let Some(wallet) = lower(schema::WALLET_ADDRESS).or_else(|| (!from.is_empty()).then(|| from.clone())) else {
            warn!("Row at line {line} has no wallet address or sender, skipping");
            report.unattributed.push(line);
            continue;
        };

        let mut coerced = Coercions::default();
        let value = coerced.float(columns.get(&row, schema::VALUE), "value") / value_scale;
        let gas = coerced.unsigned(columns.get(&row, schema::GAS), "gas");
        let gas_price = coerced.unsigned(columns.get(&row, schema::GAS_PRICE), "gasPrice");
        let gas_used = coerced.unsigned(columns.get(&row, schema::GAS_USED), "gasUsed");
        let timestamp = coerced.timestamp(columns.get(&row, schema::TIMESTAMP));
        let failed = coerced.flag(columns.get(&row, schema::IS_ERROR), "isError");
        let reverted = columns.get(&row, schema::RECEIPT_STATUS) == Some("0");

        let function = columns
            .get(&row, schema::FUNCTION_NAME)
            .or_else(|| columns.get(&row, schema::METHOD_ID).filter(|m| *m != "0x"))
            .unwrap_or_default()
            .to_string();

        if !coerced.0.is_empty() {
            if report.suspect_rows.len() < SUSPECT_LOG_LIMIT {
                warn!("Line {line} ({wallet}): coerced {:?} to defaults", coerced.0);
            }
            report.suspect_rows.push(SuspectRow {
                line,
                wallet: wallet.clone(),
                fields: coerced.0,
            });
        }

        records.push(TransactionRecord {
            wallet_address: wallet,
            from,
            to: lower(schema::TO).unwrap_or_default(),
            value,
            gas,
            gas_price,
            gas_used,
            timestamp,
            is_error: failed || reverted,
            function,
            protocol_version: columns
                .get(&row, schema::PROTOCOL_VERSION)
                .map(ProtocolVersion::parse)
                .unwrap_or_default(),
        });
    }

    report.records = records.len();
    if report.suspect_rows.len() > SUSPECT_LOG_LIMIT {
        warn!("{} rows in total had fields coerced to defaults", report.suspect_rows.len());
    }
    Ok((records, report))
}

pub fn load_transactions(
    path: &Path,
    input: &InputConfig,
) -> Result<(Vec<TransactionRecord>, LoadReport)> {
    let (records, report) = read_transactions(File::open(path)?, input)?;
    info!(
        "Loaded {} transactions from {} ({} suspect rows)",
        records.len(),
        path.display(),
        report.suspect_rows.len()
    );
    Ok((records, report))
}

/// Read a wallet list: the `wallet_id` column, or the first column without one. The header
/// row is optional; a first row that starts with an address is read as data.
pub fn read_wallets<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut column = 0;
    let mut wallets = Vec::new();
    for (i, row) in csv_reader.records().enumerate() {
        let row = row?;
        if i == 0 {
            if let Some(named) = row.iter().position(|h| h.eq_ignore_ascii_case(schema::WALLET_ID)) {
                column = named;
                continue;
            }
            if !row.get(0).is_some_and(looks_like_address) {
                continue;
            }
        }
        if let Some(wallet) = row.get(column).map(str::trim).filter(|w| !w.is_empty()) {
            wallets.push(wallet.to_ascii_lowercase());
        }
    }
    wallets.sort();
    wallets.dedup();
    Ok(wallets)
}

fn looks_like_address(cell: &str) -> bool {
    cell.len() > 2 && cell.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"))
}

pub fn load_wallets(path: &Path) -> Result<Vec<String>> {
    let wallets = read_wallets(File::open(path)?)?;
    info!("Loaded {} wallets from {}", wallets.len(), path.display());
    Ok(wallets)
}

/// `wallet_id,score[,category]`, one row per wallet.
pub fn write_scores<W: Write>(
    writer: W,
    records: &[RiskScoreRecord],
    with_category: bool,
) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header: Vec<&str> = schema::SCORE_HEADER.to_vec();
    if with_category {
        header.push(schema::CATEGORY);
    }
    csv_writer.write_record(&header)?;

    for record in records {
        let score = record.score.to_string();
        let mut row = vec![record.wallet_id.as_str(), score.as_str()];
        if with_category {
            row.push(record.category.label());
        }
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_breakdown<W: Write>(writer: W, scores: &[WalletScore]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(schema::BREAKDOWN_HEADER)?;
    for s in scores {
        let mut row = vec![s.wallet_id.clone(), format!("{:.4}", s.base_score)];
        row.extend(
            Component::ALL
                .iter()
                .map(|component| format!("{:.6}", s.components.get(*component))),
        );
        row.extend([
            s.is_anomaly.to_string(),
            format!("{:.6}", s.anomaly_score),
            s.cluster.map(|c| c.to_string()).unwrap_or_default(),
            format!("{:.4}", s.anomaly_adjustment),
            format!("{:.4}", s.cluster_adjustment),
            s.score.to_string(),
            s.category.label().to_string(),
        ]);
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Raw feature matrix with a `wallet_id` column first.
pub fn write_features<W: Write>(writer: W, matrix: &FeatureMatrix) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![schema::WALLET_ID];
    header.extend_from_slice(matrix.column_names());
    csv_writer.write_record(&header)?;

    for features in &matrix.rows {
        let mut row = vec![features.wallet_id.clone()];
        row.extend(features.to_row().iter().map(|v| format!("{v:.6}")));
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write into `path` through a buffered file.
pub fn write_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(std::io::BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    write(std::io::BufWriter::new(File::create(path)?))?;
    info!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ComponentScores, RiskCategory};

    const EXPORT: &str = "\
blockNumber,timeStamp,hash,from,to,value,gas,gasPrice,isError,txreceipt_status,gasUsed,methodId,functionName,wallet_address,protocol_version
1,1600000000,0xh1,0xABC,0xpool,1000000000000000000,300000,20000000000,0,1,150000,0xa0712d68,\"mint(uint256 mintAmount, address to)\",0xAbC,V2
2,1600003600,0xh2,0xabc,0xpool,0,210000,,0,0,90000,0x,,0xabc,V3
3,oops,0xh3,0xabc,0xpool,-5,abc,1,1,1,1,0x852a12e3,,0xabc,V2
";

    fn read(input: &str) -> (Vec<TransactionRecord>, LoadReport) {
        read_transactions(input.as_bytes(), &InputConfig::default()).unwrap()
    }

    #[test]
    fn parses_export_rows() {
        let (records, report) = read(EXPORT);
        assert_eq!(report.rows_read, 3);
        assert_eq!(records.len(), 3);

        let first = &records[0];
        assert_eq!(first.wallet_address, "0xabc");
        assert_eq!(first.from, "0xabc");
        assert!((first.value - 1.0).abs() < 1e-12);
        assert_eq!(first.gas_price, 20_000_000_000);
        assert_eq!(first.timestamp, 1_600_000_000);
        assert_eq!(first.function, "mint(uint256 mintAmount, address to)");
        assert_eq!(first.protocol_version, ProtocolVersion::V2);
        assert!(!first.is_error);
    }

    #[test]
    fn receipt_status_zero_marks_error() {
        let (records, _) = read(EXPORT);
        assert!(records[1].is_error);
        assert_eq!(records[1].function, "");
        assert_eq!(records[1].protocol_version, ProtocolVersion::V3);
    }

    #[test]
    fn malformed_fields_coerced_and_reported() {
        let (records, report) = read(EXPORT);
        let third = &records[2];
        assert_eq!(third.value, 0.0);
        assert_eq!(third.gas, 0);
        assert_eq!(third.timestamp, 0);
        assert!(third.is_error);
        assert_eq!(third.function, "0x852a12e3");

        assert_eq!(report.suspect_rows.len(), 2);
        assert_eq!(report.suspect_rows[0].fields, vec!["gasPrice"]);
        assert_eq!(report.suspect_rows[1].fields, vec!["value", "gas", "timeStamp"]);
    }

    #[test]
    fn missing_wallet_falls_back_to_sender() {
        let (records, report) = read("from,to,value\n0xSender,0xpool,5\n,0xpool,1\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].wallet_address, "0xsender");
        assert_eq!(report.unattributed.len(), 1);
        // gas, gasPrice, gasUsed and timeStamp are absent
        assert_eq!(report.suspect_rows[0].fields.len(), 4);
    }

    #[test]
    fn rfc3339_timestamps_accepted() {
        let (records, report) = read(
            "wallet_address,timeStamp,value,gas,gasPrice,gasUsed\n0xa,2020-09-13T12:26:40Z,0,1,1,1\n",
        );
        assert_eq!(records[0].timestamp, 1_600_000_000);
        assert!(report.suspect_rows.is_empty());
    }

    #[test]
    fn out_of_range_timestamps_are_suspect() {
        let (records, report) = read(
            "wallet_address,timeStamp,value,gas,gasPrice,gasUsed\n\
             0xa,-9000000000000000000,0,1,1,1\n\
             0xa,9000000000000000000,0,1,1,1\n\
             0xa,1e300,0,1,1,1\n",
        );
        assert!(records.iter().all(|r| r.timestamp == 0));
        assert_eq!(report.suspect_rows.len(), 3);
        assert!(report.suspect_rows.iter().all(|s| s.fields == vec!["timeStamp"]));
    }

    #[test]
    fn wallet_list_reads_named_or_first_column() {
        let named = read_wallets("label,wallet_id\nx,0xB\ny,0xa\nz,0xb\n".as_bytes()).unwrap();
        assert_eq!(named, vec!["0xa", "0xb"]);
        let bare = read_wallets("address\n0xc\n".as_bytes()).unwrap();
        assert_eq!(bare, vec!["0xc"]);
    }

    #[test]
    fn headerless_wallet_list_keeps_first_address() {
        let wallets = read_wallets("0xB\n0xa\n".as_bytes()).unwrap();
        assert_eq!(wallets, vec!["0xa", "0xb"]);
    }

    fn scored(wallet: &str, score: u16) -> WalletScore {
        WalletScore {
            wallet_id: wallet.to_string(),
            components: ComponentScores::default(),
            base_score: score as f64,
            is_anomaly: false,
            anomaly_score: 0.5,
            cluster: Some(1),
            anomaly_adjustment: 0.0,
            cluster_adjustment: 0.0,
            score,
            category: RiskCategory::from_score(score),
        }
    }

    fn records(scores: &[WalletScore]) -> Vec<RiskScoreRecord> {
        scores.iter().map(RiskScoreRecord::from).collect()
    }

    #[test]
    fn writes_score_csv() {
        let mut out = Vec::new();
        write_scores(&mut out, &records(&[scored("0xa", 200), scored("0xb", 850)]), true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "wallet_id,score,category\n0xa,200,Low\n0xb,850,Very High\n");

        let mut out = Vec::new();
        write_scores(&mut out, &records(&[scored("0xa", 199)]), false).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "wallet_id,score\n0xa,199\n");
    }

    #[test]
    fn writes_breakdown_csv() {
        let mut out = Vec::new();
        write_breakdown(&mut out, &[scored("0xa", 420)]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap().split(',').count(), 14);
        let row = lines.next().unwrap();
        assert!(row.starts_with("0xa,420.0000,"));
        assert!(row.ends_with(",420,Medium"));
    }

    #[test]
    fn write_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/scores.csv");
        write_file(&path, |w| write_scores(w, &records(&[scored("0xa", 10)]), true)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("0xa,10,Very Low"));
    }
}
