use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use log::debug;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{config_str, Credentials, ExtractConfig, Extractor};
use crate::error::{Result, WaccyError};
use crate::fmt::{parse_amount, parse_date, parse_date_range};
use crate::models::{AccountRecord, ExtractedData, ExtractedTransaction};

/// Reads a QuickBooks Online "General Ledger" report exported as CSV.
///
/// Config keys: `path` (required) and `date_range` (`YYYY-MM-DD to YYYY-MM-DD`, optional).
#[derive(Debug, Default)]
pub struct QuickBooksExtractor {
    realm_id: Option<String>,
}

impl QuickBooksExtractor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Extractor for QuickBooksExtractor {
    fn name(&self) -> &str {
        "QuickBooks Online"
    }

    fn data_source(&self) -> &str {
        "quickbooks"
    }

    /// Needs the company's `realm_id`.
    fn authenticate(&mut self, credentials: &Credentials) -> Result<bool> {
        match credentials.get("realm_id").map(|s| s.trim()) {
            Some(realm) if !realm.is_empty() => {
                self.realm_id = Some(realm.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn extract(&self, config: &ExtractConfig) -> Result<ExtractedData> {
        let realm_id = self.realm_id.as_deref().ok_or_else(|| {
            WaccyError::Extraction("QuickBooks extractor is not authenticated".to_string())
        })?;
        let path = Path::new(config_str(config, "path")?);
        let range = match config.get("date_range").and_then(Value::as_str) {
            Some(raw) => Some(parse_date_range(raw)?),
            None => None,
        };

        let bytes = std::fs::read(path)?;
        let checksum = compute_checksum(&bytes);
        let mut ledger = parse_general_ledger(bytes.as_slice())?;
        if let Some((start, end)) = range {
            ledger
                .transactions
                .retain(|t| t.date >= start && t.date <= end);
        }

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for txn in &ledger.transactions {
            *counts.entry(txn.account_id.as_str()).or_default() += 1;
        }
        let accounts = counts
            .into_iter()
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, n)| AccountRecord::new(name).with_attribute("transaction_count", n))
            .collect();

        let mut data = ExtractedData::new(ledger.transactions)
            .with_metadata("source", self.data_source())
            .with_metadata("realm_id", realm_id)
            .with_metadata("checksum", checksum)
            .with_metadata("skipped_rows", ledger.skipped)
            .with_metadata("extracted_at", chrono::Utc::now().to_rfc3339());
        data.accounts = accounts;
        Ok(data)
    }
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct ParsedLedger {
    pub transactions: Vec<ExtractedTransaction>,
    /// Data rows that had a date or amount but could not be read.
    pub skipped: usize,
}

#[derive(Debug)]
struct Columns {
    date: usize,
    amount: usize,
    num: Option<usize>,
    name: Option<usize>,
    memo: Option<usize>,
    account: Option<usize>,
}

impl Columns {
    fn detect(record: &csv::StringRecord) -> Option<Self> {
        Some(Self {
            date: find_column(record, &["Date"])?,
            amount: find_column(record, &["Amount"])?,
            num: find_column(record, &["Num", "No."]),
            name: find_column(record, &["Name"]),
            memo: find_column(record, &["Memo/Description", "Memo", "Description"]),
            account: find_column(record, &["Account", "Account Name"]),
        })
    }
}

fn find_column(record: &csv::StringRecord, wanted: &[&str]) -> Option<usize> {
    record
        .iter()
        .position(|cell| wanted.iter().any(|w| cell.trim().eq_ignore_ascii_case(w)))
}

fn cell<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).map(str::trim).unwrap_or("")
}

/// Parse a general-ledger export.
///
/// Preamble lines before the header row are ignored. Without an `Account`
/// column, the account comes from the section rows QuickBooks writes above
/// each group, and `Total for ...` rows are dropped.
pub fn parse_general_ledger<R: Read>(reader: R) -> Result<ParsedLedger> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut ledger = ParsedLedger::default();
    let mut columns: Option<Columns> = None;
    let mut section = String::new();

    for result in rdr.records() {
        let Ok(record) = result else {
            if columns.is_some() {
                ledger.skipped += 1;
            }
            continue;
        };
        if columns.is_none() {
            columns = Columns::detect(&record);
            continue;
        }
        let Some(cols) = columns.as_ref() else {
            continue;
        };

        let non_empty: Vec<&str> = record.iter().map(str::trim).filter(|c| !c.is_empty()).collect();
        let Some(first) = non_empty.first() else {
            continue;
        };
        let raw_date = cell(&record, Some(cols.date));
        if raw_date.is_empty() {
            if first.starts_with("Total for") || first.eq_ignore_ascii_case("TOTAL") {
                continue;
            }
            if non_empty.len() == 1 {
                section = first.to_string();
                continue;
            }
        }

        let (Some(date), Some(amount)) = (
            parse_date(raw_date),
            parse_amount(cell(&record, Some(cols.amount))),
        ) else {
            debug!("Skipping unreadable ledger row {:?}", record.position().map(|p| p.line()));
            ledger.skipped += 1;
            continue;
        };

        let account = match cell(&record, cols.account) {
            "" => section.clone(),
            a => a.to_string(),
        };
        let memo = cell(&record, cols.memo);
        let description = if memo.is_empty() { cell(&record, cols.name) } else { memo };
        let line = record.position().map_or(0, |p| p.line());
        let source_id = match cell(&record, cols.num) {
            "" => format!("qb-{line}"),
            num => format!("qb-{num}-{line}"),
        };

        ledger.transactions.push(ExtractedTransaction::new(
            date,
            account,
            amount,
            description,
            source_id,
        ));
    }

    if columns.is_none() {
        return Err(WaccyError::Extraction(
            "no general ledger header row (Date ... Amount) found".to_string(),
        ));
    }
    Ok(ledger)
}
