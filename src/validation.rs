//! Validation signals and structural checks on extracted data.

use std::collections::HashSet;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ExtractedData;

/// External evidence about whether a mapping is consistent with the source's own totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSignal {
    #[default]
    Unknown,
    Reconciled,
    Failed,
    Score(f64),
}

impl ValidationSignal {
    pub fn value(&self) -> f64 {
        match self {
            Self::Reconciled => 1.0,
            Self::Unknown => 0.5,
            Self::Failed => 0.0,
            Self::Score(s) if s.is_nan() => 0.0,
            Self::Score(s) => s.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileResult {
    pub is_reconciled: bool,
    pub statement_balance: Decimal,
    pub calculated_balance: Decimal,
    pub discrepancy: Decimal,
}

impl ReconcileResult {
    pub fn signal(&self) -> ValidationSignal {
        if self.is_reconciled {
            ValidationSignal::Reconciled
        } else {
            ValidationSignal::Failed
        }
    }
}

/// Compare a calculated balance against a statement balance; within a cent counts as reconciled.
pub fn reconcile(calculated_balance: Decimal, statement_balance: Decimal) -> ReconcileResult {
    let discrepancy = (calculated_balance - statement_balance).abs();
    ReconcileResult {
        is_reconciled: discrepancy < Decimal::new(1, 2),
        statement_balance,
        calculated_balance,
        discrepancy: discrepancy.round_dp(2),
    }
}

pub fn calculated_balance<'a>(amounts: impl IntoIterator<Item = &'a Decimal>) -> Decimal {
    amounts.into_iter().copied().sum()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    ConfidenceOutOfRange { source_id: String, confidence: f64 },
    MissingAccount { source_id: String },
    DuplicateSourceId(String),
    QualityScoreOutOfRange(f64),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfidenceOutOfRange {
                source_id,
                confidence,
            } => write!(f, "transaction {source_id} has confidence {confidence} outside [0, 1]"),
            Self::MissingAccount { source_id } => {
                write!(f, "transaction {source_id} has no account")
            }
            Self::DuplicateSourceId(id) => write!(f, "duplicate source record id {id}"),
            Self::QualityScoreOutOfRange(score) => {
                write!(f, "quality score {score} outside [0, 1]")
            }
        }
    }
}

fn in_unit_range(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

pub fn validate_extracted_data(data: &ExtractedData) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for txn in &data.transactions {
        if !in_unit_range(txn.confidence) {
            issues.push(ValidationIssue::ConfidenceOutOfRange {
                source_id: txn.source_id.clone(),
                confidence: txn.confidence,
            });
        }
        if txn.account_id.trim().is_empty() {
            issues.push(ValidationIssue::MissingAccount {
                source_id: txn.source_id.clone(),
            });
        }
        if !txn.source_id.is_empty() && !seen.insert(txn.source_id.as_str()) {
            issues.push(ValidationIssue::DuplicateSourceId(txn.source_id.clone()));
        }
    }
    if !in_unit_range(data.quality_score) {
        issues.push(ValidationIssue::QualityScoreOutOfRange(data.quality_score));
    }
    issues
}

pub fn is_valid(data: &ExtractedData) -> bool {
    validate_extracted_data(data).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedTransaction;
    use chrono::NaiveDate;

    fn txn(source_id: &str, account: &str, confidence: f64) -> ExtractedTransaction {
        let mut t = ExtractedTransaction::new(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            account,
            Decimal::new(1000, 2),
            "",
            source_id,
        );
        t.confidence = confidence;
        t
    }

    #[test]
    fn test_signal_values() {
        assert_eq!(ValidationSignal::Reconciled.value(), 1.0);
        assert_eq!(ValidationSignal::Unknown.value(), 0.5);
        assert_eq!(ValidationSignal::Failed.value(), 0.0);
        assert_eq!(ValidationSignal::Score(0.3).value(), 0.3);
        assert_eq!(ValidationSignal::Score(7.0).value(), 1.0);
        assert_eq!(ValidationSignal::Score(f64::NAN).value(), 0.0);
    }

    #[test]
    fn test_matching_balance() {
        let result = reconcile(Decimal::new(100000, 2), Decimal::new(100000, 2));
        assert!(result.is_reconciled);
        assert_eq!(result.discrepancy, Decimal::ZERO);
        assert_eq!(result.signal(), ValidationSignal::Reconciled);
    }

    #[test]
    fn test_with_discrepancy() {
        let result = reconcile(Decimal::new(100000, 2), Decimal::new(95000, 2));
        assert!(!result.is_reconciled);
        assert_eq!(result.discrepancy, Decimal::new(5000, 2));
        assert_eq!(result.signal(), ValidationSignal::Failed);
    }

    #[test]
    fn test_sub_cent_difference_reconciles() {
        let result = reconcile(Decimal::new(1000005, 3), Decimal::new(100000, 2));
        assert!(result.is_reconciled);
    }

    #[test]
    fn test_calculated_balance() {
        let amounts = [Decimal::new(1050, 2), Decimal::new(-250, 2)];
        assert_eq!(calculated_balance(&amounts), Decimal::new(800, 2));
    }

    #[test]
    fn test_validate_extracted_data() {
        let mut data = ExtractedData::new(vec![
            txn("1", "Sales", 0.5),
            txn("1", "Sales", 1.5),
            txn("2", " ", 0.0),
        ]);
        data.quality_score = -0.1;
        let issues = validate_extracted_data(&data);
        assert_eq!(issues.len(), 4);
        assert!(issues.contains(&ValidationIssue::DuplicateSourceId("1".into())));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::MissingAccount { source_id } if source_id == "2")));
        assert!(!is_valid(&data));
        assert!(is_valid(&ExtractedData::new(vec![txn("9", "Rent", 1.0)])));
    }
}
