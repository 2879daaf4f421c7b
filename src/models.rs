use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WaccyError;
use crate::validation::validate_extracted_data;

/// Account id written onto transactions whose source account could not be mapped.
pub const UNRESOLVED: &str = "unresolved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = WaccyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|t| t.as_str() == wanted)
            .copied()
            .ok_or_else(|| WaccyError::Configuration(format!("unknown account type: {s}")))
    }
}

/// A node of the standard chart of accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCategory {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub parent_id: Option<String>,
    /// Depth in the chart; roots sit at level 1.
    pub level: u32,
    pub description: String,
}

impl AccountCategory {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTransaction {
    pub date: NaiveDate,
    /// Raw source label until mapped, then a standard category id (or `UNRESOLVED`).
    pub account_id: String,
    pub amount: Decimal,
    pub description: String,
    pub source_id: String,
    pub confidence: f64,
    /// Original source label, kept once `account_id` has been rewritten.
    #[serde(default)]
    pub source_account: Option<String>,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub flag_reason: Option<String>,
}

impl ExtractedTransaction {
    pub fn new(
        date: NaiveDate,
        account_id: impl Into<String>,
        amount: Decimal,
        description: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            date,
            account_id: account_id.into(),
            amount,
            description: description.into(),
            source_id: source_id.into(),
            confidence: 0.0,
            source_account: None,
            is_flagged: false,
            flag_reason: None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.account_id == UNRESOLVED
    }

    /// The label the source system used for this transaction's account.
    pub fn source_label(&self) -> &str {
        self.source_account.as_deref().unwrap_or(&self.account_id)
    }

    pub fn flag(&mut self, reason: impl Into<String>) {
        self.is_flagged = true;
        self.flag_reason = Some(reason.into());
    }
}

/// Account metadata as reported by the source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,
}

impl AccountRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub transactions: Vec<ExtractedTransaction>,
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub quality_score: f64,
}

impl ExtractedData {
    pub fn new(transactions: Vec<ExtractedTransaction>) -> Self {
        Self {
            transactions,
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Source system identifier recorded by the extractor, e.g. `quickbooks`.
    pub fn source_system(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub fn generate_quality_report(&self) -> QualityReport {
        let total = self.transactions.len();
        let resolved = self
            .transactions
            .iter()
            .filter(|t| !t.is_flagged && !t.is_unresolved())
            .count();
        let (completeness, avg_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            let sum: f64 = self.transactions.iter().map(|t| t.confidence).sum();
            (resolved as f64 / total as f64, sum / total as f64)
        };

        let mut issues: Vec<String> = validate_extracted_data(self)
            .iter()
            .map(ToString::to_string)
            .collect();
        let flagged = total - resolved;
        if flagged > 0 {
            issues.push(format!("{flagged} transaction(s) need review"));
        }

        QualityReport {
            completeness,
            avg_confidence,
            issues,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub completeness: f64,
    pub avg_confidence: f64,
    pub issues: Vec<String>,
}
