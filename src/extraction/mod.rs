//! Extractor contract and registry.
//!
//! Extractors turn a source system's export into [`ExtractedData`]. The
//! registry is an explicit table keyed by data-source id; built-in extractors
//! are listed in [`ALL_EXTRACTORS`] and anything else is added with
//! [`ExtractorRegistry::register`].

pub mod edgar;
pub mod quickbooks;

use std::collections::{BTreeMap, HashMap};

use log::info;
use serde_json::Value;

use crate::error::{Result, WaccyError};
use crate::models::ExtractedData;
use crate::validation;

pub type Credentials = HashMap<String, String>;
pub type ExtractConfig = serde_json::Map<String, Value>;

pub use edgar::EdgarExtractor;
pub use quickbooks::QuickBooksExtractor;

pub trait Extractor: Send + Sync {
    /// Human-readable name.
    fn name(&self) -> &str;

    /// Registry key, also written into `metadata["source"]`.
    fn data_source(&self) -> &str;

    fn authenticate(&mut self, credentials: &Credentials) -> Result<bool>;

    fn extract(&self, config: &ExtractConfig) -> Result<ExtractedData>;

    fn validate(&self, data: &ExtractedData) -> bool {
        validation::is_valid(data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    QuickBooks,
    Edgar,
}

impl ExtractorKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::QuickBooks => "quickbooks",
            Self::Edgar => "edgar",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::QuickBooks => "QuickBooks Online",
            Self::Edgar => "SEC EDGAR",
        }
    }

    pub fn build(&self) -> Box<dyn Extractor> {
        match self {
            Self::QuickBooks => Box::new(QuickBooksExtractor::new()),
            Self::Edgar => Box::new(EdgarExtractor::new()),
        }
    }
}

pub const ALL_EXTRACTORS: &[ExtractorKind] = &[ExtractorKind::QuickBooks, ExtractorKind::Edgar];

pub fn get_by_key(key: &str) -> Option<ExtractorKind> {
    ALL_EXTRACTORS.iter().find(|e| e.key() == key).copied()
}

#[derive(Default)]
pub struct ExtractorRegistry {
    extractors: BTreeMap<String, Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in extractor.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for kind in ALL_EXTRACTORS {
            registry.register(kind.build());
        }
        registry
    }

    /// Add an extractor under its data-source id, replacing any previous one.
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        let key = extractor.data_source().to_string();
        if self.extractors.insert(key.clone(), extractor).is_some() {
            info!("Replaced extractor for data source {key}");
        }
    }

    pub fn get(&self, data_source: &str) -> Option<&dyn Extractor> {
        self.extractors.get(data_source).map(|e| &**e)
    }

    pub fn get_mut(&mut self, data_source: &str) -> Option<&mut Box<dyn Extractor>> {
        self.extractors.get_mut(data_source)
    }

    pub fn list(&self) -> Vec<&str> {
        self.extractors.keys().map(String::as_str).collect()
    }

    /// Run the extractor for `data_source`, rejecting output that fails its validation.
    pub fn extract(&self, data_source: &str, config: &ExtractConfig) -> Result<ExtractedData> {
        let extractor = self
            .get(data_source)
            .ok_or_else(|| WaccyError::UnknownExtractor(data_source.to_string()))?;
        let data = extractor.extract(config)?;
        if !extractor.validate(&data) {
            let issues: Vec<String> = validation::validate_extracted_data(&data)
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(WaccyError::Extraction(format!(
                "{} produced invalid data: {}",
                extractor.name(),
                issues.join("; ")
            )));
        }
        info!(
            "Extracted {} transaction(s) from {}",
            data.transactions.len(),
            extractor.name()
        );
        Ok(data)
    }
}

/// Read a required string entry from an extractor config.
pub(crate) fn config_str<'a>(config: &'a ExtractConfig, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| WaccyError::Configuration(format!("extractor config needs a '{key}' string")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use crate::models::ExtractedTransaction;

    struct Static {
        duplicate_ids: bool,
    }

    impl Extractor for Static {
        fn name(&self) -> &str {
            "Static"
        }

        fn data_source(&self) -> &str {
            "static"
        }

        fn authenticate(&mut self, _credentials: &Credentials) -> Result<bool> {
            Ok(true)
        }

        fn extract(&self, _config: &ExtractConfig) -> Result<ExtractedData> {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let second_id = if self.duplicate_ids { "1" } else { "2" };
            Ok(ExtractedData::new(vec![
                ExtractedTransaction::new(date, "Sales", Decimal::ONE, "", "1"),
                ExtractedTransaction::new(date, "Rent", Decimal::NEGATIVE_ONE, "", second_id),
            ])
            .with_metadata("source", "static"))
        }
    }

    #[test]
    fn test_builtin_registration() {
        let registry = ExtractorRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["edgar", "quickbooks"]);
        assert_eq!(registry.get("quickbooks").unwrap().name(), "QuickBooks Online");
        assert!(registry.get("xero").is_none());
    }

    #[test]
    fn test_get_by_key() {
        assert_eq!(get_by_key("edgar"), Some(ExtractorKind::Edgar));
        assert_eq!(get_by_key("EDGAR"), None);
        for kind in ALL_EXTRACTORS {
            assert_eq!(kind.build().data_source(), kind.key());
            assert_eq!(kind.build().name(), kind.name());
        }
    }

    #[test]
    fn test_manual_registration_and_extract() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Box::new(Static { duplicate_ids: false }));
        let data = registry.extract("static", &ExtractConfig::new()).unwrap();
        assert_eq!(data.transactions.len(), 2);
        assert_eq!(data.source_system(), Some("static"));
    }

    #[test]
    fn test_invalid_output_rejected() {
        let mut registry = ExtractorRegistry::new();
        registry.register(Box::new(Static { duplicate_ids: true }));
        let err = registry.extract("static", &ExtractConfig::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate source record id"));
    }

    #[test]
    fn test_unknown_source() {
        let registry = ExtractorRegistry::new();
        assert!(matches!(
            registry.extract("nope", &ExtractConfig::new()),
            Err(WaccyError::UnknownExtractor(_))
        ));
    }

    #[test]
    fn test_authenticate_through_registry() {
        let mut registry = ExtractorRegistry::with_builtin();
        let edgar = registry.get_mut("edgar").unwrap();
        assert!(edgar.authenticate(&Credentials::new()).unwrap());
    }
}
