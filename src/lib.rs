//! # waccy
//!
//! Maps accounts from heterogeneous financial sources (QuickBooks ledgers,
//! SEC filings, ...) onto one standard chart of accounts, with a confidence
//! score for every mapping and a pattern store that learns from reference data.
//!
//! ## Pieces
//!
//! - **Ontology**: the standard chart, a validated forest of [`AccountCategory`] nodes
//! - **Pattern store**: learned `source name → category` hypotheses with weights, kept in SQLite
//! - **Confidence scorer**: weighted blend of lexical, pattern, shape and validation signals
//! - **Classification engine**: mapping table, then patterns, then an optional external classifier
//! - **Data mapper**: rewrites a whole [`ExtractedData`] batch and reports what stayed unresolved
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waccy::*;
//!
//! let ontology = Arc::new(Ontology::standard()?);
//! let patterns = Arc::new(PatternStore::open_in_memory()?);
//! let rules = MappingTable::new(vec![MappingRule::exact("Sales", "revenue.product_sales")])?;
//! let engine = ClassificationEngine::new(ontology, patterns, rules, EngineConfig::default())?;
//!
//! let mut registry = ExtractorRegistry::with_builtin();
//! let data = registry.extract("edgar", &config)?;
//! let mapped = DataMapper::new(Arc::new(engine)).map_batch(data);
//! println!("{}", mapped.summary());
//! ```

pub mod classifier;
pub mod db;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod fmt;
pub mod mapper;
pub mod models;
pub mod normalize;
pub mod ontology;
pub mod patterns;
pub mod reviewer;
pub mod rules;
pub mod scorer;
pub mod settings;
pub mod validation;

pub use classifier::{BoundedClassifier, ClassifierRequest, ClassifierSuggestion, ExternalClassifier};
pub use engine::{
    ClassificationEngine, ClassificationRequest, EngineConfig, LearnOutcome, MappingDecision,
    Rationale, UnresolvedReason,
};
pub use error::{Result, WaccyError};
pub use extraction::{Credentials, ExtractConfig, Extractor, ExtractorKind, ExtractorRegistry};
pub use mapper::{CancellationToken, DataMapper, MappedBatch, MappingReport, UnresolvedAccount};
pub use models::{
    AccountCategory, AccountRecord, AccountType, ExtractedData, ExtractedTransaction,
    QualityReport, UNRESOLVED,
};
pub use ontology::{CategorySpec, Ontology, OntologyConfig};
pub use patterns::{Hypothesis, Pattern, PatternFeatures, PatternStore, ReferenceExtraction};
pub use rules::{MappingRule, MappingTable, MatchType};
pub use scorer::{ConfidenceScorer, ScoreInput, ScoreWeights};
pub use settings::Settings;
pub use validation::ValidationSignal;
