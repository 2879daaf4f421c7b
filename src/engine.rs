//! Per-account classification.
//!
//! A request moves through at most four states, stopping at the first that
//! produces an answer: the static mapping table, pattern-assisted scoring,
//! the external classifier and finally the unresolved sentinel. Unresolved is
//! an ordinary outcome, not an error; only storage failures surface as `Err`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::classifier::{
    BoundedClassifier, CandidateCategory, ClassifierOutcome, ClassifierRequest,
    ExternalClassifier,
};
use crate::error::{Result, WaccyError};
use crate::ontology::Ontology;
use crate::patterns::{Pattern, PatternFeatures, PatternStore};
use crate::rules::MappingTable;
use crate::scorer::{unit, weight_share, ConfidenceScorer, ScoreBreakdown, ScoreInput, ScoreWeights};
use crate::settings::Settings;
use crate::validation::ValidationSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rationale {
    Deterministic,
    PatternMatch,
    ExternalClassifier,
}

impl Rationale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::PatternMatch => "pattern match",
            Self::ExternalClassifier => "external classifier",
        }
    }
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UnresolvedReason {
    NoEvidence,
    BelowThreshold {
        best_category: String,
        best_score: f64,
    },
    ClassifierFailed(String),
    ClassifierTimedOut,
    UnknownSuggestion(String),
    /// The account could not be classified at all, e.g. storage failed.
    Error(String),
    /// The batch was cancelled before this account was reached.
    Cancelled,
    MissingSourceAccount,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEvidence => f.write_str("No mapping rule or learned pattern"),
            Self::BelowThreshold {
                best_category,
                best_score,
            } => write!(
                f,
                "Best candidate {best_category} scored {best_score:.2}, below threshold"
            ),
            Self::ClassifierFailed(e) => write!(f, "External classifier failed: {e}"),
            Self::ClassifierTimedOut => f.write_str("External classifier timed out"),
            Self::UnknownSuggestion(id) => {
                write!(f, "External classifier suggested unknown category {id}")
            }
            Self::Error(e) => write!(f, "Classification error: {e}"),
            Self::Cancelled => f.write_str("Mapping cancelled before this account"),
            Self::MissingSourceAccount => f.write_str("Missing source account"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MappingDecision {
    Resolved {
        category_id: String,
        confidence: f64,
        rationale: Rationale,
        signals: Option<ScoreBreakdown>,
    },
    Unresolved {
        reason: UnresolvedReason,
    },
}

impl MappingDecision {
    pub fn unresolved(reason: UnresolvedReason) -> Self {
        Self::Unresolved { reason }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Resolved { confidence, .. } => *confidence,
            Self::Unresolved { .. } => 0.0,
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Self::Resolved { category_id, .. } => Some(category_id),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn rationale(&self) -> Option<Rationale> {
        match self {
            Self::Resolved { rationale, .. } => Some(*rationale),
            Self::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub source_name: String,
    pub source_system: Option<String>,
    pub features: PatternFeatures,
    pub validation: ValidationSignal,
}

impl ClassificationRequest {
    pub fn new(source_name: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_system: None,
            features: PatternFeatures::default(),
            validation: ValidationSignal::Unknown,
        }
    }

    pub fn with_system(mut self, system: Option<&str>) -> Self {
        self.source_system = system.map(str::to_string);
        self
    }

    pub fn with_features(mut self, features: PatternFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_validation(mut self, validation: ValidationSignal) -> Self {
        self.validation = validation;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub acceptance_threshold: f64,
    /// Scaled classifier confidence below this leaves the account unresolved.
    pub classifier_min_confidence: f64,
    pub score_weights: ScoreWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.7,
            classifier_min_confidence: 0.5,
            score_weights: ScoreWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            acceptance_threshold: settings.acceptance_threshold,
            classifier_min_confidence: settings.classifier_min_confidence,
            score_weights: settings.score_weights,
        }
    }
}

fn check_unit(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=1.0).contains(&value) {
        return Err(WaccyError::Configuration(format!(
            "{name} must be within [0, 1], got {value}"
        )));
    }
    Ok(value)
}

/// Result of one `learn_from_reference` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnOutcome {
    pub signature: String,
    pub recorded: usize,
    pub skipped: usize,
    /// Patterns naming a category the ontology does not know.
    pub rejected: usize,
    pub already_applied: bool,
}

pub struct ClassificationEngine {
    ontology: Arc<Ontology>,
    patterns: Arc<PatternStore>,
    rules: MappingTable,
    scorer: ConfidenceScorer,
    acceptance_threshold: f64,
    classifier_min_confidence: f64,
    external: Option<BoundedClassifier>,
}

impl ClassificationEngine {
    pub fn new(
        ontology: Arc<Ontology>,
        patterns: Arc<PatternStore>,
        rules: MappingTable,
        config: EngineConfig,
    ) -> Result<Self> {
        let threshold = check_unit("acceptance threshold", config.acceptance_threshold)?;
        let classifier_min_confidence =
            check_unit("classifier minimum confidence", config.classifier_min_confidence)?;
        rules.validate_against(&ontology)?;
        Ok(Self {
            ontology,
            patterns,
            rules,
            scorer: ConfidenceScorer::new(config.score_weights)?,
            acceptance_threshold: threshold,
            classifier_min_confidence,
            external: None,
        })
    }

    /// Fall back on `classifier` when no pattern clears the threshold.
    pub fn with_external_classifier(
        mut self,
        classifier: Arc<dyn ExternalClassifier>,
        timeout: Duration,
    ) -> Self {
        self.external = Some(BoundedClassifier::new(classifier, timeout));
        self
    }

    pub fn with_bounded_classifier(mut self, classifier: BoundedClassifier) -> Self {
        self.external = Some(classifier);
        self
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn patterns(&self) -> &PatternStore {
        &self.patterns
    }

    pub fn acceptance_threshold(&self) -> f64 {
        self.acceptance_threshold
    }

    pub fn classify(&self, request: &ClassificationRequest) -> Result<MappingDecision> {
        let source_system = request.source_system.as_deref();

        if let Some(category_id) = self.rules.lookup(&request.source_name, source_system) {
            debug!("'{}' -> {category_id} (deterministic)", request.source_name);
            return Ok(MappingDecision::Resolved {
                category_id: category_id.to_string(),
                confidence: 1.0,
                rationale: Rationale::Deterministic,
                signals: None,
            });
        }

        let best = self.best_hypothesis(request)?;
        if let Some((category_id, signals)) = &best {
            if signals.score >= self.acceptance_threshold {
                debug!(
                    "'{}' -> {category_id} (pattern match, {:.3})",
                    request.source_name, signals.score
                );
                return Ok(MappingDecision::Resolved {
                    category_id: category_id.clone(),
                    confidence: signals.score,
                    rationale: Rationale::PatternMatch,
                    signals: Some(*signals),
                });
            }
        }

        if let Some(classifier) = &self.external {
            return Ok(self.ask_classifier(classifier, request));
        }

        let reason = match best {
            Some((best_category, signals)) => UnresolvedReason::BelowThreshold {
                best_category,
                best_score: signals.score,
            },
            None => UnresolvedReason::NoEvidence,
        };
        debug!("'{}' unresolved: {reason}", request.source_name);
        Ok(MappingDecision::unresolved(reason))
    }

    fn best_hypothesis(
        &self,
        request: &ClassificationRequest,
    ) -> Result<Option<(String, ScoreBreakdown)>> {
        let hypotheses = self.patterns.lookup(&request.source_name)?;
        let total: u64 = hypotheses.iter().map(|h| h.weight).sum();

        let mut best: Option<(String, ScoreBreakdown)> = None;
        for hypothesis in &hypotheses {
            if !self.ontology.contains(&hypothesis.category_id) {
                debug!(
                    "Ignoring hypothesis {} for '{}': not in the chart",
                    hypothesis.category_id, request.source_name
                );
                continue;
            }
            let names = self.ontology.path_names(&hypothesis.category_id);
            let signals = self.scorer.breakdown(&ScoreInput {
                source_name: &request.source_name,
                category_names: &names,
                pattern_share: weight_share(hypothesis.weight, total),
                observed: &request.features,
                expected: Some(&hypothesis.features),
                validation: request.validation,
            });
            if best.as_ref().map_or(true, |(_, b)| signals.score > b.score) {
                best = Some((hypothesis.category_id.clone(), signals));
            }
        }
        Ok(best)
    }

    fn ask_classifier(
        &self,
        classifier: &BoundedClassifier,
        request: &ClassificationRequest,
    ) -> MappingDecision {
        let classifier_request = ClassifierRequest {
            source_name: request.source_name.clone(),
            source_system: request.source_system.clone(),
            features: request.features.clone(),
            candidates: self
                .ontology
                .list(None)
                .into_iter()
                .map(|c| CandidateCategory {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    account_type: c.account_type,
                })
                .collect(),
        };

        let suggestion = match classifier.classify(classifier_request) {
            ClassifierOutcome::Suggested(s) => s,
            ClassifierOutcome::Failed(e) => {
                return MappingDecision::unresolved(UnresolvedReason::ClassifierFailed(e))
            }
            ClassifierOutcome::TimedOut => {
                return MappingDecision::unresolved(UnresolvedReason::ClassifierTimedOut)
            }
        };
        if !self.ontology.contains(&suggestion.category_id) {
            info!(
                "Classifier suggested unknown category {} for '{}'",
                suggestion.category_id, request.source_name
            );
            return MappingDecision::unresolved(UnresolvedReason::UnknownSuggestion(
                suggestion.category_id,
            ));
        }

        // The reported confidence replaces the pattern signal, then caps the result.
        let reported = unit(suggestion.confidence);
        let names = self.ontology.path_names(&suggestion.category_id);
        let signals = self.scorer.breakdown(&ScoreInput {
            source_name: &request.source_name,
            category_names: &names,
            pattern_share: reported,
            observed: &request.features,
            expected: None,
            validation: request.validation,
        });
        let confidence = unit(reported * signals.score);
        if confidence < self.classifier_min_confidence {
            debug!(
                "'{}' unresolved: classifier suggested {} at {confidence:.3}",
                request.source_name, suggestion.category_id
            );
            return MappingDecision::unresolved(UnresolvedReason::BelowThreshold {
                best_category: suggestion.category_id,
                best_score: confidence,
            });
        }
        debug!(
            "'{}' -> {} (external classifier, reported {reported:.2}, scaled {confidence:.3})",
            request.source_name, suggestion.category_id
        );
        MappingDecision::Resolved {
            category_id: suggestion.category_id,
            confidence,
            rationale: Rationale::ExternalClassifier,
            signals: Some(signals),
        }
    }

    /// Learn patterns from a reference document such as a filing.
    ///
    /// The document's content hash is recorded alongside the patterns, so
    /// feeding the same document again leaves the store untouched.
    pub fn learn_from_reference(&self, reference: &Value) -> Result<LearnOutcome> {
        let signature = content_signature(reference)?;
        let extraction = PatternStore::extract_from(reference);

        let (accepted, rejected): (Vec<Pattern>, Vec<Pattern>) = extraction
            .patterns
            .into_iter()
            .partition(|p| self.ontology.contains(&p.category_id));
        for pattern in &rejected {
            debug!(
                "Rejecting learned pattern '{}' -> unknown category {}",
                pattern.source_name, pattern.category_id
            );
        }

        let applied = self
            .patterns
            .apply_reference(&signature, &accepted, extraction.skipped)?;
        if !applied {
            info!("Reference {signature} already applied, nothing learned");
        }
        Ok(LearnOutcome {
            signature,
            recorded: if applied { accepted.len() } else { 0 },
            skipped: extraction.skipped,
            rejected: rejected.len(),
            already_applied: !applied,
        })
    }
}

/// SHA-256 of the document's canonical JSON encoding (object keys sorted).
pub fn content_signature(reference: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(reference)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
