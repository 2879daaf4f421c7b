//! Confidence scoring for a proposed source → category mapping.
//!
//! The score is a weighted sum of independent signals, each clamped to
//! `[0, 1]` before weighting, and the sum is clamped again. Weights are
//! configuration; they are normalized to sum to one and no single weight may
//! carry the whole score.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WaccyError};
use crate::normalize::{dice, lexical_similarity};
use crate::patterns::PatternFeatures;
use crate::validation::ValidationSignal;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub lexical: f64,
    pub pattern: f64,
    #[serde(default)]
    pub shape: f64,
    pub validation: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            lexical: 0.25,
            pattern: 0.55,
            shape: 0.05,
            validation: 0.15,
        }
    }
}

impl ScoreWeights {
    fn as_array(&self) -> [(&'static str, f64); 4] {
        [
            ("lexical", self.lexical),
            ("pattern", self.pattern),
            ("shape", self.shape),
            ("validation", self.validation),
        ]
    }

    /// Check the weights and rescale them to sum to 1.
    pub fn normalized(&self) -> Result<Self> {
        for (name, w) in self.as_array() {
            if !w.is_finite() || w < 0.0 {
                return Err(WaccyError::Configuration(format!(
                    "score weight '{name}' must be a non-negative number, got {w}"
                )));
            }
        }
        let total: f64 = self.as_array().iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(WaccyError::Configuration(
                "score weights must not all be zero".to_string(),
            ));
        }
        let normalized = Self {
            lexical: self.lexical / total,
            pattern: self.pattern / total,
            shape: self.shape / total,
            validation: self.validation / total,
        };
        if let Some((name, _)) = normalized.as_array().into_iter().find(|(_, w)| *w >= 1.0) {
            return Err(WaccyError::Configuration(format!(
                "score weight '{name}' would let a single signal decide the score alone"
            )));
        }
        Ok(normalized)
    }
}

/// Everything the scorer looks at for one candidate category.
#[derive(Debug, Clone)]
pub struct ScoreInput<'a> {
    pub source_name: &'a str,
    /// Category display name first, then its ancestors' names.
    pub category_names: &'a [&'a str],
    pub pattern_share: f64,
    pub observed: &'a PatternFeatures,
    pub expected: Option<&'a PatternFeatures>,
    pub validation: ValidationSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub lexical: f64,
    pub pattern_share: f64,
    pub shape: f64,
    pub validation: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    weights: ScoreWeights,
}

impl Default for ConfidenceScorer {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
        }
    }
}

impl ConfidenceScorer {
    pub fn new(weights: ScoreWeights) -> Result<Self> {
        Ok(Self {
            weights: weights.normalized()?,
        })
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn score(&self, input: &ScoreInput<'_>) -> f64 {
        self.breakdown(input).score
    }

    pub fn breakdown(&self, input: &ScoreInput<'_>) -> ScoreBreakdown {
        let lexical = unit(lexical_similarity(input.source_name, input.category_names));
        let pattern_share = unit(input.pattern_share);
        let shape = unit(shape_agreement(input.observed, input.expected));
        let validation = unit(input.validation.value());

        let w = &self.weights;
        let score = unit(
            w.lexical * lexical
                + w.pattern * pattern_share
                + w.shape * shape
                + w.validation * validation,
        );
        ScoreBreakdown {
            lexical,
            pattern_share,
            shape,
            validation,
            score,
        }
    }
}

/// Clamp into `[0, 1]`; NaN counts as no evidence.
pub fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// This hypothesis' share of the total weight recorded for the source name.
pub fn weight_share(weight: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        weight as f64 / total as f64
    }
}

/// How closely the observed transactions resemble what was recorded for the hypothesis.
///
/// Averages sign agreement and description-token overlap over whichever of the
/// two can be computed. With nothing to compare the signal is neutral.
fn shape_agreement(observed: &PatternFeatures, expected: Option<&PatternFeatures>) -> f64 {
    const NEUTRAL: f64 = 0.5;
    let Some(expected) = expected else {
        return NEUTRAL;
    };

    let mut parts = Vec::with_capacity(2);
    if let (Some(a), Some(b)) = (observed.positive_ratio(), expected.positive_ratio()) {
        parts.push(1.0 - (a - b).abs());
    }
    if !observed.tokens.is_empty() && !expected.tokens.is_empty() {
        parts.push(dice(&observed.tokens, &expected.tokens));
    }
    if parts.is_empty() {
        NEUTRAL
    } else {
        parts.iter().sum::<f64>() / parts.len() as f64
    }
}
