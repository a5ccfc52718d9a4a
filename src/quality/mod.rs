//! Quality scoring for transformed prompts and provider responses
//!
//! Two scorers live here and they are deliberately weighted differently, because they
//! measure different things:
//!
//! - [`QualityValidator`] measures how much of the original prompt survived compression:
//!   `0.4 * semantic similarity + 0.4 * keyword preservation + 0.2 * structure integrity`.
//! - [`ResponseQualityScorer`] measures whether a provider response is worth caching:
//!   `0.3 * length + 0.3 * structure + 0.2 * choice quality + 0.2 * coherence`.

mod response;

pub use response::{ResponseQuality, ResponseQualityScorer};

use crate::text::{keyword_frequencies, ratio_similarity, split_sentences, text_jaccard, word_set};
use serde::{Deserialize, Serialize};

const SEMANTIC_WEIGHT: f64 = 0.4;
const KEYWORD_WEIGHT: f64 = 0.4;
const STRUCTURE_WEIGHT: f64 = 0.2;

/// Default number of high-frequency keywords tracked for preservation
pub const DEFAULT_KEYWORD_LIMIT: usize = 15;

/// Component metrics of a fidelity score, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub semantic_similarity: f64,
    pub keyword_preservation: f64,
    pub structure_integrity: f64,
}

/// Weighted fidelity score in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    pub metrics: QualityMetrics,
}

impl QualityScore {
    /// Score of an untouched text
    pub fn perfect() -> Self {
        Self {
            score: 1.0,
            metrics: QualityMetrics {
                semantic_similarity: 1.0,
                keyword_preservation: 1.0,
                structure_integrity: 1.0,
            },
        }
    }

    pub fn passes(&self, min_score: f64) -> bool {
        self.score >= min_score
    }
}

/// Scores how much fidelity survives a text transformation
#[derive(Debug, Clone)]
pub struct QualityValidator {
    keyword_limit: usize,
}

impl QualityValidator {
    pub fn new(keyword_limit: usize) -> Self {
        Self { keyword_limit }
    }

    /// Compare `transformed` against `original`
    pub fn validate(&self, original: &str, transformed: &str) -> QualityScore {
        if original == transformed {
            return QualityScore::perfect();
        }

        let metrics = QualityMetrics {
            semantic_similarity: text_jaccard(original, transformed),
            keyword_preservation: self.keyword_preservation(original, transformed),
            structure_integrity: structure_integrity(original, transformed),
        };

        let score = SEMANTIC_WEIGHT * metrics.semantic_similarity
            + KEYWORD_WEIGHT * metrics.keyword_preservation
            + STRUCTURE_WEIGHT * metrics.structure_integrity;

        QualityScore {
            score: score.clamp(0.0, 1.0),
            metrics,
        }
    }

    /// Fraction of the original's high-frequency keywords still present
    fn keyword_preservation(&self, original: &str, transformed: &str) -> f64 {
        let keywords = keyword_frequencies(original, self.keyword_limit);
        if keywords.is_empty() {
            return 1.0;
        }

        let remaining = word_set(transformed);
        let kept = keywords
            .iter()
            .filter(|(word, _)| remaining.contains(word))
            .count();

        kept as f64 / keywords.len() as f64
    }
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORD_LIMIT)
    }
}

/// Blend of sentence-count ratio and average-sentence-length similarity
fn structure_integrity(original: &str, transformed: &str) -> f64 {
    let before = split_sentences(original);
    let after = split_sentences(transformed);

    let count_ratio = ratio_similarity(before.len() as f64, after.len() as f64);
    let length_similarity = ratio_similarity(average_length(&before), average_length(&after));

    0.5 * count_ratio + 0.5 * length_similarity
}

fn average_length(sentences: &[String]) -> f64 {
    if sentences.is_empty() {
        return 0.0;
    }
    let total: usize = sentences.iter().map(|s| s.chars().count()).sum();
    total as f64 / sentences.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_is_perfect() {
        let validator = QualityValidator::default();
        let score = validator.validate("The cave is dark.", "The cave is dark.");
        assert_eq!(score.score, 1.0);
    }

    #[test]
    fn test_weights_sum_to_score() {
        let validator = QualityValidator::default();
        let score = validator.validate(
            "The old lantern lights the cave. The lantern flickers.",
            "Old lantern lights cave.",
        );
        let expected = 0.4 * score.metrics.semantic_similarity
            + 0.4 * score.metrics.keyword_preservation
            + 0.2 * score.metrics.structure_integrity;
        assert!((score.score - expected).abs() < 1e-9);
        assert!(score.score < 1.0);
    }

    #[test]
    fn test_losing_keywords_lowers_score() {
        let validator = QualityValidator::default();
        let original = "The dragon guards the treasure. The dragon sleeps near the treasure.";
        let keeps = validator.validate(original, "Dragon guards treasure. Dragon sleeps near treasure.");
        let loses = validator.validate(original, "Something is somewhere.");
        assert!(keeps.score > loses.score);
        assert_eq!(keeps.metrics.keyword_preservation, 1.0);
        assert_eq!(loses.metrics.keyword_preservation, 0.0);
    }

    #[test]
    fn test_empty_transformation_scores_low() {
        let validator = QualityValidator::default();
        let score = validator.validate("A long walk through the market district.", "");
        assert!(score.score < 0.3);
    }
}
