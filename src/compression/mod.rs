//! Quality-gated prompt compression
//!
//! Stages run in order and the compressor stops as soon as the requested reduction is met:
//!
//! 1. Redundancy removal (whitespace and punctuation runs, fillers, wordy connectives)
//! 2. Structural optimization (run-on splitting, hedge removal, double negatives)
//! 3. Keyword-priority pruning of whole sentences
//!
//! The result is then scored with [`QualityValidator`]. Below `min_quality_score` the staged
//! result is discarded in favour of redundancy removal alone at 70% of the target; if even
//! that scores too low, the original prompt is returned untouched.

mod stages;

pub use stages::{prune_by_keywords, remove_redundancy, restructure};

use crate::quality::{QualityScore, QualityValidator};
use crate::tokens::TokenEstimator;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Share of the requested reduction attempted by the fallback
pub const FALLBACK_TARGET_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStage {
    Redundancy,
    Structural,
    KeywordPruning,
}

/// How the returned prompt was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionOutcome {
    /// Staged result passed the quality gate
    Staged,
    /// Staged result failed the gate; conservative redundancy-only result used
    Fallback,
    /// Nothing acceptable; original returned
    Uncompressed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedPrompt {
    pub original: String,
    pub compressed: String,
    /// `estimate(original) - estimate(compressed)`
    pub tokens_saved: i64,
    /// Achieved reduction as a fraction of the original estimate
    pub compression_ratio: f64,
    pub quality: QualityScore,
    pub outcome: CompressionOutcome,
    pub stages_applied: Vec<CompressionStage>,
}

impl CompressedPrompt {
    pub fn is_fallback(&self) -> bool {
        self.outcome != CompressionOutcome::Staged
    }
}

#[derive(Debug, Clone)]
pub struct PromptCompressor {
    estimator: TokenEstimator,
    validator: QualityValidator,
    preserve_quality: bool,
    min_quality_score: f64,
}

impl PromptCompressor {
    pub fn new(estimator: TokenEstimator, preserve_quality: bool, min_quality_score: f64) -> Self {
        Self {
            estimator,
            validator: QualityValidator::default(),
            preserve_quality,
            min_quality_score,
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    /// Compress `prompt` aiming for `target_reduction_percent` fewer tokens
    pub fn compress(&self, prompt: &str, target_reduction_percent: f64) -> CompressedPrompt {
        let original_tokens = self.estimator.estimate(prompt);
        let target = (target_reduction_percent / 100.0).clamp(0.0, 1.0);

        let (staged, stages_applied) = self.run_stages(prompt, original_tokens, target);
        let quality = self.validator.validate(prompt, &staged);

        if !self.preserve_quality || quality.passes(self.min_quality_score) {
            return self.finish(prompt, staged, original_tokens, quality, CompressionOutcome::Staged, stages_applied);
        }

        info!(
            "Compressed prompt quality {:.2} below {:.2}, falling back to redundancy removal",
            quality.score, self.min_quality_score
        );

        let fallback_budget = budget(original_tokens, target * FALLBACK_TARGET_FACTOR);
        let fallback = remove_redundancy(prompt, fallback_budget, &self.estimator);
        let fallback_quality = self.validator.validate(prompt, &fallback);

        if fallback_quality.passes(self.min_quality_score) {
            return self.finish(
                prompt,
                fallback,
                original_tokens,
                fallback_quality,
                CompressionOutcome::Fallback,
                vec![CompressionStage::Redundancy],
            );
        }

        info!("Fallback compression also below quality threshold, sending prompt uncompressed");
        self.finish(
            prompt,
            prompt.to_string(),
            original_tokens,
            QualityScore::perfect(),
            CompressionOutcome::Uncompressed,
            Vec::new(),
        )
    }

    fn run_stages(&self, prompt: &str, original_tokens: usize, target: f64) -> (String, Vec<CompressionStage>) {
        let budget = budget(original_tokens, target);
        let mut current = prompt.to_string();
        let mut applied = Vec::new();

        for stage in [
            CompressionStage::Redundancy,
            CompressionStage::Structural,
            CompressionStage::KeywordPruning,
        ] {
            current = match stage {
                CompressionStage::Redundancy => remove_redundancy(&current, budget, &self.estimator),
                CompressionStage::Structural => restructure(&current),
                CompressionStage::KeywordPruning => prune_by_keywords(&current, budget, &self.estimator),
            };
            applied.push(stage);

            let tokens = self.estimator.estimate(&current);
            debug!("After {:?}: {} -> {} tokens (budget {})", stage, original_tokens, tokens, budget);
            if tokens <= budget {
                break;
            }
        }

        (current, applied)
    }

    fn finish(
        &self,
        original: &str,
        compressed: String,
        original_tokens: usize,
        quality: QualityScore,
        outcome: CompressionOutcome,
        stages_applied: Vec<CompressionStage>,
    ) -> CompressedPrompt {
        let compressed_tokens = self.estimator.estimate(&compressed);
        let tokens_saved = original_tokens as i64 - compressed_tokens as i64;
        let compression_ratio = if original_tokens > 0 {
            tokens_saved as f64 / original_tokens as f64
        } else {
            0.0
        };

        CompressedPrompt {
            original: original.to_string(),
            compressed,
            tokens_saved,
            compression_ratio,
            quality,
            outcome,
            stages_applied,
        }
    }
}

impl Default for PromptCompressor {
    fn default() -> Self {
        Self::new(TokenEstimator::default(), true, 0.7)
    }
}

/// Token budget left after removing `reduction` of `original_tokens`
fn budget(original_tokens: usize, reduction: f64) -> usize {
    (original_tokens as f64 * (1.0 - reduction)).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scene description of roughly 500 heuristic tokens
    fn long_prompt() -> String {
        let paragraph = "You are really standing at the very edge of the old Gyeongbokgung palace, and the \
            evening light is basically fading over the tiled roofs. Perhaps the guards are somewhat \
            tired, and it seems that nobody notices you. The palace gardens hold a hidden pavilion. \
            Visitors say the pavilion keeps a secret letter from the last queen. In order to reach the \
            pavilion, you must cross the stone bridge before the gates close at 9pm. ";
        paragraph.repeat(9)
    }

    #[test]
    fn test_small_target_stops_after_redundancy() {
        let compressor = PromptCompressor::default();
        let prompt = "The  market   is   busy.   Vendors   shout!!!";
        let result = compressor.compress(prompt, 1.0);
        assert_eq!(result.stages_applied, vec![CompressionStage::Redundancy]);
        assert_eq!(result.compressed, "The market is busy. Vendors shout!");
        assert_eq!(result.outcome, CompressionOutcome::Staged);
    }

    #[test]
    fn test_tokens_saved_matches_estimates() {
        let compressor = PromptCompressor::default();
        let prompt = long_prompt();
        let result = compressor.compress(&prompt, 30.0);
        let estimator = TokenEstimator::default();
        assert_eq!(
            result.tokens_saved,
            estimator.estimate(&prompt) as i64 - estimator.estimate(&result.compressed) as i64
        );
        assert!(result.tokens_saved > 0);
    }

    #[test]
    fn test_aggressive_target_never_returns_low_quality() {
        let compressor = PromptCompressor::default();
        let prompt = long_prompt();
        let estimator = TokenEstimator::default();
        assert!(estimator.estimate(&prompt) >= 450);

        let result = compressor.compress(&prompt, 95.0);
        assert!(result.quality.score >= 0.7);
        assert!(result.is_fallback());
        assert!(result.compression_ratio < 0.95);
    }

    #[test]
    fn test_without_quality_gate_staged_result_is_used() {
        let compressor = PromptCompressor::new(TokenEstimator::default(), false, 0.99);
        let result = compressor.compress(&long_prompt(), 95.0);
        assert_eq!(result.outcome, CompressionOutcome::Staged);
        assert!(result.stages_applied.contains(&CompressionStage::KeywordPruning));
    }

    #[test]
    fn test_empty_prompt() {
        let result = PromptCompressor::default().compress("", 50.0);
        assert_eq!(result.compressed, "");
        assert_eq!(result.tokens_saved, 0);
        assert_eq!(result.compression_ratio, 0.0);
    }
}
