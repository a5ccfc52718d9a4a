//! Cache-worthiness score for provider responses

use crate::choices::{coherence, Choice};
use crate::text::split_sentences;
use serde::{Deserialize, Serialize};

const LENGTH_WEIGHT: f64 = 0.3;
const STRUCTURE_WEIGHT: f64 = 0.3;
const CHOICE_WEIGHT: f64 = 0.2;
const COHERENCE_WEIGHT: f64 = 0.2;

/// Sentences needed for full sentence-structure credit
const EXPECTED_SENTENCES: usize = 3;

/// Component scores of a response, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseQuality {
    pub score: f64,
    pub length: f64,
    pub structure: f64,
    pub choice_quality: f64,
    pub coherence: f64,
}

#[derive(Debug, Clone)]
pub struct ResponseQualityScorer {
    min_content_length: usize,
    required_markers: Vec<String>,
    min_option_chars: usize,
}

impl ResponseQualityScorer {
    pub fn new(min_content_length: usize, required_markers: Vec<String>, min_option_chars: usize) -> Self {
        Self {
            min_content_length,
            required_markers,
            min_option_chars,
        }
    }

    pub fn score(&self, content: &str, choices: &[Choice]) -> ResponseQuality {
        let length = if self.min_content_length == 0 {
            1.0
        } else {
            (content.chars().count() as f64 / self.min_content_length as f64).min(1.0)
        };
        let structure = self.structure(content);
        let choice_quality = self.choice_quality(choices);
        let coherence = coherence(content);

        let score = LENGTH_WEIGHT * length
            + STRUCTURE_WEIGHT * structure
            + CHOICE_WEIGHT * choice_quality
            + COHERENCE_WEIGHT * coherence;

        ResponseQuality {
            score: score.clamp(0.0, 1.0),
            length,
            structure,
            choice_quality,
            coherence,
        }
    }

    /// Required markers present, plus enough sentences to read as narrative
    fn structure(&self, content: &str) -> f64 {
        let markers = if self.required_markers.is_empty() {
            1.0
        } else {
            let present = self
                .required_markers
                .iter()
                .filter(|m| content.contains(m.as_str()))
                .count();
            present as f64 / self.required_markers.len() as f64
        };

        let sentences = split_sentences(content).len().min(EXPECTED_SENTENCES);
        0.5 * markers + 0.5 * sentences as f64 / EXPECTED_SENTENCES as f64
    }

    /// Fraction of choices with at least two non-trivial options
    fn choice_quality(&self, choices: &[Choice]) -> f64 {
        if choices.is_empty() {
            return 0.0;
        }
        let good = choices
            .iter()
            .filter(|c| {
                c.options
                    .iter()
                    .filter(|o| o.text.trim().chars().count() >= self.min_option_chars)
                    .count()
                    >= 2
            })
            .count();
        good as f64 / choices.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choices::ChoiceOption;

    fn choices() -> Vec<Choice> {
        vec![Choice::new(
            "choice-1",
            "Jeonju",
            "Where next?",
            vec![
                ChoiceOption::new("a", "Try bibimbap at the old market", ""),
                ChoiceOption::new("b", "Walk through the hanok village", ""),
            ],
        )]
    }

    #[test]
    fn test_rich_response_scores_high() {
        let scorer = ResponseQualityScorer::new(50, Vec::new(), 2);
        let content = "The morning mist lifts over the tiled roofs. A vendor waves you over. \
                       Somewhere a bell rings twice.";
        let quality = scorer.score(content, &choices());
        assert_eq!(quality.length, 1.0);
        assert_eq!(quality.structure, 1.0);
        assert_eq!(quality.choice_quality, 1.0);
        assert!(quality.score > 0.9);
    }

    #[test]
    fn test_missing_marker_and_choices_lower_score() {
        let scorer = ResponseQualityScorer::new(50, vec!["Chapter".to_string()], 2);
        let quality = scorer.score("Too short.", &[]);
        assert_eq!(quality.choice_quality, 0.0);
        assert!(quality.structure < 0.5);
        assert!(quality.score < 0.5);
    }

    #[test]
    fn test_weights() {
        let scorer = ResponseQualityScorer::new(100, Vec::new(), 2);
        let q = scorer.score("One sentence here.", &choices());
        let expected = 0.3 * q.length + 0.3 * q.structure + 0.2 * q.choice_quality + 0.2 * q.coherence;
        assert!((q.score - expected).abs() < 1e-9);
    }
}
