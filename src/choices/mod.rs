//! Choice extraction, normalisation, ranking and limiting
//!
//! Provider output is turned into [`Choice`] values by an ordered list of pure matchers
//! (see [`matchers`]). Each choice then has its options normalised to the required count:
//! extra options are trimmed by score, a choice with exactly `pad_when_exactly` valid
//! options is padded with a single filler, and a choice with fewer than two valid options
//! gets the fixed default option set. Finally [`ChoiceProcessor::limit_choices`] ranks
//! whole choices and keeps the best `max_choices`.

pub mod matchers;
mod scoring;

pub use matchers::{MatchOutcome, DEFAULT_QUESTION};
pub use scoring::{coherence, ChoiceScorer, HeuristicScorer, OptionScore};

use crate::text::text_jaccard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Options with token-Jaccard similarity above this are near-duplicates
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.8;

/// One selectable branch of a choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub description: String,
}

impl ChoiceOption {
    pub fn new(id: impl Into<String>, text: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            description: description.into(),
        }
    }

    /// Text and description joined, for scoring
    pub fn full_text(&self) -> String {
        if self.description.is_empty() {
            self.text.clone()
        } else {
            format!("{} {}", self.text, self.description)
        }
    }
}

/// A branching decision point in the narrative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    #[serde(default)]
    pub location: String,
    pub question: String,
    pub options: Vec<ChoiceOption>,
}

impl Choice {
    pub fn new(
        id: impl Into<String>,
        location: impl Into<String>,
        question: impl Into<String>,
        options: Vec<ChoiceOption>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            question: question.into(),
            options,
        }
    }

    /// Worth keeping from a matcher: at least one option with text
    pub fn is_usable(&self) -> bool {
        self.options.iter().any(|o| !o.text.trim().is_empty())
    }

    /// At least two options
    pub fn is_valid(&self) -> bool {
        self.options.len() >= 2
    }
}

/// Result of ranking and truncating a choice set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitedChoices {
    pub original_count: usize,
    pub limited_count: usize,
    pub choices: Vec<Choice>,
    pub removed: Vec<Choice>,
    /// Average score of kept choices divided by average score of all choices
    pub quality: f64,
}

/// Pads a choice that came back one option short
///
/// Only applies when the number of valid options equals `pad_when_exactly`. Fewer options
/// than that fall back to the default option set instead of being padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingRule {
    pub enabled: bool,
    pub pad_when_exactly: usize,
    pub filler_text: String,
    pub filler_description: String,
}

impl Default for PaddingRule {
    fn default() -> Self {
        Self {
            enabled: true,
            pad_when_exactly: 2,
            filler_text: "Consider more carefully".to_string(),
            filler_description: "Take a moment to weigh the situation before acting.".to_string(),
        }
    }
}

/// Rules the processor enforces on every choice
#[derive(Debug, Clone)]
pub struct ChoiceRules {
    /// Options each choice must end up with
    pub options_per_choice: usize,
    /// Options shorter than this (in characters) are discarded as trivial
    pub min_option_chars: usize,
    pub padding: PaddingRule,
}

impl Default for ChoiceRules {
    fn default() -> Self {
        Self {
            options_per_choice: 3,
            min_option_chars: 2,
            padding: PaddingRule::default(),
        }
    }
}

/// What happened to a choice's options during normalisation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionOutcome {
    Kept,
    Trimmed,
    Padded,
    Defaulted,
}

/// Extracted and normalised choices
#[derive(Debug, Clone)]
pub struct ProcessedChoices {
    pub choices: Vec<Choice>,
    /// Nothing could be parsed and the default choice set was substituted
    pub defaulted: bool,
    pub padded: usize,
}

/// Extracts, normalises, ranks and limits choices
#[derive(Clone)]
pub struct ChoiceProcessor {
    rules: ChoiceRules,
    scorer: Arc<dyn ChoiceScorer>,
}

impl ChoiceProcessor {
    pub fn new(rules: ChoiceRules) -> Self {
        Self::with_scorer(rules, Arc::new(HeuristicScorer))
    }

    pub fn with_scorer(rules: ChoiceRules, scorer: Arc<dyn ChoiceScorer>) -> Self {
        Self { rules, scorer }
    }

    pub fn rules(&self) -> &ChoiceRules {
        &self.rules
    }

    /// Run the matchers against a provider response
    ///
    /// Structured `raw_choices` are tried first; the text matchers then run over
    /// `raw_choices` when it is a string, otherwise over `content`.
    pub fn extract_choices(&self, content: &str, raw_choices: &Value) -> Vec<Choice> {
        if let MatchOutcome::Matched(choices) = matchers::match_structured(raw_choices) {
            debug!("Extracted {} choices from structured output", choices.len());
            return assign_ids(choices);
        }

        let text = raw_choices.as_str().unwrap_or(content);
        for (name, matcher) in matchers::TEXT_MATCHERS {
            if let MatchOutcome::Matched(choices) = matcher(text) {
                debug!("Extracted {} choices with {} matcher", choices.len(), name);
                return assign_ids(choices);
            }
        }

        Vec::new()
    }

    /// Extract choices and normalise their options, substituting the default set when
    /// nothing usable was found
    pub fn process(&self, content: &str, raw_choices: &Value, location: &str) -> ProcessedChoices {
        let extracted = self.extract_choices(content, raw_choices);

        if extracted.is_empty() {
            info!("No choices could be parsed from the response, using the default choice set");
            return ProcessedChoices {
                choices: self.default_choice_set(location),
                defaulted: true,
                padded: 0,
            };
        }

        let mut padded = 0;
        let choices = extracted
            .into_iter()
            .map(|mut choice| {
                if choice.location.is_empty() {
                    choice.location = location.to_string();
                }
                let (choice, outcome) = self.normalize_options(choice);
                if outcome == OptionOutcome::Padded {
                    padded += 1;
                }
                choice
            })
            .collect();

        ProcessedChoices {
            choices,
            defaulted: false,
            padded,
        }
    }

    /// Bring a choice's options to the required count
    pub fn normalize_options(&self, mut choice: Choice) -> (Choice, OptionOutcome) {
        let required = self.rules.options_per_choice;
        let mut valid: Vec<ChoiceOption> = Vec::with_capacity(choice.options.len());
        for option in choice.options.drain(..) {
            let trivial = option.text.trim().chars().count() < self.rules.min_option_chars;
            let duplicate = valid
                .iter()
                .any(|kept| kept.text.eq_ignore_ascii_case(option.text.trim()));
            if !trivial && !duplicate {
                valid.push(option);
            }
        }

        let count = valid.len();
        let padding = &self.rules.padding;

        let outcome = if count > required {
            valid = self.best_options(valid, required);
            OptionOutcome::Trimmed
        } else if count == required {
            OptionOutcome::Kept
        } else if padding.enabled && count == padding.pad_when_exactly && count >= 2 {
            valid.push(ChoiceOption::new(
                "",
                padding.filler_text.as_str(),
                padding.filler_description.as_str(),
            ));
            OptionOutcome::Padded
        } else if count < 2 {
            valid = default_options(required);
            OptionOutcome::Defaulted
        } else {
            OptionOutcome::Kept
        };

        choice.options = valid;
        renumber_options(&mut choice);
        (choice, outcome)
    }

    /// Keep the `n` best-scoring options, preserving their original order
    fn best_options(&self, options: Vec<ChoiceOption>, n: usize) -> Vec<ChoiceOption> {
        let mut ranked: Vec<(usize, f64)> = options
            .iter()
            .enumerate()
            .map(|(i, o)| (i, self.scorer.score_option(o)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut keep: Vec<usize> = ranked.into_iter().take(n).map(|(i, _)| i).collect();
        keep.sort_unstable();

        options
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep.binary_search(i).is_ok())
            .map(|(_, o)| o)
            .collect()
    }

    /// Rank choices by score and keep the best `max_choices`
    pub fn limit_choices(&self, choices: Vec<Choice>, max_choices: usize) -> LimitedChoices {
        let original_count = choices.len();
        let mut scored: Vec<(f64, Choice)> = choices
            .into_iter()
            .map(|c| (self.scorer.score_choice(&c), c))
            .collect();

        // Stable sort keeps the original order among equal scores
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let all_avg = average(scored.iter().map(|(s, _)| *s));
        let keep = original_count.min(max_choices);
        let removed_scored = scored.split_off(keep);
        let kept_avg = average(scored.iter().map(|(s, _)| *s));

        let quality = if all_avg > 0.0 { kept_avg / all_avg } else { 1.0 };

        if !removed_scored.is_empty() {
            debug!(
                "Limited {} choices to {} (quality ratio {:.2})",
                original_count, keep, quality
            );
        }

        LimitedChoices {
            original_count,
            limited_count: keep,
            choices: scored.into_iter().map(|(_, c)| c).collect(),
            removed: removed_scored.into_iter().map(|(_, c)| c).collect(),
            quality,
        }
    }

    /// Every choice has at least two non-trivial options and no near-duplicate options
    pub fn validate_choices(&self, choices: &[Choice]) -> bool {
        if choices.is_empty() {
            return false;
        }

        choices.iter().all(|choice| {
            choice.is_valid()
                && choice
                    .options
                    .iter()
                    .all(|o| o.text.trim().chars().count() >= self.rules.min_option_chars)
                && is_diverse(&choice.options)
        })
    }

    /// The fixed fallback used when nothing usable was parsed
    pub fn default_choice_set(&self, location: &str) -> Vec<Choice> {
        let mut choice = Choice::new(
            "choice-1",
            location,
            DEFAULT_QUESTION,
            default_options(self.rules.options_per_choice),
        );
        renumber_options(&mut choice);
        vec![choice]
    }

    pub fn score_choice(&self, choice: &Choice) -> f64 {
        self.scorer.score_choice(choice)
    }
}

impl Default for ChoiceProcessor {
    fn default() -> Self {
        Self::new(ChoiceRules::default())
    }
}

impl std::fmt::Debug for ChoiceProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChoiceProcessor")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// No two options in the set are near-duplicates of each other
pub fn is_diverse(options: &[ChoiceOption]) -> bool {
    for (i, a) in options.iter().enumerate() {
        for b in &options[i + 1..] {
            if text_jaccard(&a.text, &b.text) > NEAR_DUPLICATE_THRESHOLD {
                return false;
            }
        }
    }
    true
}

fn default_options(count: usize) -> Vec<ChoiceOption> {
    [
        (
            "Explore the surroundings",
            "Look around for details you may have missed.",
        ),
        (
            "Talk to someone nearby",
            "Ask a local for advice or a story about this place.",
        ),
        (
            "Move on to the next place",
            "Continue the journey and see what waits ahead.",
        ),
    ]
    .into_iter()
    .take(count.max(2))
    .map(|(text, description)| ChoiceOption::new("", text, description))
    .collect()
}

fn assign_ids(mut choices: Vec<Choice>) -> Vec<Choice> {
    for (i, choice) in choices.iter_mut().enumerate() {
        choice.id = format!("choice-{}", i + 1);
        renumber_options(choice);
    }
    choices
}

fn renumber_options(choice: &mut Choice) {
    for (j, option) in choice.options.iter_mut().enumerate() {
        option.id = format!("{}-option-{}", choice.id, j + 1);
    }
}

fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
