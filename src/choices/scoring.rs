//! Heuristic scoring of extracted options

use super::{Choice, ChoiceOption};
use crate::text::words;
use std::collections::HashSet;

const LENGTH_WEIGHT: f64 = 0.3;
const SPECIFICITY_WEIGHT: f64 = 0.25;
const TENSION_WEIGHT: f64 = 0.2;
const COHERENCE_WEIGHT: f64 = 0.25;

/// Character range that earns the full length score
const IDEAL_MIN_CHARS: usize = 50;
const IDEAL_MAX_CHARS: usize = 200;
/// Options shorter than this are considered trivial by the coherence check
const TRIVIAL_CHARS: usize = 10;

const ACTION_WORDS: &[&str] = &[
    "ask", "approach", "buy", "call", "climb", "cross", "eat", "enter", "explore", "find",
    "follow", "go", "head", "help", "hide", "investigate", "join", "leave", "listen", "look",
    "meet", "open", "order", "read", "rest", "return", "run", "search", "take", "talk", "try",
    "visit", "wait", "walk", "watch", "write",
];

const TENSION_WORDS: &[&str] = &[
    "betray", "chase", "confront", "conflict", "danger", "dangerous", "dark", "deadline",
    "escape", "fear", "forbidden", "hidden", "last", "lose", "mystery", "risk", "risky", "secret",
    "stranger", "strange", "threat", "trap", "trust", "urgent", "warn", "warning",
];

/// Scores options and choices; implementations must be deterministic
pub trait ChoiceScorer: Send + Sync {
    /// Score a single option in `[0, 1]`
    fn score_option(&self, option: &ChoiceOption) -> f64;

    /// Score a whole choice; defaults to the mean option score
    fn score_choice(&self, choice: &Choice) -> f64 {
        if choice.options.is_empty() {
            return 0.0;
        }
        let total: f64 = choice.options.iter().map(|o| self.score_option(o)).sum();
        total / choice.options.len() as f64
    }
}

/// Breakdown of a single option's score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionScore {
    pub length: f64,
    pub specificity: f64,
    pub tension: f64,
    pub coherence: f64,
}

impl OptionScore {
    pub fn total(&self) -> f64 {
        LENGTH_WEIGHT * self.length
            + SPECIFICITY_WEIGHT * self.specificity
            + TENSION_WEIGHT * self.tension
            + COHERENCE_WEIGHT * self.coherence
    }
}

/// Default scorer built from length, specificity, narrative tension and coherence
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn breakdown(&self, option: &ChoiceOption) -> OptionScore {
        let text = option.full_text();
        OptionScore {
            length: length_score(text.chars().count()),
            specificity: specificity(&text),
            tension: tension(&text),
            coherence: coherence(&text),
        }
    }
}

impl ChoiceScorer for HeuristicScorer {
    fn score_option(&self, option: &ChoiceOption) -> f64 {
        self.breakdown(option).total().clamp(0.0, 1.0)
    }
}

/// Peaks at 1.0 for 50-200 characters
pub fn length_score(chars: usize) -> f64 {
    if chars < IDEAL_MIN_CHARS {
        chars as f64 / IDEAL_MIN_CHARS as f64
    } else if chars <= IDEAL_MAX_CHARS {
        1.0
    } else {
        (1.0 - (chars - IDEAL_MAX_CHARS) as f64 / 300.0).max(0.0)
    }
}

/// Concrete actions, numerals and proper nouns
pub fn specificity(text: &str) -> f64 {
    let tokens = words(text);
    let mut score: f64 = 0.0;

    if tokens.iter().any(|w| ACTION_WORDS.contains(&w.as_str())) {
        score += 0.6;
    }
    if text.chars().any(|c| c.is_ascii_digit()) {
        score += 0.2;
    }
    // Capitalised word after the first one, e.g. "Visit Gyeongbok Palace"
    let proper_noun = text
        .split_whitespace()
        .skip(1)
        .any(|w| w.chars().next().is_some_and(|c| c.is_uppercase()));
    if proper_noun {
        score += 0.2;
    }

    score.min(1.0)
}

/// Conflict and stakes vocabulary
pub fn tension(text: &str) -> f64 {
    let hits = words(text)
        .iter()
        .filter(|w| TENSION_WORDS.contains(&w.as_str()))
        .count();
    (hits as f64 * 0.5).min(1.0)
}

/// Starts at 1.0 and loses 0.4 for each defect: repetition, anomalous characters, trivial length
pub fn coherence(text: &str) -> f64 {
    let mut score: f64 = 1.0;

    if has_repetition(text) {
        score -= 0.4;
    }
    if has_anomalous_characters(text) {
        score -= 0.4;
    }
    if text.trim().chars().count() < TRIVIAL_CHARS {
        score -= 0.4;
    }

    score.max(0.0)
}

/// A word repeated three times in a row, or a word trigram that occurs twice
fn has_repetition(text: &str) -> bool {
    let tokens = words(text);

    if tokens.windows(3).any(|w| w[0] == w[1] && w[1] == w[2]) {
        return true;
    }

    let mut seen = HashSet::new();
    tokens.windows(3).any(|w| !seen.insert(w.join(" ")))
}

fn has_anomalous_characters(text: &str) -> bool {
    if text
        .chars()
        .any(|c| c == '\u{FFFD}' || (c.is_control() && c != '\n' && c != '\t'))
    {
        return true;
    }

    // Runs like "###" or "@@@" usually mean a formatting leak
    let chars: Vec<char> = text.chars().collect();
    chars.windows(3).any(|w| {
        w[0] == w[1] && w[1] == w[2] && !w[0].is_alphanumeric() && !w[0].is_whitespace() && w[0] != '.'
    })
}
