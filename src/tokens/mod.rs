//! Token estimation for arbitrary text
//!
//! Two modes are available:
//!
//! - **Heuristic**: cheap, language-aware approximation used on the hot path by the
//!   compressor and the orchestrator's telemetry.
//! - **Precise**: BPE tokenization (`cl100k_base`) for when cost prediction matters. If the
//!   BPE tables cannot be loaded, a sub-word approximation is used instead.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Tokens contributed by a single CJK or Hangul character
const CJK_CHAR_TOKENS: f64 = 0.7;
/// Tokens contributed by a Latin word
const LATIN_WORD_TOKENS: f64 = 0.75;
/// Tokens contributed by a run of digits
const NUMBER_TOKENS: f64 = 0.5;
/// Tokens contributed by a punctuation or symbol character
const PUNCTUATION_TOKENS: f64 = 0.25;

/// Characters per sub-word piece in the precise fallback
const SUBWORD_CHARS: usize = 4;

static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

/// Estimation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMode {
    #[default]
    Heuristic,
    Precise,
}

/// Token counter shared by the compressor and cost estimation
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator {
    mode: EstimationMode,
}

impl TokenEstimator {
    pub fn new(mode: EstimationMode) -> Self {
        Self { mode }
    }

    pub fn heuristic() -> Self {
        Self::new(EstimationMode::Heuristic)
    }

    pub fn precise() -> Self {
        Self::new(EstimationMode::Precise)
    }

    pub fn mode(&self) -> EstimationMode {
        self.mode
    }

    /// Estimate the token count of `text` using the configured mode
    pub fn estimate(&self, text: &str) -> usize {
        match self.mode {
            EstimationMode::Heuristic => estimate_heuristic(text),
            EstimationMode::Precise => estimate_precise(text),
        }
    }
}

/// Language-aware heuristic estimate
pub fn estimate_heuristic(text: &str) -> usize {
    let mut total = 0.0;
    let mut in_word = false;
    let mut in_number = false;

    for c in text.chars() {
        if is_cjk(c) {
            total += CJK_CHAR_TOKENS;
            in_word = false;
            in_number = false;
        } else if c.is_ascii_digit() {
            if !in_number {
                total += NUMBER_TOKENS;
                in_number = true;
            }
            in_word = false;
        } else if c.is_alphabetic() || (c == '\'' && in_word) {
            if !in_word {
                total += LATIN_WORD_TOKENS;
                in_word = true;
            }
            in_number = false;
        } else if c.is_whitespace() {
            in_word = false;
            in_number = false;
        } else {
            total += PUNCTUATION_TOKENS;
            in_word = false;
            in_number = false;
        }
    }

    total.ceil() as usize
}

/// BPE token count, falling back to the sub-word approximation
pub fn estimate_precise(text: &str) -> usize {
    match bpe() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_subword(text),
    }
}

fn bpe() -> Option<&'static CoreBPE> {
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            warn!("Failed to load cl100k_base tokenizer, using sub-word approximation: {}", e);
            None
        }
    })
    .as_ref()
}

/// Approximate sub-word tokenization without a vocabulary
pub fn estimate_subword(text: &str) -> usize {
    let mut total = 0;
    let mut word_len = 0;

    for c in text.chars() {
        if is_cjk(c) {
            flush(&mut word_len, &mut total);
            total += 1;
        } else if c.is_alphanumeric() {
            word_len += 1;
        } else if c.is_whitespace() {
            flush(&mut word_len, &mut total);
        } else {
            flush(&mut word_len, &mut total);
            total += 1;
        }
    }
    flush(&mut word_len, &mut total);

    total
}

fn flush(word_len: &mut usize, total: &mut usize) {
    if *word_len > 0 {
        *total += word_len.div_ceil(SUBWORD_CHARS);
        *word_len = 0;
    }
}

/// CJK ideographs, kana and Hangul
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF     // Hiragana, Katakana
        | 0x3400..=0x4DBF   // CJK Extension A
        | 0x4E00..=0x9FFF   // CJK Unified Ideographs
        | 0xF900..=0xFAFF   // CJK Compatibility Ideographs
        | 0x1100..=0x11FF   // Hangul Jamo
        | 0x3130..=0x318F   // Hangul Compatibility Jamo
        | 0xAC00..=0xD7AF   // Hangul Syllables
        | 0x20000..=0x2A6DF // CJK Extension B
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert_eq!(estimate_heuristic(""), 0);
        assert_eq!(estimate_subword(""), 0);
    }

    #[test]
    fn test_latin_words() {
        // 4 words * 0.75 = 3.0
        assert_eq!(estimate_heuristic("the quick brown fox"), 3);
        // 4 words + one period = 3.25 -> 4
        assert_eq!(estimate_heuristic("the quick brown fox."), 4);
    }

    #[test]
    fn test_hangul_and_cjk() {
        // 5 Hangul syllables * 0.7 = 3.5 -> 4
        assert_eq!(estimate_heuristic("안녕하세요"), 4);
        // 2 ideographs * 0.7 = 1.4 -> 2
        assert_eq!(estimate_heuristic("東京"), 2);
        assert!(is_cjk('한'));
        assert!(!is_cjk('a'));
    }

    #[test]
    fn test_numbers_count_once_per_run() {
        // one number run (0.5) + one word (0.75) = 1.25 -> 2
        assert_eq!(estimate_heuristic("2024 tickets"), 2);
    }

    #[test]
    fn test_subword_splits_long_words() {
        // "internationalization" = 20 chars -> 5 pieces
        assert_eq!(estimate_subword("internationalization"), 5);
        assert_eq!(estimate_subword("go, now!"), 4);
    }

    #[test]
    fn test_precise_counts_tokens() {
        let estimator = TokenEstimator::precise();
        assert!(estimator.estimate("Walk into the old market and ask about the map.") > 5);
    }
}
