//! Canonical request fingerprints used as cache keys
//!
//! Volatile substrings (timestamps, clock times, UUIDs, long hex ids, epoch numbers) are
//! replaced with placeholders so that two requests differing only in such noise share a
//! key. Prior choices contribute their ordinal and a truncated prefix, and preferences are
//! case-normalised. Anything else that differs produces a different key.

use crate::provider::{Preferences, PriorChoice};
use crate::text::{collapse_whitespace, truncate_chars};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

/// Characters of each prior choice that take part in the fingerprint
const PRIOR_CHOICE_PREFIX_CHARS: usize = 50;

static VOLATILE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (
            r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?",
            "<timestamp>",
        ),
        (r"\b\d{4}-\d{2}-\d{2}\b", "<date>"),
        (
            r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b",
            "<uuid>",
        ),
        (r"\b\d{1,2}:\d{2}(?::\d{2})?(?:\s?[AaPp][Mm])?\b", "<time>"),
        (r"(?i)\b[0-9a-f]*\d[0-9a-f]*[a-f][0-9a-f]*\b", "<id>"),
        (r"\b\d{10,13}\b", "<epoch>"),
    ]
    .into_iter()
    .map(|(pattern, placeholder)| (Regex::new(pattern).expect("valid volatile pattern regex"), placeholder))
    .collect()
});

/// Hex runs shorter than this are treated as ordinary words
const MIN_HEX_ID_CHARS: usize = 12;

/// A canonical request fingerprint and its cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Human-readable canonical form
    pub canonical: String,
    /// SHA-256 hex of the canonical form
    pub key: String,
}

/// Replace volatile substrings with placeholders and collapse whitespace
pub fn normalize_volatile(prompt: &str) -> String {
    let mut text = prompt.to_string();
    for (pattern, placeholder) in VOLATILE_PATTERNS.iter() {
        if *placeholder == "<id>" {
            text = pattern
                .replace_all(&text, |caps: &regex::Captures| {
                    let m = &caps[0];
                    if m.len() >= MIN_HEX_ID_CHARS {
                        placeholder.to_string()
                    } else {
                        m.to_string()
                    }
                })
                .into_owned();
        } else {
            text = pattern.replace_all(&text, *placeholder).into_owned();
        }
    }
    collapse_whitespace(&text)
}

/// Build the fingerprint for a generation request
pub fn fingerprint(
    prompt: &str,
    prior_choices: &[PriorChoice],
    preferences: &Preferences,
    location: &str,
    max_choices: usize,
    compressed: bool,
) -> Fingerprint {
    let mut canonical = normalize_volatile(prompt);

    canonical.push_str("\n#choices:");
    for choice in prior_choices {
        let text = collapse_whitespace(&choice.text);
        let prefix = truncate_chars(&text, PRIOR_CHOICE_PREFIX_CHARS);
        canonical.push_str(&format!("[{}:{}]", choice.ordinal, prefix));
    }

    canonical.push_str(&format!(
        "\n#prefs:{}|{}|{}",
        preferences.genre.trim().to_lowercase(),
        preferences.style.trim().to_lowercase(),
        preferences.mood.trim().to_lowercase()
    ));
    canonical.push_str(&format!("\n#location:{}", location.trim()));
    canonical.push_str(&format!("\n#max:{}", max_choices));
    // Responses to compressed prompts are not served to uncompressed requests
    canonical.push_str(&format!("\n#compressed:{}", compressed));

    let key = format!("{:x}", Sha256::digest(canonical.as_bytes()));

    Fingerprint { canonical, key }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(genre: &str) -> Preferences {
        Preferences {
            genre: genre.to_string(),
            style: "Lyrical".to_string(),
            mood: "calm".to_string(),
        }
    }

    fn key(prompt: &str) -> String {
        fingerprint(prompt, &[], &prefs("mystery"), "Seoul", 3, true).key
    }

    #[test]
    fn test_volatile_substrings_are_ignored() {
        assert_eq!(
            key("Story requested at 2024-05-01T10:22:33Z for session 550e8400-e29b-41d4-a716-446655440000"),
            key("Story requested at 2025-11-30T23:59:01Z for session 123e4567-e89b-12d3-a456-426614174000")
        );
        assert_eq!(key("Arrive at 9:30 pm"), key("Arrive at 11:05 PM"));
        assert_eq!(key("request 1714557600123"), key("request 1700000000000"));
        assert_eq!(key("trace 5f3a9c21b7e04d88"), key("trace 0a1b2c3d4e5f6a7b"));
        assert_eq!(key("Walk  the\n\tmarket"), key("Walk the market"));
    }

    #[test]
    fn test_semantic_changes_alter_key() {
        assert_ne!(key("Walk the market"), key("Walk the harbor"));
        assert_ne!(
            fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 3, true).key,
            fingerprint("Walk", &[], &prefs("romance"), "Seoul", 3, true).key
        );
        assert_ne!(
            fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 3, true).key,
            fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 2, true).key
        );
    }

    #[test]
    fn test_compression_flag_alters_key() {
        let compressed = fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 3, true);
        let plain = fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 3, false);
        assert_ne!(compressed.key, plain.key);
        assert!(plain.canonical.ends_with("#compressed:false"));
    }

    #[test]
    fn test_preferences_case_insensitive() {
        assert_eq!(
            fingerprint("Walk", &[], &prefs("Mystery "), "Seoul", 3, true).key,
            fingerprint("Walk", &[], &prefs("mystery"), "Seoul", 3, true).key
        );
    }

    #[test]
    fn test_prior_choices_use_ordinal_and_prefix() {
        let long_a = format!("{} ending one", "x".repeat(60));
        let long_b = format!("{} ending two", "x".repeat(60));
        let choice = |ordinal, text: &str| PriorChoice {
            ordinal,
            text: text.to_string(),
        };

        let a = fingerprint("Walk", &[choice(1, &long_a)], &prefs("mystery"), "Seoul", 3, true);
        let b = fingerprint("Walk", &[choice(1, &long_b)], &prefs("mystery"), "Seoul", 3, true);
        assert_eq!(a.key, b.key);

        let c = fingerprint("Walk", &[choice(2, &long_a)], &prefs("mystery"), "Seoul", 3, true);
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn test_short_hex_words_kept() {
        assert_eq!(normalize_volatile("cafe 42"), "cafe 42");
    }
}
