//! Compression stage implementations

use crate::text::{keyword_frequencies, split_sentences, words};
use crate::tokens::TokenEstimator;
use regex::Regex;
use std::sync::LazyLock;

/// Keywords considered when pruning sentences
const PRUNING_KEYWORDS: usize = 20;

static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid space regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("valid blank line regex"));
static PUNCTUATION_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<mark>[!?,;:])[!?,;:]+|\.{4,}|-{3,}").expect("valid punctuation regex"));
static SENTENCE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<end>[.!?]\s+)(?P<first>\p{Ll})").expect("valid sentence start regex"));
static SPACE_BEFORE_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,!?;:])").expect("valid punctuation spacing regex"));

/// Filler words, removed first
static FILLER_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:really|very|just|actually|basically|quite|simply|literally|definitely|certainly|totally|completely|absolutely|extremely|honestly|essentially)\b",
    )
    .expect("valid filler regex")
});

/// Wordy connectives and their short replacements, applied after fillers
static CONNECTIVES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bin order to\b", "to"),
        (r"(?i)\bdue to the fact that\b", "because"),
        (r"(?i)\bat this point in time\b", "now"),
        (r"(?i)\bin the event that\b", "if"),
        (r"(?i)\bfor the purpose of\b", "for"),
        (r"(?i)\b(?:as a matter of fact|needless to say|it is worth noting that|furthermore|moreover|additionally|in addition),?", ""),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).expect("valid connective regex"), r))
    .collect()
});

static HEDGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:perhaps|maybe|somewhat|possibly|probably|i think|i believe|it seems that|it appears that|kind of|sort of|a bit|more or less),?",
    )
    .expect("valid hedge regex")
});

static DOUBLE_NEGATIVES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bnot unlikely\b", "likely"),
        (r"(?i)\bnot uncommon\b", "common"),
        (r"(?i)\bnot impossible\b", "possible"),
        (r"(?i)\bnot unusual\b", "usual"),
        (r"(?i)\bnot unimportant\b", "important"),
        (r"(?i)\bnot without\b", "with"),
        (r"(?i)\bnot dissimilar\b", "similar"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).expect("valid double negative regex"), r))
    .collect()
});

static RUN_ON_JOINS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:,\s+and|,\s+but|;)\s+(?P<next>\w)").expect("valid run-on regex"));

/// Whitespace and punctuation runs, then fillers, then wordy connectives
///
/// Stops after the first sub-step that brings the text within `budget` tokens.
pub fn remove_redundancy(text: &str, budget: usize, estimator: &TokenEstimator) -> String {
    let collapsed = PUNCTUATION_RUNS.replace_all(text, |caps: &regex::Captures| match caps.name("mark") {
        Some(mark) => mark.as_str().to_string(),
        None if caps[0].starts_with('.') => "...".to_string(),
        None => "-".to_string(),
    });
    let mut result = tidy(&collapsed);
    if estimator.estimate(&result) <= budget {
        return result;
    }

    result = tidy(&FILLER_WORDS.replace_all(&result, ""));
    if estimator.estimate(&result) <= budget {
        return result;
    }

    for (pattern, replacement) in CONNECTIVES.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }
    tidy(&result)
}

/// Split run-on sentences, remove hedges and collapse double negatives
pub fn restructure(text: &str) -> String {
    let mut result = RUN_ON_JOINS
        .replace_all(text, |caps: &regex::Captures| {
            format!(". {}", capitalize(&caps["next"]))
        })
        .into_owned();

    result = HEDGES.replace_all(&result, "").into_owned();
    for (pattern, replacement) in DOUBLE_NEGATIVES.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }

    tidy(&result)
}

/// Keep the sentences carrying the most keyword weight within `budget` tokens
///
/// At least one sentence always survives. Kept sentences stay in their original order.
pub fn prune_by_keywords(text: &str, budget: usize, estimator: &TokenEstimator) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.to_string();
    }

    let keywords = keyword_frequencies(text, PRUNING_KEYWORDS);
    let mut ranked: Vec<(usize, usize)> = sentences
        .iter()
        .enumerate()
        .map(|(i, sentence)| {
            let present = words(sentence);
            let score = keywords
                .iter()
                .filter(|(word, _)| present.contains(word))
                .map(|(_, count)| *count)
                .sum();
            (i, score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut kept = Vec::new();
    let mut used = 0;
    for (index, _) in ranked {
        let cost = estimator.estimate(&sentences[index]);
        if kept.is_empty() || used + cost <= budget {
            kept.push(index);
            used += cost;
        }
    }
    kept.sort_unstable();

    kept.into_iter()
        .map(|i| sentences[i].as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalise spacing line by line and capitalise line starts
fn tidy(text: &str) -> String {
    let text = BLANK_LINES.replace_all(text, "\n");
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            let line = SPACE_RUNS.replace_all(line, " ");
            let line = SPACE_BEFORE_PUNCTUATION.replace_all(&line, "$1");
            let line = line.trim().trim_start_matches([',', ';']).trim_start();
            let line = SENTENCE_START.replace_all(line, |caps: &regex::Captures| {
                format!("{}{}", &caps["end"], caps["first"].to_uppercase())
            });
            capitalize(&line)
        })
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
