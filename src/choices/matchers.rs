//! Ordered choice matchers
//!
//! Each matcher is a pure function from provider output to [`MatchOutcome`]. The processor
//! tries them from most to least structured and stops at the first `Matched`.

use super::{Choice, ChoiceOption};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Question used when a list has no introducing line
pub const DEFAULT_QUESTION: &str = "What will you do next?";

/// Paragraphs longer than this are narrative, not options
const MAX_PARAGRAPH_OPTION_CHARS: usize = 300;

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s+(?P<h>.+?)\s*#*\s*$|\*\*(?P<b>[^*]+?)\*\*:?\s*$)")
        .expect("valid heading regex")
});
static NUMBERED_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\d{1,2}|[A-Da-d])[.)]\s+(?P<item>\S.*)$").expect("valid numbered item regex")
});
static BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*•+]\s+(?P<item>\S.*)$").expect("valid bullet item regex"));
static QUESTION_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:choice|question|decision|scene)\s*\d*\s*[:.)-]\s*")
        .expect("valid question label regex")
});

/// Result of running one matcher
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(Vec<Choice>),
    NoMatch,
}

impl MatchOutcome {
    /// Keep only usable choices; `NoMatch` if none survive
    fn from_candidates(candidates: Vec<Choice>) -> Self {
        let usable: Vec<Choice> = candidates.into_iter().filter(Choice::is_usable).collect();
        if usable.is_empty() {
            MatchOutcome::NoMatch
        } else {
            MatchOutcome::Matched(usable)
        }
    }
}

pub type TextMatcher = fn(&str) -> MatchOutcome;

/// Text matchers in the order they are tried
pub const TEXT_MATCHERS: &[(&str, TextMatcher)] = &[
    ("markdown_blocks", match_markdown_blocks),
    ("numbered_list", match_numbered_list),
    ("bulleted_list", match_bulleted_list),
    ("paragraphs", match_paragraphs),
];

/// Choices the provider returned as structured JSON
///
/// Accepts an array of `{question, options}` objects, an object with a `choices` array, or
/// a flat array of option strings/objects forming a single choice.
pub fn match_structured(raw: &Value) -> MatchOutcome {
    match raw {
        Value::Object(map) => match map.get("choices") {
            Some(inner) => match_structured(inner),
            None => MatchOutcome::from_candidates(choice_from_object(raw).into_iter().collect()),
        },
        Value::Array(items) if items.iter().all(|i| i.get("options").is_some()) => {
            MatchOutcome::from_candidates(items.iter().filter_map(choice_from_object).collect())
        }
        Value::Array(items) => {
            let options = items.iter().filter_map(option_from_value).collect();
            MatchOutcome::from_candidates(vec![Choice::new("", "", DEFAULT_QUESTION, options)])
        }
        _ => MatchOutcome::NoMatch,
    }
}

fn choice_from_object(value: &Value) -> Option<Choice> {
    let options = value.get("options")?.as_array()?;
    let question = value
        .get("question")
        .or_else(|| value.get("prompt"))
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_QUESTION);
    let options = options.iter().filter_map(option_from_value).collect();
    Some(Choice::new("", "", question.trim(), options))
}

fn option_from_value(value: &Value) -> Option<ChoiceOption> {
    match value {
        Value::String(s) => Some(split_option(s)),
        Value::Object(map) => {
            let text = map
                .get("text")
                .or_else(|| map.get("label"))
                .or_else(|| map.get("title"))
                .and_then(Value::as_str)?;
            let description = map.get("description").and_then(Value::as_str).unwrap_or("");
            Some(ChoiceOption::new("", text.trim(), description.trim()))
        }
        _ => None,
    }
}

/// Markdown heading or bold line followed by list items
pub fn match_markdown_blocks(text: &str) -> MatchOutcome {
    let mut blocks: Vec<Choice> = Vec::new();
    let mut saw_heading = false;

    for line in text.lines() {
        if let Some(caps) = HEADING.captures(line) {
            let heading = caps.name("h").or_else(|| caps.name("b")).map_or("", |m| m.as_str());
            blocks.push(Choice::new("", "", &clean_question(heading), Vec::new()));
            saw_heading = true;
        } else if let Some(item) = list_item(line) {
            if let Some(block) = blocks.last_mut() {
                block.options.push(split_option(item));
            }
        } else if let Some(block) = blocks.last_mut() {
            // A question line between the heading and its options replaces the heading
            let trimmed = line.trim();
            if block.options.is_empty() && trimmed.ends_with('?') {
                block.question = clean_question(trimmed);
            }
        }
    }

    if !saw_heading {
        return MatchOutcome::NoMatch;
    }
    MatchOutcome::from_candidates(blocks)
}

/// Lines such as `1. Text - description` or `B) Text`
pub fn match_numbered_list(text: &str) -> MatchOutcome {
    MatchOutcome::from_candidates(group_list_items(text, &NUMBERED_ITEM))
}

/// Lines such as `- Text` or `* Text`
pub fn match_bulleted_list(text: &str) -> MatchOutcome {
    MatchOutcome::from_candidates(group_list_items(text, &BULLET_ITEM))
}

/// Blank-line separated paragraphs following a question paragraph
pub fn match_paragraphs(text: &str) -> MatchOutcome {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let Some(question_idx) = paragraphs.iter().rposition(|p| p.ends_with('?')) else {
        return MatchOutcome::NoMatch;
    };

    let options: Vec<ChoiceOption> = paragraphs[question_idx + 1..]
        .iter()
        .filter(|p| p.chars().count() <= MAX_PARAGRAPH_OPTION_CHARS)
        .map(|p| split_option(p))
        .collect();

    let question = crate::text::split_sentences(paragraphs[question_idx])
        .pop()
        .unwrap_or_else(|| DEFAULT_QUESTION.to_string());

    MatchOutcome::from_candidates(vec![Choice::new("", "", &clean_question(&question), options)])
}

/// Consecutive list items form one choice, introduced by the closest preceding text line
fn group_list_items(text: &str, item_pattern: &Regex) -> Vec<Choice> {
    let mut choices = Vec::new();
    let mut pending_question: Option<String> = None;
    let mut current: Option<Choice> = None;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(caps) = item_pattern.captures(line) {
            let item = caps.name("item").map_or("", |m| m.as_str());
            let choice = current.get_or_insert_with(|| {
                let question = pending_question.take().unwrap_or_else(|| DEFAULT_QUESTION.to_string());
                Choice::new("", "", &question, Vec::new())
            });
            choice.options.push(split_option(item));
        } else {
            if let Some(done) = current.take() {
                choices.push(done);
            }
            pending_question = Some(clean_question(trimmed));
        }
    }

    if let Some(done) = current {
        choices.push(done);
    }
    choices
}

fn list_item(line: &str) -> Option<&str> {
    NUMBERED_ITEM
        .captures(line)
        .or_else(|| BULLET_ITEM.captures(line))
        .and_then(|caps| caps.name("item"))
        .map(|m| m.as_str())
}

/// Split `Text - description` / `Text: description` into an option
pub fn split_option(raw: &str) -> ChoiceOption {
    let cleaned = raw.trim().replace("**", "");
    for separator in [" — ", " – ", " - ", ": "] {
        if let Some((text, description)) = cleaned.split_once(separator) {
            let (text, description) = (text.trim(), description.trim());
            if !text.is_empty() && !description.is_empty() && text.chars().count() <= 80 {
                return ChoiceOption::new("", text, description);
            }
        }
    }
    ChoiceOption::new("", cleaned.trim(), "")
}

fn clean_question(raw: &str) -> String {
    let stripped = raw.trim().trim_matches('*').trim();
    QUESTION_LABEL.replace(stripped, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matched(outcome: MatchOutcome) -> Vec<Choice> {
        match outcome {
            MatchOutcome::Matched(choices) => choices,
            MatchOutcome::NoMatch => panic!("Expected a match"),
        }
    }

    #[test]
    fn test_structured_array_of_choices() {
        let raw = json!([
            {"question": "Where to?", "options": ["Market", {"text": "Harbor", "description": "Boats leave at dawn"}]}
        ]);
        let choices = matched(match_structured(&raw));
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].question, "Where to?");
        assert_eq!(choices[0].options[1].description, "Boats leave at dawn");
    }

    #[test]
    fn test_structured_null_is_no_match() {
        assert_eq!(match_structured(&Value::Null), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_markdown_blocks() {
        let text = "The rain stops.\n\n## Choice 1: Which path?\n- Take the bridge - it sways\n- Wade across\n\n## Choice 2: Who do you trust?\n1. The guide\n2. The merchant";
        let choices = matched(match_markdown_blocks(text));
        assert_eq!(choices.len(), 2);
        assert_eq!(choices[0].question, "Which path?");
        assert_eq!(choices[0].options[0].text, "Take the bridge");
        assert_eq!(choices[0].options[0].description, "it sways");
        assert_eq!(choices[1].options.len(), 2);
    }

    #[test]
    fn test_markdown_requires_heading() {
        assert_eq!(match_markdown_blocks("1. Go\n2. Stay"), MatchOutcome::NoMatch);
    }

    #[test]
    fn test_numbered_list_uses_preceding_question() {
        let text = "You reach the gate.\nWhat do you do?\n1. Knock: someone may answer\n2) Climb the wall\n3. Wait";
        let choices = matched(match_numbered_list(text));
        assert_eq!(choices.len(), 1);
        assert_eq!(choices[0].question, "What do you do?");
        assert_eq!(choices[0].options.len(), 3);
        assert_eq!(choices[0].options[0].text, "Knock");
        assert_eq!(choices[0].options[0].description, "someone may answer");
    }

    #[test]
    fn test_bulleted_list_defaults_question() {
        let choices = matched(match_bulleted_list("* Run\n* Hide"));
        assert_eq!(choices[0].question, DEFAULT_QUESTION);
    }

    #[test]
    fn test_paragraphs_after_question() {
        let text = "The tea house is quiet.\n\nDo you stay or go?\n\nStay and order another pot of tea.\n\nLeave through the back door.";
        let choices = matched(match_paragraphs(text));
        assert_eq!(choices[0].question, "Do you stay or go?");
        assert_eq!(choices[0].options.len(), 2);
    }

    #[test]
    fn test_plain_narrative_matches_nothing() {
        let text = "A long quiet day passes in the village.";
        for (_, matcher) in TEXT_MATCHERS {
            assert_eq!(matcher(text), MatchOutcome::NoMatch);
        }
    }
}
