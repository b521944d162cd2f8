//! Heuristics applied to agent output: the acceptance gate for reader
//! analyses and the classifier that catches a full report leaking into a
//! chat answer.

use serde::{Deserialize, Serialize};

pub const MAX_ANALYSIS_ATTEMPTS: u32 = 15;
pub const MIN_REPORT_CHARS: usize = 500;
pub const BANNED_PHRASES: [&str; 3] = ["sorry", "certainly", "AI"];
pub const STOP_WORDS: [&str; 5] = ["stop", "quit", "exit", "finish", "end"];

/// Markers whose presence in a chat answer means the anchor emitted a report.
pub const SECTION_MARKERS: [&str; 4] = [
    "Patient Information:",
    "Findings:",
    "Impression:",
    "Plan:",
];

const EMPTY_LEAK_REPLY: &str = "I've updated the report.";

/// True when `input`, trimmed and lower-cased, ends the Q&A session.
pub fn is_stop_word(input: &str) -> bool {
    let normalized = input.trim().to_lowercase();
    STOP_WORDS.contains(&normalized.as_str())
}

/// How banned phrases are matched. Both modes ignore case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseMatch {
    /// Anywhere in the text, including inside longer words.
    #[default]
    Substring,
    /// Only where not flanked by letters or digits.
    WholeWord,
}

/// Acceptance test for reader output: long enough and free of hedging phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityGate {
    pub min_chars: usize,
    pub banned_phrases: Vec<String>,
    pub match_mode: PhraseMatch,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_chars: MIN_REPORT_CHARS,
            banned_phrases: BANNED_PHRASES.iter().map(|p| p.to_string()).collect(),
            match_mode: PhraseMatch::Substring,
        }
    }
}

impl QualityGate {
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }

    pub fn with_match_mode(mut self, match_mode: PhraseMatch) -> Self {
        self.match_mode = match_mode;
        self
    }

    pub fn accepts(&self, text: &str) -> bool {
        text.chars().count() >= self.min_chars && self.banned_phrase(text).is_none()
    }

    /// First banned phrase found in `text`, if any.
    pub fn banned_phrase(&self, text: &str) -> Option<&str> {
        let haystack = text.trim().to_lowercase();
        self.banned_phrases
            .iter()
            .find(|phrase| {
                let needle = phrase.to_lowercase();
                match self.match_mode {
                    PhraseMatch::Substring => haystack.contains(&needle),
                    PhraseMatch::WholeWord => contains_word(&haystack, &needle),
                }
            })
            .map(String::as_str)
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// What to show in the chat for a direct-answer response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerKind {
    /// Plain answer; shown in full.
    Direct { reply: String },
    /// The response contained report section markers; only its last sentence
    /// is shown so the report does not flood the transcript.
    LeakedReport { reply: String },
}

impl AnswerKind {
    pub fn reply(&self) -> &str {
        match self {
            AnswerKind::Direct { reply } | AnswerKind::LeakedReport { reply } => reply,
        }
    }

    pub fn into_reply(self) -> String {
        match self {
            AnswerKind::Direct { reply } | AnswerKind::LeakedReport { reply } => reply,
        }
    }
}

/// Classifies an anchor answer. The last sentence is the last non-empty piece
/// after splitting on `.`, so abbreviations and decimals cut it short.
pub fn classify_answer(response: &str) -> AnswerKind {
    if !SECTION_MARKERS.iter().any(|m| response.contains(m)) {
        return AnswerKind::Direct {
            reply: response.to_string(),
        };
    }

    let reply = response
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or(EMPTY_LEAK_REPLY)
        .to_string();

    AnswerKind::LeakedReport { reply }
}
