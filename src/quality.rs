use chrono::{DateTime, Utc};
use serde::Serialize;

pub const POSITIVE_KEYWORDS: [&str; 6] = [
    "excellent",
    "good",
    "complete",
    "accurate",
    "thorough",
    "comprehensive",
];

pub const NEGATIVE_KEYWORDS: [&str; 6] = [
    "incomplete",
    "inaccurate",
    "poor",
    "missing",
    "inadequate",
    "insufficient",
];

pub const NEUTRAL_SCORE: f64 = 0.5;

/// Turns critique text into a score in `[0, 1]`. Implementations must be
/// deterministic for a given input.
pub trait QualityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, critique: &str) -> f64;
}

/// Default scorer: share of positive keyword hits among all keyword hits.
///
/// Each keyword counts at most once and matches as a case-insensitive
/// substring, so "incomplete" also counts as "complete".
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    positive: Vec<String>,
    negative: Vec<String>,
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new(&POSITIVE_KEYWORDS, &NEGATIVE_KEYWORDS)
    }
}

impl KeywordScorer {
    pub fn new(positive: &[&str], negative: &[&str]) -> Self {
        let lower = |words: &[&str]| -> Vec<String> { words.iter().map(|w| w.to_lowercase()).collect() };
        Self {
            positive: lower(positive),
            negative: lower(negative),
        }
    }

    fn hits(words: &[String], text: &str) -> usize {
        words.iter().filter(|word| text.contains(word.as_str())).count()
    }
}

impl QualityScorer for KeywordScorer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn score(&self, critique: &str) -> f64 {
        let text = critique.to_lowercase();
        let positive = Self::hits(&self.positive, &text);
        let negative = Self::hits(&self.negative, &text);
        let total = positive + negative;
        if total == 0 {
            NEUTRAL_SCORE
        } else {
            positive as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub task_id: String,
    pub score: f64,
    pub critique: String,
    pub timestamp: DateTime<Utc>,
}
