use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Months, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;

use super::model::JournalEntry;

const MAX_WORDS: usize = 100;
const LABEL_WEIGHT: usize = 3;

/// Window over which word frequencies are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeframe {
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl Timeframe {
    /// Unknown or missing values widen to `All`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("week") => Timeframe::Week,
            Some("month") => Timeframe::Month,
            Some("year") => Timeframe::Year,
            _ => Timeframe::All,
        }
    }

    /// Inclusive lower bound on entry date, or `None` for no bound.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timeframe::Week => Some(now - Duration::days(7)),
            Timeframe::Month => now.checked_sub_months(Months::new(1)),
            Timeframe::Year => now.checked_sub_months(Months::new(12)),
            Timeframe::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordFrequency {
    pub text: String,
    pub value: usize,
}

/// Emotion vocabulary that always survives filtering.
static MOOD_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "happy", "excited", "joy", "ecstatic", "peaceful", "content", "satisfied", "grateful",
        "optimistic", "confident", "enthusiastic", "proud", "calm", "relaxed", "hopeful", "blessed",
        "amazing", "wonderful", "sad", "angry", "anxious", "frustrated", "worried", "depressed",
        "stressed", "overwhelmed", "upset", "disappointed", "hurt", "lonely", "guilty", "insecure",
        "tired", "exhausted", "annoyed", "afraid", "nervous", "scared", "miserable", "helpless",
        "hopeless", "confused", "surprised", "uncertain", "indifferent", "ambivalent", "curious",
        "thoughtful", "reflective", "nostalgic", "bittersweet", "contemplative",
    ]
    .into_iter()
    .collect()
});

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
        "are", "aren", "as", "at", "be", "because", "been", "before", "being", "below", "between",
        "both", "but", "by", "can", "cannot", "could", "couldnt", "did", "didnt", "do", "does",
        "doesnt", "doing", "dont", "down", "during", "each", "else", "even", "ever", "few", "for",
        "from", "further", "get", "got", "had", "hadnt", "has", "hasnt", "have", "havent",
        "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how", "however",
        "i", "if", "im", "in", "into", "is", "isnt", "it", "its", "itself", "ive", "just", "let",
        "lets", "like", "made", "make", "many", "may", "me", "might", "more", "most", "much",
        "must", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "one",
        "only", "or", "other", "ought", "our", "ours", "ourselves", "out", "over", "own", "same",
        "she", "should", "shouldnt", "so", "some", "still", "such", "than", "that", "thats", "the",
        "their", "theirs", "them", "themselves", "then", "there", "theres", "these", "they",
        "theyre", "this", "those", "through", "to", "too", "under", "until", "up", "upon", "us",
        "very", "was", "wasnt", "we", "well", "were", "werent", "what", "whats", "when", "where",
        "which", "while", "who", "whom", "why", "will", "with", "within", "without", "wont",
        "would", "wouldnt", "yet", "you", "youre", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// Rank the most frequent salient words across `entries`, boosted by mood labels and
/// identified patterns.
pub fn word_frequencies(entries: &[JournalEntry]) -> Vec<WordFrequency> {
    if entries.is_empty() {
        return Vec::new();
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut bump = |word: String, by: usize| *counts.entry(word).or_insert(0) += by;

    for entry in entries {
        for token in tokenize(&entry.content) {
            if keep_token(&token) {
                bump(token, 1);
            }
        }
    }

    for entry in entries {
        if let Some(label) = entry.mood_label() {
            bump(label.as_str().to_lowercase(), LABEL_WEIGHT);
        }
        let patterns = entry
            .analysis
            .iter()
            .flat_map(|analysis| analysis.identified_patterns.iter());
        for pattern in patterns {
            for word in tokenize(pattern).filter(|word| word.chars().count() > 3) {
                bump(word, 1);
            }
        }
    }

    let mut ranked: Vec<WordFrequency> = counts
        .into_iter()
        .map(|(text, value)| WordFrequency { text, value })
        .collect();
    ranked.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.text.cmp(&b.text)));
    ranked.truncate(MAX_WORDS);
    ranked
}

/// Lowercase, drop punctuation, split on whitespace.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().filter_map(|raw| {
        let word: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        (!word.is_empty()).then_some(word)
    })
}

fn keep_token(token: &str) -> bool {
    let len = token.chars().count();
    if len <= 2 {
        return false;
    }
    if MOOD_WORDS.contains(token) {
        return true;
    }
    !STOPWORDS.contains(token) && len > 3
}
