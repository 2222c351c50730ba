use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// The five canonical mood buckets, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoodLabel {
    #[serde(rename = "Very Negative")]
    VeryNegative,
    #[serde(rename = "Negative")]
    Negative,
    #[serde(rename = "Neutral")]
    Neutral,
    #[serde(rename = "Positive")]
    Positive,
    #[serde(rename = "Very Positive")]
    VeryPositive,
}

impl MoodLabel {
    pub const ALL: [MoodLabel; 5] = [
        MoodLabel::VeryNegative,
        MoodLabel::Negative,
        MoodLabel::Neutral,
        MoodLabel::Positive,
        MoodLabel::VeryPositive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoodLabel::VeryNegative => "Very Negative",
            MoodLabel::Negative => "Negative",
            MoodLabel::Neutral => "Neutral",
            MoodLabel::Positive => "Positive",
            MoodLabel::VeryPositive => "Very Positive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|label| label.as_str() == value)
    }

    /// Bucket a 1-10 score. Upper bounds are inclusive: 2, 4, 6, 8.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=2 => MoodLabel::VeryNegative,
            3..=4 => MoodLabel::Negative,
            5..=6 => MoodLabel::Neutral,
            7..=8 => MoodLabel::Positive,
            _ => MoodLabel::VeryPositive,
        }
    }
}

impl fmt::Display for MoodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_MOOD_SCORE: u8 = 1;
pub const MAX_MOOD_SCORE: u8 = 10;

/// Self-reported mood. Legacy entries may carry only a score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mood {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<MoodLabel>,
}

impl Mood {
    pub fn is_empty(&self) -> bool {
        self.score.is_none() && self.label.is_none()
    }
}

/// A completed analysis. Its presence on an entry is what "processed" means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRecord {
    pub supportive_response: String,
    pub identified_patterns: Vec<String>,
    pub suggested_strategies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub owner_id: Uuid,
    pub content: String,
    pub date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    pub tags: Vec<String>,
    #[serde(serialize_with = "serialize_analysis")]
    pub analysis: Option<AnalysisRecord>,
    /// Bumped by every owner edit; analyses are only applied against the revision they read.
    #[serde(skip)]
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn is_processed(&self) -> bool {
        self.analysis.is_some()
    }

    pub fn mood_score(&self) -> Option<u8> {
        self.mood.and_then(|mood| mood.score)
    }

    pub fn mood_label(&self) -> Option<MoodLabel> {
        self.mood.and_then(|mood| mood.label)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisView<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    supportive_response: Option<&'a str>,
    identified_patterns: &'a [String],
    suggested_strategies: &'a [String],
    processed: bool,
}

fn serialize_analysis<S>(analysis: &Option<AnalysisRecord>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let view = match analysis {
        Some(record) => AnalysisView {
            supportive_response: Some(&record.supportive_response),
            identified_patterns: &record.identified_patterns,
            suggested_strategies: &record.suggested_strategies,
            processed: true,
        },
        None => AnalysisView {
            supportive_response: None,
            identified_patterns: &[],
            suggested_strategies: &[],
            processed: false,
        },
    };
    view.serialize(serializer)
}

/// Fields written when an entry is first persisted.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub owner_id: Uuid,
    pub content: String,
    pub date: DateTime<Utc>,
    pub mood: Option<Mood>,
    pub tags: Vec<String>,
}

/// Owner-editable fields. Applying them always clears the stored analysis.
#[derive(Debug, Clone)]
pub struct EntryChanges {
    pub content: String,
    pub mood: Option<Mood>,
    pub tags: Vec<String>,
}
