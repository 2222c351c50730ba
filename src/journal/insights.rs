use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::model::{JournalEntry, MoodLabel};

const TREND_WINDOW_DAYS: i64 = 14;
const TOP_PATTERNS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoodCount {
    pub label: MoodLabel,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoodPoint {
    pub date: DateTime<Utc>,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternCount {
    pub pattern: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalInsights {
    pub mood_distribution: Vec<MoodCount>,
    pub mood_trend: Vec<MoodPoint>,
    pub common_patterns: Vec<PatternCount>,
    pub unprocessed_count: usize,
}

/// Aggregate one owner's entries. Pure; `now` anchors the trend window.
pub fn summarize(entries: &[JournalEntry], now: DateTime<Utc>) -> JournalInsights {
    JournalInsights {
        mood_distribution: mood_distribution(entries),
        mood_trend: mood_trend(entries, now),
        common_patterns: common_patterns(entries),
        unprocessed_count: entries.iter().filter(|entry| !entry.is_processed()).count(),
    }
}

/// Count by stored label; when no entry has a label, bucket the bare scores instead.
fn mood_distribution(entries: &[JournalEntry]) -> Vec<MoodCount> {
    let mut by_label = tally(entries.iter().filter_map(JournalEntry::mood_label));
    if by_label.is_empty() {
        by_label = tally(
            entries
                .iter()
                .filter_map(JournalEntry::mood_score)
                .map(MoodLabel::from_score),
        );
    }

    MoodLabel::ALL
        .into_iter()
        .filter_map(|label| {
            by_label
                .get(&label)
                .map(|&count| MoodCount { label, count })
        })
        .collect()
}

fn tally(labels: impl Iterator<Item = MoodLabel>) -> HashMap<MoodLabel, usize> {
    let mut counts = HashMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
}

fn mood_trend(entries: &[JournalEntry], now: DateTime<Utc>) -> Vec<MoodPoint> {
    let window_start = now - Duration::days(TREND_WINDOW_DAYS);
    let mut recent: Vec<&JournalEntry> = entries
        .iter()
        .filter(|entry| entry.date >= window_start)
        .collect();
    recent.sort_by_key(|entry| (entry.date, entry.created_at));

    recent
        .into_iter()
        .map(|entry| MoodPoint {
            date: entry.date,
            score: entry.mood_score(),
        })
        .collect()
}

fn common_patterns(entries: &[JournalEntry]) -> Vec<PatternCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for analysis in entries.iter().filter_map(|entry| entry.analysis.as_ref()) {
        for pattern in &analysis.identified_patterns {
            *counts.entry(pattern.as_str()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<PatternCount> = counts
        .into_iter()
        .map(|(pattern, count)| PatternCount {
            pattern: pattern.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.pattern.cmp(&b.pattern)));
    ranked.truncate(TOP_PATTERNS);
    ranked
}
