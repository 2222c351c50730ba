use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use super::model::{AnalysisRecord, EntryChanges, JournalEntry, Mood, MoodLabel, NewEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrder {
    NewestFirst,
    OldestFirst,
}

impl DateOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            DateOrder::NewestFirst => "DESC",
            DateOrder::OldestFirst => "ASC",
        }
    }
}

/// Filter for owner-scoped scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryQuery {
    pub since: Option<DateTime<Utc>>,
    pub unprocessed_only: bool,
    pub order: DateOrder,
}

impl EntryQuery {
    pub fn newest_first() -> Self {
        Self {
            since: None,
            unprocessed_only: false,
            order: DateOrder::NewestFirst,
        }
    }

    pub fn oldest_first() -> Self {
        Self {
            order: DateOrder::OldestFirst,
            ..Self::newest_first()
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn unprocessed(mut self) -> Self {
        self.unprocessed_only = true;
        self
    }
}

/// Durable collection of journal entries.
///
/// Every owner-facing method filters by `(id, owner)`; `find_by_id`, `save_analysis` and
/// `list_stale_unprocessed` are for the analysis pipeline only.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JournalEntry>>;

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<JournalEntry>>;

    async fn list_by_owner(&self, owner_id: Uuid, query: EntryQuery) -> Result<Vec<JournalEntry>>;

    /// Apply an owner edit, clear any analysis and bump the revision.
    async fn update_owned(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: EntryChanges,
    ) -> Result<Option<JournalEntry>>;

    /// Store an analysis only if the entry still exists at `revision`. Returns whether it was applied.
    async fn save_analysis(&self, id: Uuid, revision: i64, analysis: &AnalysisRecord) -> Result<bool>;

    async fn delete_owned(&self, id: Uuid, owner_id: Uuid) -> Result<bool>;

    /// Unprocessed entries of any owner whose last write is older than `updated_before`.
    async fn list_stale_unprocessed(&self, updated_before: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>>;
}

const ENTRY_COLUMNS: &str = "id, user_id, content, entry_date, mood_score, mood_label, tags, supportive_response, identified_patterns, suggested_strategies, processed, revision, created_at, updated_at";

#[derive(FromRow)]
struct EntryRow {
    id: Uuid,
    user_id: Uuid,
    content: String,
    entry_date: DateTime<Utc>,
    mood_score: Option<i16>,
    mood_label: Option<String>,
    tags: Vec<String>,
    supportive_response: Option<String>,
    identified_patterns: Option<Vec<String>>,
    suggested_strategies: Option<Vec<String>>,
    processed: bool,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EntryRow> for JournalEntry {
    fn from(row: EntryRow) -> Self {
        let score = row.mood_score.and_then(|score| u8::try_from(score).ok());
        let label = row.mood_label.as_deref().and_then(|raw| {
            let parsed = MoodLabel::parse(raw);
            if parsed.is_none() {
                warn!(entry_id = %row.id, label = raw, "ignoring unknown mood label");
            }
            parsed
        });
        let mood = Some(Mood { score, label }).filter(|mood| !mood.is_empty());

        let analysis = if row.processed {
            Some(AnalysisRecord {
                supportive_response: row.supportive_response.unwrap_or_default(),
                identified_patterns: row.identified_patterns.unwrap_or_default(),
                suggested_strategies: row.suggested_strategies.unwrap_or_default(),
            })
        } else {
            None
        };

        JournalEntry {
            id: row.id,
            owner_id: row.user_id,
            content: row.content,
            date: row.entry_date,
            mood,
            tags: row.tags,
            analysis,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn mood_columns(mood: Option<Mood>) -> (Option<i16>, Option<&'static str>) {
    let mood = mood.unwrap_or_default();
    (
        mood.score.map(i16::from),
        mood.label.map(|label| label.as_str()),
    )
}

/// Postgres-backed entry store.
#[derive(Clone)]
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntryStore for PgEntryStore {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry> {
        let (mood_score, mood_label) = mood_columns(entry.mood);

        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "INSERT INTO journal_entries (id, user_id, content, entry_date, mood_score, mood_label, tags)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(entry.owner_id)
        .bind(&entry.content)
        .bind(entry.date)
        .bind(mood_score)
        .bind(mood_label)
        .bind(&entry.tags)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert journal entry")?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JournalEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load journal entry")?;

        Ok(row.map(Into::into))
    }

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<JournalEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load owned journal entry")?;

        Ok(row.map(Into::into))
    }

    async fn list_by_owner(&self, owner_id: Uuid, query: EntryQuery) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE user_id = $1
               AND ($2::timestamptz IS NULL OR entry_date >= $2)
               AND (NOT $3 OR processed = FALSE)
             ORDER BY entry_date {order}, created_at {order}",
            order = query.order.as_sql(),
        ))
        .bind(owner_id)
        .bind(query.since)
        .bind(query.unprocessed_only)
        .fetch_all(&self.pool)
        .await
        .context("failed to list journal entries")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_owned(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: EntryChanges,
    ) -> Result<Option<JournalEntry>> {
        let (mood_score, mood_label) = mood_columns(changes.mood);

        let row = sqlx::query_as::<_, EntryRow>(&format!(
            "UPDATE journal_entries
             SET content = $3, mood_score = $4, mood_label = $5, tags = $6,
                 supportive_response = NULL, identified_patterns = NULL, suggested_strategies = NULL,
                 processed = FALSE, revision = revision + 1, updated_at = NOW()
             WHERE id = $1 AND user_id = $2
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&changes.content)
        .bind(mood_score)
        .bind(mood_label)
        .bind(&changes.tags)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update journal entry")?;

        Ok(row.map(Into::into))
    }

    async fn save_analysis(&self, id: Uuid, revision: i64, analysis: &AnalysisRecord) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE journal_entries
             SET supportive_response = $3, identified_patterns = $4, suggested_strategies = $5,
                 processed = TRUE, updated_at = NOW()
             WHERE id = $1 AND revision = $2",
        )
        .bind(id)
        .bind(revision)
        .bind(&analysis.supportive_response)
        .bind(&analysis.identified_patterns)
        .bind(&analysis.suggested_strategies)
        .execute(&self.pool)
        .await
        .context("failed to store journal analysis")?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_owned(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM journal_entries WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .context("failed to delete journal entry")?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale_unprocessed(&self, updated_before: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM journal_entries
             WHERE processed = FALSE AND updated_at < $1
             ORDER BY updated_at
             LIMIT $2",
        )
        .bind(updated_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to list stale unprocessed journal entries")?;

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_columns_split_score_and_label() {
        assert_eq!(mood_columns(None), (None, None));
        assert_eq!(
            mood_columns(Some(Mood {
                score: Some(7),
                label: Some(MoodLabel::Positive),
            })),
            (Some(7), Some("Positive"))
        );
    }
}
