use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{AnalysisRecord, EntryChanges, JournalEntry, NewEntry};
use super::store::{DateOrder, EntryQuery, EntryStore};

fn query_matches(query: &EntryQuery, entry: &JournalEntry) -> bool {
    if query.since.is_some_and(|since| entry.date < since) {
        return false;
    }
    !(query.unprocessed_only && entry.is_processed())
}

/// In-memory entry store for tests.
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: Mutex<HashMap<Uuid, JournalEntry>>,
    fail_operations: AtomicBool,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, to exercise store-error paths.
    pub fn set_fail_operations(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    /// Test helper to move an entry's last-write timestamp.
    pub fn set_updated_at(&self, id: Uuid, updated_at: DateTime<Utc>) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match entries.get_mut(&id) {
            Some(entry) => {
                entry.updated_at = updated_at;
                true
            }
            None => false,
        }
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<Uuid, JournalEntry>>> {
        if self.fail_operations.load(Ordering::SeqCst) {
            bail!("simulated store failure");
        }
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn create(&self, entry: NewEntry) -> Result<JournalEntry> {
        let now = Utc::now();
        let created = JournalEntry {
            id: Uuid::new_v4(),
            owner_id: entry.owner_id,
            content: entry.content,
            date: entry.date,
            mood: entry.mood,
            tags: entry.tags,
            analysis: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        self.guard()?.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JournalEntry>> {
        Ok(self.guard()?.get(&id).cloned())
    }

    async fn find_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Option<JournalEntry>> {
        Ok(self
            .guard()?
            .get(&id)
            .filter(|entry| entry.owner_id == owner_id)
            .cloned())
    }

    async fn list_by_owner(&self, owner_id: Uuid, query: EntryQuery) -> Result<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = self
            .guard()?
            .values()
            .filter(|entry| entry.owner_id == owner_id && query_matches(&query, entry))
            .cloned()
            .collect();

        entries.sort_by(|a, b| (a.date, a.created_at).cmp(&(b.date, b.created_at)));
        if query.order == DateOrder::NewestFirst {
            entries.reverse();
        }
        Ok(entries)
    }

    async fn update_owned(
        &self,
        id: Uuid,
        owner_id: Uuid,
        changes: EntryChanges,
    ) -> Result<Option<JournalEntry>> {
        let mut entries = self.guard()?;
        let Some(entry) = entries
            .get_mut(&id)
            .filter(|entry| entry.owner_id == owner_id)
        else {
            return Ok(None);
        };

        entry.content = changes.content;
        entry.mood = changes.mood;
        entry.tags = changes.tags;
        entry.analysis = None;
        entry.revision += 1;
        entry.updated_at = Utc::now();
        Ok(Some(entry.clone()))
    }

    async fn save_analysis(&self, id: Uuid, revision: i64, analysis: &AnalysisRecord) -> Result<bool> {
        let mut entries = self.guard()?;
        match entries.get_mut(&id) {
            Some(entry) if entry.revision == revision => {
                entry.analysis = Some(analysis.clone());
                entry.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_owned(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut entries = self.guard()?;
        let owned = entries
            .get(&id)
            .is_some_and(|entry| entry.owner_id == owner_id);
        if owned {
            entries.remove(&id);
        }
        Ok(owned)
    }

    async fn list_stale_unprocessed(&self, updated_before: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>> {
        let mut stale: Vec<(DateTime<Utc>, Uuid)> = self
            .guard()?
            .values()
            .filter(|entry| !entry.is_processed() && entry.updated_at < updated_before)
            .map(|entry| (entry.updated_at, entry.id))
            .collect();
        stale.sort();
        Ok(stale.into_iter().take(limit).map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filters_by_date_and_processing_state() {
        let now = Utc::now();
        let mut entry = JournalEntry {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            content: "note".into(),
            date: now - chrono::Duration::days(3),
            mood: None,
            tags: Vec::new(),
            analysis: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        };

        assert!(query_matches(&EntryQuery::newest_first(), &entry));
        assert!(!query_matches(
            &EntryQuery::newest_first().since(Some(now - chrono::Duration::days(1))),
            &entry
        ));
        assert!(query_matches(&EntryQuery::newest_first().unprocessed(), &entry));

        entry.analysis = Some(AnalysisRecord {
            supportive_response: "ok".into(),
            identified_patterns: vec!["none".into()],
            suggested_strategies: vec!["rest".into()],
        });
        assert!(!query_matches(&EntryQuery::newest_first().unprocessed(), &entry));
    }

    #[tokio::test]
    async fn listing_applies_owner_and_query_filters() {
        let store = MemoryEntryStore::new();
        let owner = Uuid::new_v4();
        let now = Utc::now();
        for (content, days_ago, owner_id) in [
            ("old", 10, owner),
            ("recent", 1, owner),
            ("foreign", 1, Uuid::new_v4()),
        ] {
            store
                .create(NewEntry {
                    owner_id,
                    content: content.into(),
                    date: now - chrono::Duration::days(days_ago),
                    mood: None,
                    tags: Vec::new(),
                })
                .await
                .unwrap();
        }

        let all = store
            .list_by_owner(owner, EntryQuery::oldest_first())
            .await
            .unwrap();
        let contents: Vec<_> = all.iter().map(|entry| entry.content.as_str()).collect();
        assert_eq!(contents, ["old", "recent"]);

        let recent = store
            .list_by_owner(
                owner,
                EntryQuery::newest_first().since(Some(now - chrono::Duration::days(7))),
            )
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "recent");
    }
}
