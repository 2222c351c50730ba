use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::analysis::{AnalysisEngine, AnalysisOutcome, BatchReport};
use super::error::JournalError;
use super::insights::{self, JournalInsights};
use super::model::{EntryChanges, JournalEntry, MAX_MOOD_SCORE, MIN_MOOD_SCORE, Mood, MoodLabel, NewEntry};
use super::store::{EntryQuery, EntryStore};
use super::wordcloud::{self, Timeframe, WordFrequency};

/// Request body for create and update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryInput {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub mood: Option<MoodInput>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MoodInput {
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Input after validation.
#[derive(Debug, Clone, PartialEq)]
struct ValidEntry {
    content: String,
    mood: Option<Mood>,
    tags: Vec<String>,
    date: Option<DateTime<Utc>>,
}

impl EntryInput {
    fn validate(self) -> Result<ValidEntry, JournalError> {
        let content = self
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| JournalError::validation("Journal content is required"))?;

        let mood = self.mood.map(MoodInput::validate).transpose()?;

        let tags = self
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(ValidEntry {
            content,
            mood: mood.filter(|mood| !mood.is_empty()),
            tags,
            date: self.date,
        })
    }
}

impl MoodInput {
    fn validate(self) -> Result<Mood, JournalError> {
        let score = match self.score {
            Some(raw) => Some(
                u8::try_from(raw)
                    .ok()
                    .filter(|score| (MIN_MOOD_SCORE..=MAX_MOOD_SCORE).contains(score))
                    .ok_or_else(|| {
                        JournalError::validation(format!(
                            "Mood score must be between {MIN_MOOD_SCORE} and {MAX_MOOD_SCORE}"
                        ))
                    })?,
            ),
            None => None,
        };

        let label = match self.label.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(MoodLabel::parse(raw).ok_or_else(|| {
                let allowed: Vec<&str> = MoodLabel::ALL.iter().map(MoodLabel::as_str).collect();
                JournalError::validation(format!("Mood label must be one of: {}", allowed.join(", ")))
            })?),
        };

        Ok(Mood { score, label })
    }
}

/// Owner-scoped entry operations plus analysis triggering.
#[derive(Clone)]
pub struct JournalService {
    store: Arc<dyn EntryStore>,
    engine: AnalysisEngine,
}

impl JournalService {
    pub fn new(store: Arc<dyn EntryStore>, engine: AnalysisEngine) -> Self {
        Self { store, engine }
    }

    pub fn engine(&self) -> &AnalysisEngine {
        &self.engine
    }

    /// Persist a new entry and queue its analysis. Returns the unanalysed entry.
    pub async fn create(&self, owner_id: Uuid, input: EntryInput) -> Result<JournalEntry, JournalError> {
        let valid = input.validate()?;
        let entry = self
            .store
            .create(NewEntry {
                owner_id,
                content: valid.content,
                date: valid.date.unwrap_or_else(Utc::now),
                mood: valid.mood,
                tags: valid.tags,
            })
            .await?;

        self.engine.spawn(entry.id);
        Ok(entry)
    }

    pub async fn get(&self, owner_id: Uuid, entry_id: Uuid) -> Result<JournalEntry, JournalError> {
        self.store
            .find_owned(entry_id, owner_id)
            .await?
            .ok_or(JournalError::NotFound)
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<JournalEntry>, JournalError> {
        Ok(self
            .store
            .list_by_owner(owner_id, EntryQuery::newest_first())
            .await?)
    }

    /// Overwrite content, mood and tags. The old analysis is cleared in the same write and a
    /// fresh one is queued.
    pub async fn update(
        &self,
        owner_id: Uuid,
        entry_id: Uuid,
        input: EntryInput,
    ) -> Result<JournalEntry, JournalError> {
        let valid = input.validate()?;
        let entry = self
            .store
            .update_owned(
                entry_id,
                owner_id,
                EntryChanges {
                    content: valid.content,
                    mood: valid.mood,
                    tags: valid.tags,
                },
            )
            .await?
            .ok_or(JournalError::NotFound)?;

        self.engine.spawn(entry.id);
        Ok(entry)
    }

    pub async fn delete(&self, owner_id: Uuid, entry_id: Uuid) -> Result<(), JournalError> {
        if self.store.delete_owned(entry_id, owner_id).await? {
            Ok(())
        } else {
            Err(JournalError::NotFound)
        }
    }

    pub async fn insights(&self, owner_id: Uuid) -> Result<JournalInsights, JournalError> {
        let entries = self
            .store
            .list_by_owner(owner_id, EntryQuery::oldest_first())
            .await?;
        Ok(insights::summarize(&entries, Utc::now()))
    }

    pub async fn word_cloud(
        &self,
        owner_id: Uuid,
        timeframe: Timeframe,
    ) -> Result<Vec<WordFrequency>, JournalError> {
        let entries = self
            .store
            .list_by_owner(
                owner_id,
                EntryQuery::newest_first().since(timeframe.since(Utc::now())),
            )
            .await?;
        Ok(wordcloud::word_frequencies(&entries))
    }

    /// Re-run analysis on one entry regardless of its state and wait for it.
    pub async fn reanalyze(
        &self,
        owner_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(JournalEntry, AnalysisOutcome), JournalError> {
        self.get(owner_id, entry_id).await?;
        let outcome = self.engine.analyze(entry_id).await?;
        let entry = self.get(owner_id, entry_id).await?;
        Ok((entry, outcome))
    }

    pub async fn reprocess_pending(&self, owner_id: Uuid) -> Result<BatchReport, JournalError> {
        Ok(self.engine.reprocess_pending(owner_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::config::AnalysisSettings;
    use crate::journal::memory::MemoryEntryStore;
    use crate::llm::{LlmProvider, LlmRequest, LlmResponse, TextGenerator, TokenUsage};

    struct FixedGenerator;

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        fn is_configured(&self, _model: &str) -> bool {
            true
        }

        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                text: "```json\n{\"supportiveResponse\": \"Thanks for writing this down.\", \"identifiedPatterns\": [\"Self-criticism\"], \"suggestedStrategies\": [\"Name one thing that went well\"]}\n```".into(),
                token_usage: TokenUsage::default(),
                provider: LlmProvider::Gemini,
                model: "fixed".into(),
            })
        }
    }

    fn service() -> (JournalService, Arc<MemoryEntryStore>) {
        let store = Arc::new(MemoryEntryStore::new());
        let engine = AnalysisEngine::new(
            store.clone(),
            Arc::new(FixedGenerator),
            AnalysisSettings::default(),
        );
        (JournalService::new(store.clone(), engine), store)
    }

    fn input(content: &str) -> EntryInput {
        EntryInput {
            content: Some(content.into()),
            mood: Some(MoodInput {
                score: Some(5),
                label: Some("Neutral".into()),
            }),
            tags: Some(vec![" work ".into(), "  ".into()]),
            date: None,
        }
    }

    async fn wait_for_processed(service: &JournalService, owner: Uuid, id: Uuid) -> JournalEntry {
        for _ in 0..50 {
            let entry = service.get(owner, id).await.unwrap();
            if entry.is_processed() {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("entry {id} was never analyzed");
    }

    #[tokio::test]
    async fn create_returns_unprocessed_then_analysis_lands() {
        let (service, _) = service();
        let owner = Uuid::new_v4();

        let created = service.create(owner, input("Test entry")).await.unwrap();
        assert!(!created.is_processed());
        assert_eq!(created.tags, vec!["work"]);
        assert_eq!(created.mood_label(), Some(MoodLabel::Neutral));

        let processed = wait_for_processed(&service, owner, created.id).await;
        let analysis = processed.analysis.unwrap();
        assert_eq!(analysis.supportive_response, "Thanks for writing this down.");
        assert!(!analysis.identified_patterns.is_empty());
        assert!(!analysis.suggested_strategies.is_empty());
    }

    #[tokio::test]
    async fn update_clears_previous_analysis_immediately() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service.create(owner, input("first draft")).await.unwrap();
        wait_for_processed(&service, owner, created.id).await;

        let updated = service
            .update(owner, created.id, input("second draft"))
            .await
            .unwrap();
        assert_eq!(updated.content, "second draft");
        assert!(!updated.is_processed());

        wait_for_processed(&service, owner, created.id).await;
    }

    #[tokio::test]
    async fn entries_are_scoped_to_their_owner() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let created = service.create(owner, input("private")).await.unwrap();

        assert!(matches!(
            service.get(stranger, created.id).await,
            Err(JournalError::NotFound)
        ));
        assert!(matches!(
            service.update(stranger, created.id, input("hijack")).await,
            Err(JournalError::NotFound)
        ));
        assert!(matches!(
            service.delete(stranger, created.id).await,
            Err(JournalError::NotFound)
        ));
        assert!(service.list(stranger).await.unwrap().is_empty());
        assert_eq!(service.list(owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_of_unknown_entry_is_not_found() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service.create(owner, input("short-lived")).await.unwrap();

        service.delete(owner, created.id).await.unwrap();
        assert!(matches!(
            service.delete(owner, created.id).await,
            Err(JournalError::NotFound)
        ));
        assert!(matches!(
            service.delete(owner, Uuid::new_v4()).await,
            Err(JournalError::NotFound)
        ));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_any_write() {
        let (service, store) = service();
        let owner = Uuid::new_v4();

        let blank = EntryInput {
            content: Some("   ".into()),
            ..EntryInput::default()
        };
        let bad_score = EntryInput {
            mood: Some(MoodInput {
                score: Some(11),
                label: None,
            }),
            ..input("fine")
        };
        let bad_label = EntryInput {
            mood: Some(MoodInput {
                score: None,
                label: Some("Ecstatic".into()),
            }),
            ..input("fine")
        };

        for body in [EntryInput::default(), blank, bad_score, bad_label] {
            assert!(matches!(
                service.create(owner, body).await,
                Err(JournalError::Validation(_))
            ));
        }
        assert!(store.list_by_owner(owner, EntryQuery::newest_first()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failures_surface_as_store_errors() {
        let (service, store) = service();
        store.set_fail_operations(true);

        let err = service.list(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JournalError::Store(_)));
    }

    #[tokio::test]
    async fn reanalyze_waits_and_returns_processed_entry() {
        let (service, store) = service();
        let owner = Uuid::new_v4();
        let entry = store
            .create(NewEntry {
                owner_id: owner,
                content: "written before analysis existed".into(),
                date: Utc::now(),
                mood: None,
                tags: Vec::new(),
            })
            .await
            .unwrap();

        let (entry, outcome) = service.reanalyze(owner, entry.id).await.unwrap();
        assert!(outcome.is_stored());
        assert!(entry.is_processed());

        assert!(matches!(
            service.reanalyze(Uuid::new_v4(), entry.id).await,
            Err(JournalError::NotFound)
        ));
    }

    #[tokio::test]
    async fn insights_and_word_cloud_read_owner_entries() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input("feeling anxious about the deadline, anxious again"))
            .await
            .unwrap();
        wait_for_processed(&service, owner, created.id).await;

        let insights = service.insights(owner).await.unwrap();
        assert_eq!(insights.unprocessed_count, 0);
        assert_eq!(insights.mood_distribution.len(), 1);
        assert_eq!(insights.common_patterns[0].pattern, "Self-criticism");

        let words = service.word_cloud(owner, Timeframe::Week).await.unwrap();
        assert_eq!(words[0].text, "neutral");
        assert!(words.iter().any(|word| word.text == "anxious" && word.value == 2));

        assert!(service.word_cloud(Uuid::new_v4(), Timeframe::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn word_cloud_timeframe_excludes_older_entries() {
        let (service, store) = service();
        let owner = Uuid::new_v4();
        store
            .create(NewEntry {
                owner_id: owner,
                content: "walked out to the lighthouse".into(),
                date: Utc::now() - chrono::Duration::days(8),
                mood: None,
                tags: Vec::new(),
            })
            .await
            .unwrap();
        store
            .create(NewEntry {
                owner_id: owner,
                content: "quiet morning with coffee".into(),
                date: Utc::now() - chrono::Duration::days(1),
                mood: None,
                tags: Vec::new(),
            })
            .await
            .unwrap();

        let week = service.word_cloud(owner, Timeframe::Week).await.unwrap();
        assert!(week.iter().any(|word| word.text == "coffee"));
        assert!(!week.iter().any(|word| word.text == "lighthouse"));

        let month = service.word_cloud(owner, Timeframe::Month).await.unwrap();
        assert!(month.iter().any(|word| word.text == "lighthouse"));

        let all = service.word_cloud(owner, Timeframe::All).await.unwrap();
        assert!(all.iter().any(|word| word.text == "lighthouse" && word.value == 1));
        assert!(all.iter().any(|word| word.text == "coffee"));
    }
}
