use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::model::AnalysisRecord;
use super::store::{EntryQuery, EntryStore};
use crate::config::AnalysisSettings;
use crate::llm::{
    BlockThreshold, ChatMessage, GenerationConfig, LlmRequest, MessageRole, SafetySetting,
    TextGenerator,
};

/// Upper bound on entries analysed by one batch reprocess call.
pub const REPROCESS_BATCH_LIMIT: usize = 10;

const FALLBACK_SUPPORTIVE_RESPONSE: &str =
    "Thank you for sharing your thoughts. I'm here to support you on your journey.";
const FALLBACK_PATTERN: &str = "Unable to analyze patterns at this time";
const FALLBACK_STRATEGY: &str = "Take some time for self-care today.";

const REQUIRED_KEYS: [&str; 3] = [
    "supportiveResponse",
    "identifiedPatterns",
    "suggestedStrategies",
];

/// Result of interpreting raw model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedAnalysis {
    Parsed(AnalysisRecord),
    Fallback(String),
}

impl ParsedAnalysis {
    pub fn into_record(self) -> (AnalysisRecord, AnalysisSource) {
        match self {
            ParsedAnalysis::Parsed(record) => (record, AnalysisSource::Model),
            ParsedAnalysis::Fallback(_) => (fallback_record(), AnalysisSource::Fallback),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
    Model,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EntryMissing,
    ModelUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// An analysis (model or fallback) was written and the entry is processed.
    Stored(AnalysisSource),
    /// Nothing was written.
    Skipped(SkipReason),
    /// The entry was edited or deleted while the model was running; the result was dropped.
    Superseded,
}

impl AnalysisOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, AnalysisOutcome::Stored(_))
    }
}

/// Counts reported by a batch reprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub remaining: usize,
}

pub fn fallback_record() -> AnalysisRecord {
    AnalysisRecord {
        supportive_response: FALLBACK_SUPPORTIVE_RESPONSE.to_string(),
        identified_patterns: vec![FALLBACK_PATTERN.to_string()],
        suggested_strategies: vec![FALLBACK_STRATEGY.to_string()],
    }
}

/// Sends entry content to the model and writes the structured result back onto the entry.
#[derive(Clone)]
pub struct AnalysisEngine {
    store: Arc<dyn EntryStore>,
    llm: Arc<dyn TextGenerator>,
    settings: AnalysisSettings,
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<dyn EntryStore>,
        llm: Arc<dyn TextGenerator>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            store,
            llm,
            settings,
        }
    }

    pub fn is_available(&self) -> bool {
        self.llm.is_configured(&self.settings.model)
    }

    /// Analyse one entry. Model and parse failures become the fallback record; only store
    /// I/O errors are returned.
    pub async fn analyze(&self, entry_id: Uuid) -> Result<AnalysisOutcome> {
        let Some(entry) = self
            .store
            .find_by_id(entry_id)
            .await
            .context("failed to load entry for analysis")?
        else {
            debug!(%entry_id, "entry no longer exists, nothing to analyze");
            return Ok(AnalysisOutcome::Skipped(SkipReason::EntryMissing));
        };

        if !self.is_available() {
            warn!(%entry_id, model = %self.settings.model, "analysis model is not configured, skipping");
            return Ok(AnalysisOutcome::Skipped(SkipReason::ModelUnavailable));
        }

        let request = build_analysis_request(&self.settings, &entry.content);
        let parsed = match self.llm.generate(request).await {
            Ok(response) => {
                debug!(
                    %entry_id,
                    provider = %response.provider,
                    model = %response.model,
                    total_tokens = response.token_usage.total_tokens,
                    "analysis model responded"
                );
                parse_analysis_response(&response.text)
            }
            Err(err) => ParsedAnalysis::Fallback(format!("model call failed: {err:#}")),
        };

        let (record, source) = parsed.into_record_logged(entry_id);

        let applied = self
            .store
            .save_analysis(entry_id, entry.revision, &record)
            .await
            .context("failed to store entry analysis")?;

        if !applied {
            debug!(%entry_id, revision = entry.revision, "entry changed during analysis, result dropped");
            return Ok(AnalysisOutcome::Superseded);
        }

        Ok(AnalysisOutcome::Stored(source))
    }

    /// Run `analyze` on a supervised background task; the caller does not wait for it.
    pub fn spawn(&self, entry_id: Uuid) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(
            async move {
                match engine.analyze(entry_id).await {
                    Ok(outcome) => debug!(?outcome, "background analysis finished"),
                    Err(err) => error!(?err, "background analysis failed"),
                }
            }
            .instrument(info_span!("journal_analysis", %entry_id)),
        )
    }

    /// Sequentially analyse up to `REPROCESS_BATCH_LIMIT` of the owner's unprocessed entries,
    /// oldest first, continuing past individual failures.
    pub async fn reprocess_pending(&self, owner_id: Uuid) -> Result<BatchReport> {
        let pending = self
            .store
            .list_by_owner(owner_id, EntryQuery::oldest_first().unprocessed())
            .await
            .context("failed to list unprocessed entries")?;

        let processed = self.analyze_sequentially(pending.iter().map(|entry| entry.id)).await;

        let report = BatchReport {
            processed,
            remaining: pending.len() - processed,
        };
        info!(%owner_id, processed = report.processed, remaining = report.remaining, "batch reprocess finished");
        Ok(report)
    }

    /// Shared by batch reprocess and the maintenance sweep. Returns how many entries were stored.
    pub async fn analyze_sequentially(&self, ids: impl Iterator<Item = Uuid>) -> usize {
        let mut processed = 0;
        for entry_id in ids.take(REPROCESS_BATCH_LIMIT) {
            match self.analyze(entry_id).await {
                Ok(outcome) if outcome.is_stored() => processed += 1,
                Ok(outcome) => debug!(%entry_id, ?outcome, "entry not analyzed"),
                Err(err) => error!(?err, %entry_id, "failed to analyze entry"),
            }
        }
        processed
    }

    /// Pick up entries of any owner whose analysis never landed, e.g. lost to a restart.
    pub async fn recover_stale(&self, updated_before: DateTime<Utc>) -> Result<usize> {
        if !self.is_available() {
            return Ok(0);
        }
        let stale = self
            .store
            .list_stale_unprocessed(updated_before, REPROCESS_BATCH_LIMIT)
            .await
            .context("failed to list stale entries")?;
        Ok(self.analyze_sequentially(stale.into_iter()).await)
    }
}

impl ParsedAnalysis {
    fn into_record_logged(self, entry_id: Uuid) -> (AnalysisRecord, AnalysisSource) {
        if let ParsedAnalysis::Fallback(reason) = &self {
            warn!(%entry_id, %reason, "using fallback analysis");
        }
        self.into_record()
    }
}

const ANALYSIS_INSTRUCTIONS: &str = r#"You read journal entries written by someone reflecting on their day.

For each entry, provide:
1. A supportive response that shows empathy and understanding (at most 150 words).
2. Up to 3 negative thought patterns present in the entry, such as catastrophizing or black-and-white thinking.
3. 2-3 specific coping strategies or perspective shifts that could help.

Respond with a single valid JSON object with exactly these keys: "supportiveResponse" (string), "identifiedPatterns" (array of strings), "suggestedStrategies" (array of strings).
Use plain strings without formatting or line breaks inside values, and double quotes around every key and string value."#;

pub fn build_analysis_prompt(content: &str) -> String {
    format!("ENTRY:\n\"{content}\"")
}

/// Fixed instructions go in the system message; the user message carries only the entry.
fn build_analysis_request(settings: &AnalysisSettings, content: &str) -> LlmRequest {
    LlmRequest::new(
        settings.model.clone(),
        vec![
            ChatMessage::new(MessageRole::System, ANALYSIS_INSTRUCTIONS),
            ChatMessage::new(MessageRole::User, build_analysis_prompt(content)),
        ],
    )
    .with_generation(GenerationConfig {
        temperature: Some(settings.temperature),
        max_output_tokens: Some(settings.max_output_tokens),
    })
    .with_safety(SafetySetting::uniform(BlockThreshold::BlockMediumAndAbove))
}

/// Interpret raw model output. Never fails: anything unusable becomes `Fallback`.
pub fn parse_analysis_response(raw: &str) -> ParsedAnalysis {
    match try_parse_analysis(raw) {
        Ok(record) => ParsedAnalysis::Parsed(record),
        Err(err) => ParsedAnalysis::Fallback(format!("{err:#}")),
    }
}

fn try_parse_analysis(raw: &str) -> Result<AnalysisRecord> {
    let cleaned = sanitize_json_text(strip_code_fence(raw.trim()));
    if cleaned.trim().is_empty() {
        bail!("empty model response");
    }

    let map = parse_object(&cleaned)?;

    let supportive_response = text_field(&map, REQUIRED_KEYS[0])?;
    let identified_patterns = list_field(&map, REQUIRED_KEYS[1])?;
    let suggested_strategies = list_field(&map, REQUIRED_KEYS[2])?;

    Ok(AnalysisRecord {
        supportive_response,
        identified_patterns,
        suggested_strategies,
    })
}

/// Return the body of a surrounding ```json fence, or the input unchanged.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    let body_start = after_open
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after_open.len());
    let body = &after_open[body_start..];

    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Drop control characters and straighten typographic quotes.
fn sanitize_json_text(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}'))
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            other => other,
        })
        .collect()
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(map);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(map);
            }
        }
    }

    bail!("model output is not a parseable JSON object")
}

fn text_field(map: &Map<String, Value>, key: &str) -> Result<String> {
    match map.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::Array(items)) => {
            let joined = collect_strings(items).join(" ");
            if joined.is_empty() {
                bail!("{key} is empty");
            }
            Ok(joined)
        }
        Some(_) => bail!("{key} is empty or not text"),
        None => Err(anyhow!("response missing {key}")),
    }
}

/// Accept either an array of strings or a single string for list fields.
fn list_field(map: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    let values = match map.get(key) {
        Some(Value::Array(items)) => collect_strings(items),
        Some(Value::String(value)) if !value.trim().is_empty() => vec![value.trim().to_string()],
        Some(_) => Vec::new(),
        None => bail!("response missing {key}"),
    };

    if values.is_empty() {
        bail!("{key} is empty");
    }
    Ok(values)
}

fn collect_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(value) => Some(value.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .filter(|value| !value.is_empty())
        .collect()
}
