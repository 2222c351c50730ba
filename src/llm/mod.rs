use std::{env, fmt};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const BODY_PREVIEW_CHARS: usize = 500;

/// Enumerates the supported LLM backends behind the shared utility.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LlmProvider {
    Gemini,
    OpenRouter,
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::Gemini => write!(f, "gemini"),
            LlmProvider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Defines the shape of a single generation call.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub generation: GenerationConfig,
    pub safety: Vec<SafetySetting>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            generation: GenerationConfig::default(),
            safety: Vec::new(),
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_safety(mut self, safety: Vec<SafetySetting>) -> Self {
        self.safety = safety;
        self
    }
}

/// Sampling bounds forwarded to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HarmCategory {
    Harassment,
    HateSpeech,
    SexuallyExplicit,
    DangerousContent,
}

impl HarmCategory {
    pub const ALL: [HarmCategory; 4] = [
        HarmCategory::Harassment,
        HarmCategory::HateSpeech,
        HarmCategory::SexuallyExplicit,
        HarmCategory::DangerousContent,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            HarmCategory::Harassment => "HARM_CATEGORY_HARASSMENT",
            HarmCategory::HateSpeech => "HARM_CATEGORY_HATE_SPEECH",
            HarmCategory::SexuallyExplicit => "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            HarmCategory::DangerousContent => "HARM_CATEGORY_DANGEROUS_CONTENT",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlockThreshold {
    BlockMediumAndAbove,
}

impl BlockThreshold {
    fn as_str(&self) -> &'static str {
        match self {
            BlockThreshold::BlockMediumAndAbove => "BLOCK_MEDIUM_AND_ABOVE",
        }
    }
}

/// Content filter applied by providers that support one (Gemini only).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: BlockThreshold,
}

impl SafetySetting {
    /// Same threshold across every harm category.
    pub fn uniform(threshold: BlockThreshold) -> Vec<Self> {
        HarmCategory::ALL
            .iter()
            .map(|&category| Self {
                category,
                threshold,
            })
            .collect()
    }
}

/// Individual chat message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Supported chat roles passed to providers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

/// Full response surface returned to callers.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub provider: LlmProvider,
    pub model: String,
}

/// Anything that can turn a prompt into text. The journal analysis only depends on this.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Whether credentials for the provider behind `model` are present.
    fn is_configured(&self, model: &str) -> bool;

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Main entry point for invoking providers.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

#[derive(Clone, Default)]
struct LlmConfig {
    gemini_api_key: Option<String>,
    openrouter_api_key: Option<String>,
    openrouter_referer: Option<String>,
    openrouter_title: Option<String>,
}

impl LlmClient {
    /// Build a client using environment variables.
    pub fn from_env() -> Self {
        let read = |key: &str| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            http: Client::new(),
            config: LlmConfig {
                gemini_api_key: read("GEMINI_API_KEY"),
                openrouter_api_key: read("OPENROUTER_API_KEY"),
                openrouter_referer: read("OPENROUTER_HTTP_REFERER"),
                openrouter_title: read("OPENROUTER_X_TITLE"),
            },
        }
    }

    /// Execute a request against the provider encoded in the model name.
    pub async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let model = request.model.clone();
        let (provider, provider_model) = parse_model_provider(&model)?;

        match provider {
            LlmProvider::Gemini => self.execute_gemini(provider_model, request).await,
            LlmProvider::OpenRouter => self.execute_openrouter(provider_model, request).await,
        }
    }

    fn api_key_for(&self, provider: LlmProvider) -> Option<&str> {
        match provider {
            LlmProvider::Gemini => self.config.gemini_api_key.as_deref(),
            LlmProvider::OpenRouter => self.config.openrouter_api_key.as_deref(),
        }
    }

    async fn execute_gemini(&self, model: &str, request: LlmRequest) -> Result<LlmResponse> {
        let Some(api_key) = self.api_key_for(LlmProvider::Gemini) else {
            bail!("GEMINI_API_KEY is not configured but required for Gemini requests");
        };

        let payload = build_gemini_payload(&request);
        let url = format!("{GEMINI_API_BASE}/models/{model}:generateContent");

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .context("failed to reach Gemini")?;

        let status = response.status();
        let response_text = response.text().await.context("failed to read response body")?;
        let body: Value = serde_json::from_str(&response_text).with_context(|| {
            format!(
                "failed to parse Gemini response as JSON. Response body: {}",
                body_preview(&response_text)
            )
        })?;
        if !status.is_success() {
            bail!("gemini call failed with status {}: {}", status, body);
        }

        let (text, usage) = extract_gemini_text_and_usage(&body)?;
        let token_usage = reconcile_usage(usage, &request, &text);

        Ok(LlmResponse {
            text,
            token_usage,
            provider: LlmProvider::Gemini,
            model: model.to_string(),
        })
    }

    async fn execute_openrouter(&self, model: &str, request: LlmRequest) -> Result<LlmResponse> {
        let Some(api_key) = self.api_key_for(LlmProvider::OpenRouter) else {
            bail!("OPENROUTER_API_KEY is not configured but required for OpenRouter requests");
        };

        if !request.safety.is_empty() {
            debug!(%model, "safety settings are not forwarded to OpenRouter");
        }

        let payload = build_openrouter_payload(model, &request);

        let mut req_builder = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .bearer_auth(api_key)
            .json(&payload);

        if let Some(referer) = &self.config.openrouter_referer {
            req_builder = req_builder.header("HTTP-Referer", referer);
        }

        if let Some(title) = &self.config.openrouter_title {
            req_builder = req_builder.header("X-Title", title);
        }

        let response = req_builder.send().await.context("failed to reach OpenRouter")?;
        let status = response.status();
        let response_text = response.text().await.context("failed to read response body")?;
        let body: Value = serde_json::from_str(&response_text).with_context(|| {
            format!(
                "failed to parse OpenRouter response as JSON. Response body: {}",
                body_preview(&response_text)
            )
        })?;
        if !status.is_success() {
            bail!("openrouter call failed with status {}: {}", status, body);
        }

        let (text, usage) = extract_chat_text_and_usage(&body)
            .ok_or_else(|| anyhow!("unexpected OpenRouter response payload: {}", body))?;
        let token_usage = reconcile_usage(usage, &request, &text);

        Ok(LlmResponse {
            text,
            token_usage,
            provider: LlmProvider::OpenRouter,
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    fn is_configured(&self, model: &str) -> bool {
        parse_model_provider(model)
            .map(|(provider, _)| self.api_key_for(provider).is_some())
            .unwrap_or(false)
    }

    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.execute(request).await
    }
}

fn build_gemini_payload(request: &LlmRequest) -> Value {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in &request.messages {
        match msg.role {
            MessageRole::System => system_parts.push(json!({ "text": msg.text })),
            MessageRole::User => contents.push(json!({
                "role": "user",
                "parts": [{ "text": msg.text }],
            })),
        }
    }

    let mut payload = Map::new();
    payload.insert("contents".into(), Value::Array(contents));

    if !system_parts.is_empty() {
        payload.insert("systemInstruction".into(), json!({ "parts": system_parts }));
    }

    let mut generation = Map::new();
    if let Some(temperature) = request.generation.temperature {
        generation.insert("temperature".into(), json!(temperature));
    }
    if let Some(max_tokens) = request.generation.max_output_tokens {
        generation.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if !generation.is_empty() {
        payload.insert("generationConfig".into(), Value::Object(generation));
    }

    if !request.safety.is_empty() {
        let settings = request
            .safety
            .iter()
            .map(|setting| {
                json!({
                    "category": setting.category.as_str(),
                    "threshold": setting.threshold.as_str(),
                })
            })
            .collect();
        payload.insert("safetySettings".into(), Value::Array(settings));
    }

    Value::Object(payload)
}

fn build_openrouter_payload(model: &str, request: &LlmRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|msg| {
            json!({
                "role": msg.role.as_str(),
                "content": msg.text,
            })
        })
        .collect::<Vec<_>>();

    let mut payload = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(temperature) = request.generation.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.generation.max_output_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }

    payload
}

/// Pull candidate text and usage out of a Gemini `generateContent` payload.
fn extract_gemini_text_and_usage(value: &Value) -> Result<(String, Option<TokenUsage>)> {
    let payload: GeminiPayload = serde_json::from_value(value.clone())
        .map_err(|err| anyhow!("unexpected Gemini response payload: {err}"))?;

    if let Some(reason) = payload
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        bail!("gemini blocked the prompt: {reason}");
    }

    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("gemini returned no candidates"))?;

    let text = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        match candidate.finish_reason.as_deref() {
            Some("SAFETY") => bail!("gemini withheld the response for safety reasons"),
            Some(reason) => bail!("gemini returned an empty response (finish reason {reason})"),
            None => bail!("gemini returned an empty response"),
        }
    }

    let usage = payload.usage_metadata.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_token_count.unwrap_or_default(),
        response_tokens: usage.candidates_token_count.unwrap_or_default(),
        total_tokens: usage.total_token_count.unwrap_or_default(),
    });

    Ok((text, usage))
}

/// Extract assistant text and optional usage metrics from a Chat Completions payload.
fn extract_chat_text_and_usage(value: &Value) -> Option<(String, Option<TokenUsage>)> {
    let chat = serde_json::from_value::<OpenAiChatCompletionPayload>(value.clone()).ok()?;

    let text = chat
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)?;

    let usage = chat.usage.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_tokens.unwrap_or_default(),
        response_tokens: usage.completion_tokens.unwrap_or_default(),
        total_tokens: usage.total_tokens.unwrap_or_default(),
    });

    Some((text, usage))
}

fn reconcile_usage(usage: Option<TokenUsage>, request: &LlmRequest, text: &str) -> TokenUsage {
    let prompt_tokens = approximate_token_count(
        &request
            .messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let response_tokens = approximate_token_count(text);

    let mut token_usage = usage.unwrap_or(TokenUsage {
        prompt_tokens,
        response_tokens,
        total_tokens: prompt_tokens + response_tokens,
    });
    if token_usage.prompt_tokens == 0 {
        token_usage.prompt_tokens = prompt_tokens;
    }
    if token_usage.response_tokens == 0 {
        token_usage.response_tokens = response_tokens;
    }
    token_usage.total_tokens = token_usage.prompt_tokens + token_usage.response_tokens;
    token_usage
}

fn parse_model_provider(model: &str) -> Result<(LlmProvider, &str)> {
    let (provider, name) = model.split_once('/').ok_or_else(|| {
        anyhow!("model must be prefixed with provider, e.g. 'gemini/gemini-1.5-flash'")
    })?;

    if name.trim().is_empty() {
        bail!("model name is required after provider prefix");
    }

    match provider {
        "gemini" => Ok((LlmProvider::Gemini, name)),
        "openrouter" => Ok((LlmProvider::OpenRouter, name)),
        other => bail!("unsupported provider prefix: {other}"),
    }
}

fn approximate_token_count(input: &str) -> usize {
    input.split_whitespace().count()
}

fn body_preview(body: &str) -> String {
    if body.chars().count() > BODY_PREVIEW_CHARS {
        let head: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPayload {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: Option<usize>,
    #[serde(default)]
    candidates_token_count: Option<usize>,
    #[serde(default)]
    total_token_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionPayload {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChatMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> LlmRequest {
        LlmRequest::new(
            "gemini/gemini-1.5-flash",
            vec![
                ChatMessage::new(MessageRole::System, "be kind"),
                ChatMessage::new(MessageRole::User, "hello there"),
            ],
        )
        .with_generation(GenerationConfig {
            temperature: Some(0.7),
            max_output_tokens: Some(1024),
        })
        .with_safety(SafetySetting::uniform(BlockThreshold::BlockMediumAndAbove))
    }

    #[test]
    fn provider_prefix_is_required() {
        assert_eq!(
            parse_model_provider("gemini/gemini-1.5-flash").unwrap(),
            (LlmProvider::Gemini, "gemini-1.5-flash")
        );
        assert_eq!(
            parse_model_provider("openrouter/openai/gpt-4o").unwrap(),
            (LlmProvider::OpenRouter, "openai/gpt-4o")
        );
        assert!(parse_model_provider("gpt-4o").is_err());
        assert!(parse_model_provider("gemini/ ").is_err());
        assert!(parse_model_provider("poe/claude").is_err());
    }

    #[test]
    fn gemini_payload_carries_generation_and_safety() {
        let payload = build_gemini_payload(&sample_request());

        assert_eq!(payload["contents"][0]["role"], "user");
        assert_eq!(payload["contents"][0]["parts"][0]["text"], "hello there");
        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "be kind");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 1024);
        let temperature = payload["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.7).abs() < 1e-6);

        let safety = payload["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(
            safety
                .iter()
                .all(|setting| setting["threshold"] == "BLOCK_MEDIUM_AND_ABOVE")
        );
        assert_eq!(safety[0]["category"], "HARM_CATEGORY_HARASSMENT");
    }

    #[test]
    fn openrouter_payload_maps_generation_fields() {
        let payload = build_openrouter_payload("openai/gpt-4o", &sample_request());
        assert_eq!(payload["model"], "openai/gpt-4o");
        assert_eq!(payload["messages"][0]["role"], "system");
        assert_eq!(payload["max_tokens"], 1024);
        assert!(payload.get("safetySettings").is_none());
    }

    #[test]
    fn gemini_text_is_joined_across_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "{\"a\":" }, { "text": " 1}" }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 4, "totalTokenCount": 16 }
        });
        let (text, usage) = extract_gemini_text_and_usage(&body).unwrap();
        assert_eq!(text, "{\"a\": 1}");
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.total_tokens, 16);
    }

    #[test]
    fn gemini_safety_blocks_are_errors() {
        let blocked_prompt = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = extract_gemini_text_and_usage(&blocked_prompt).unwrap_err();
        assert!(format!("{err}").contains("blocked"));

        let withheld = json!({ "candidates": [{ "finishReason": "SAFETY" }] });
        let err = extract_gemini_text_and_usage(&withheld).unwrap_err();
        assert!(format!("{err}").contains("safety"));
    }

    #[test]
    fn chat_completion_text_is_extracted() {
        let body = json!({
            "choices": [{ "message": { "content": "hi" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        });
        let (text, usage) = extract_chat_text_and_usage(&body).unwrap();
        assert_eq!(text, "hi");
        assert_eq!(usage.unwrap().response_tokens, 1);
    }

    #[test]
    fn usage_falls_back_to_word_counts() {
        let usage = reconcile_usage(None, &sample_request(), "three word reply");
        assert_eq!(usage.prompt_tokens, 4);
        assert_eq!(usage.response_tokens, 3);
        assert_eq!(usage.total_tokens, 7);
    }

    #[test]
    fn client_reports_configuration_per_provider() {
        let client = LlmClient {
            http: Client::new(),
            config: LlmConfig {
                gemini_api_key: Some("key".into()),
                ..LlmConfig::default()
            },
        };
        assert!(client.is_configured("gemini/gemini-1.5-flash"));
        assert!(!client.is_configured("openrouter/openai/gpt-4o"));
        assert!(!client.is_configured("not-a-model"));
    }
}
