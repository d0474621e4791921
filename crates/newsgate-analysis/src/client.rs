use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newsgate_coord::{
    retry_with_backoff, CircuitBreaker, KeyPool, KeyPoolError, KeyedCallError,
};
use newsgate_core::{
    AnalysisMode, AnalysisResult, Analyzer, AppConfig, Category, JunkVerdict, Provider,
};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::prompts;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/";
const PROVIDER: Provider = Provider::Analysis;

/// Longest article text sent to the model, in characters.
const MAX_INPUT_CHARS: usize = 8_000;
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub model: String,
    pub embed_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(20),
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

impl AiSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            model: config.ai_model.clone(),
            embed_model: config.ai_embed_model.clone(),
            timeout: Duration::from_secs(config.ai_timeout_secs),
            max_retries: config.provider_max_retries,
            backoff_base_ms: config.provider_backoff_base_ms,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ClassifyReply {
    is_junk: bool,
    #[serde(default)]
    category: String,
    #[serde(default)]
    recommended_mode: String,
}

#[derive(Deserialize)]
struct AnalyzeReply {
    #[serde(default)]
    category: String,
    bias_score: f32,
    credibility_score: f32,
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// OpenAI-compatible implementation of [`Analyzer`].
pub struct AiClient {
    http: Client,
    base_url: Url,
    key_pool: Arc<KeyPool>,
    breaker: Arc<CircuitBreaker>,
    settings: AiSettings,
}

impl AiClient {
    /// Creates a client pointed at the public API.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        key_pool: Arc<KeyPool>,
        breaker: Arc<CircuitBreaker>,
        settings: AiSettings,
    ) -> Result<Self, AnalysisError> {
        Self::with_base_url(DEFAULT_BASE_URL, key_pool, breaker, settings)
    }

    /// Creates a client with a custom base URL (self-hosted gateway, or
    /// wiremock in tests).
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`AnalysisError::InvalidBaseUrl`] if
    /// `base_url` does not parse.
    pub fn with_base_url(
        base_url: &str,
        key_pool: Arc<KeyPool>,
        breaker: Arc<CircuitBreaker>,
        settings: AiSettings,
    ) -> Result<Self, AnalysisError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsgate/0.1 (news-ingestion)")
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| AnalysisError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            http,
            base_url,
            key_pool,
            breaker,
            settings,
        })
    }

    /// Builds the client from env configuration, honouring `AI_BASE_URL`.
    ///
    /// # Errors
    ///
    /// See [`AiClient::with_base_url`].
    pub fn from_app_config(
        config: &AppConfig,
        key_pool: Arc<KeyPool>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, AnalysisError> {
        let base_url = config
            .analysis
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL);
        Self::with_base_url(
            base_url,
            key_pool,
            breaker,
            AiSettings::from_app_config(config),
        )
    }

    /// Asks the chat model for a JSON object and decodes it as `T`.
    async fn chat_json<T: DeserializeOwned>(
        &self,
        system: &str,
        text: &str,
    ) -> Result<T, AnalysisError> {
        let input = truncate(text, MAX_INPUT_CHARS);
        let content = self
            .guarded(|api_key| async move {
                let request = ChatRequest {
                    model: &self.settings.model,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: system,
                        },
                        ChatMessage {
                            role: "user",
                            content: input,
                        },
                    ],
                    temperature: 0.0,
                    response_format: ResponseFormat {
                        kind: "json_object",
                    },
                };
                let reply: ChatResponse = self
                    .post_json("v1/chat/completions", &api_key, &request)
                    .await?;
                reply
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| AnalysisError::Malformed("no choices in reply".to_string()))
            })
            .await?;

        serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| AnalysisError::Malformed(format!("reply is not the expected JSON: {e}")))
    }

    /// Runs `call` behind the circuit breaker, with key rotation and retries.
    async fn guarded<T, F, Fut>(&self, call: F) -> Result<T, AnalysisError>
    where
        F: Fn(String) -> Fut,
        Fut: std::future::Future<Output = Result<T, AnalysisError>>,
    {
        if !self.breaker.is_available(PROVIDER).await {
            tracing::debug!(provider = PROVIDER.as_str(), "circuit open, skipping AI call");
            return Err(AnalysisError::CircuitOpen);
        }

        let result = self
            .key_pool
            .call_with_keys(PROVIDER, |key| {
                let call = &call;
                async move {
                    retry_with_backoff(
                        PROVIDER.as_str(),
                        self.settings.max_retries,
                        self.settings.backoff_base_ms,
                        AnalysisError::is_retriable,
                        || call(key.value.clone()),
                    )
                    .await
                }
            })
            .await;

        match result {
            Ok(value) => {
                self.breaker.record_success(PROVIDER).await;
                Ok(value)
            }
            Err(KeyedCallError::Keys(KeyPoolError::NoKeysAvailable { .. })) => {
                tracing::warn!(provider = PROVIDER.as_str(), "no analysis keys available");
                Err(AnalysisError::NoKeysAvailable)
            }
            Err(KeyedCallError::Call(e)) => {
                tracing::warn!(provider = PROVIDER.as_str(), error = %e, "AI call failed");
                if e.is_retriable() {
                    self.breaker.record_failure_with_policy(PROVIDER).await;
                }
                Err(e)
            }
        }
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        api_key: &str,
        body: &B,
    ) -> Result<T, AnalysisError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| AnalysisError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;

        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let text = response.text().await.map_err(reqwest::Error::without_url)?;
        serde_json::from_str(&text).map_err(|e| AnalysisError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Analyzer for AiClient {
    async fn analyze(&self, text: &str, mode: AnalysisMode) -> anyhow::Result<AnalysisResult> {
        let system = match mode {
            AnalysisMode::Full => prompts::ANALYZE_FULL,
            AnalysisMode::Basic => prompts::ANALYZE_BASIC,
        };
        let reply: AnalyzeReply = self.chat_json(system, text).await?;
        Ok(AnalysisResult {
            category: Category::from_label(&reply.category),
            bias_score: reply.bias_score.clamp(-1.0, 1.0),
            credibility_score: reply.credibility_score.clamp(0.0, 1.0),
            summary: reply.summary.trim().to_string(),
            key_points: reply
                .key_points
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        })
    }

    async fn classify(&self, text: &str) -> anyhow::Result<JunkVerdict> {
        let reply: ClassifyReply = self.chat_json(prompts::CLASSIFY, text).await?;
        Ok(JunkVerdict {
            is_junk: reply.is_junk,
            category: Category::from_label(&reply.category),
            recommended_mode: if reply.recommended_mode.eq_ignore_ascii_case("basic") {
                AnalysisMode::Basic
            } else {
                AnalysisMode::Full
            },
        })
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let input = truncate(text, MAX_INPUT_CHARS);
        let embedding = self
            .guarded(|api_key| async move {
                let request = EmbedRequest {
                    model: &self.settings.embed_model,
                    input,
                };
                let reply: EmbedResponse =
                    self.post_json("v1/embeddings", &api_key, &request).await?;
                reply
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| AnalysisError::Malformed("no embedding in reply".to_string()))
            })
            .await?;
        Ok(embedding)
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Models sometimes wrap JSON in a Markdown fence despite instructions.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map_or(trimmed, str::trim)
}
