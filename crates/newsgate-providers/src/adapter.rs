//! Provider adapter seam and the shared HTTP client behind it.
//!
//! [`ProviderAdapter`] is what the orchestrator talks to. [`ProviderClient`]
//! implements it for any [`WireFormat`]: it owns the HTTP client, rotates
//! keys through the [`KeyPool`], retries transient failures with back-off
//! and turns schema mismatches into empty results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newsgate_coord::{retry_with_backoff, KeyPool, KeyPoolError, KeyedCallError};
use newsgate_core::{AppConfig, CandidateArticle, Provider, UrlCanonicalizer};
use reqwest::{Client, Url};

use crate::error::{FetchError, ProviderError, SchemaError};
use crate::types::FetchParams;

const MAX_ERROR_BODY_CHARS: usize = 200;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Fetches and normalizes one page of articles.
    ///
    /// A response that does not match the provider schema yields `Ok` with
    /// no articles.
    async fn fetch_articles(&self, params: &FetchParams)
        -> Result<Vec<CandidateArticle>, FetchError>;
}

/// Request and response shape of one provider API.
pub trait WireFormat: Send + Sync {
    fn provider(&self) -> Provider;

    fn default_base_url(&self) -> &'static str;

    /// Full request URL for `params`, authenticated with `api_key`.
    fn request_url(&self, base_url: &Url, api_key: &str, params: &FetchParams) -> Url;

    /// Validates a response body and normalizes its items. Items without a
    /// title or a usable URL are dropped individually.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the top-level shape is wrong.
    fn parse(
        &self,
        body: &str,
        canonicalizer: &UrlCanonicalizer,
    ) -> Result<Vec<CandidateArticle>, SchemaError>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Hard per-request timeout.
    pub timeout: Duration,
    /// Extra attempts with the same key on transient failures.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub canonicalizer: UrlCanonicalizer,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 2,
            backoff_base_ms: 500,
            canonicalizer: UrlCanonicalizer::default(),
        }
    }
}

impl ClientSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig, canonicalizer: UrlCanonicalizer) -> Self {
        Self {
            timeout: Duration::from_secs(config.provider_timeout_secs),
            max_retries: config.provider_max_retries,
            backoff_base_ms: config.provider_backoff_base_ms,
            canonicalizer,
        }
    }
}

pub struct ProviderClient<W> {
    format: W,
    http: Client,
    base_url: Url,
    key_pool: Arc<KeyPool>,
    settings: ClientSettings,
}

impl<W: WireFormat> ProviderClient<W> {
    /// Creates a client pointed at the provider's production API.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(
        format: W,
        key_pool: Arc<KeyPool>,
        settings: ClientSettings,
    ) -> Result<Self, ProviderError> {
        let base_url = format.default_base_url();
        Self::with_base_url(format, base_url, key_pool, settings)
    }

    /// Creates a client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`ProviderError::InvalidBaseUrl`] if
    /// `base_url` does not parse.
    pub fn with_base_url(
        format: W,
        base_url: &str,
        key_pool: Arc<KeyPool>,
        settings: ClientSettings,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsgate/0.1 (news-ingestion)")
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| ProviderError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            format,
            http,
            base_url,
            key_pool,
            settings,
        })
    }

    /// One HTTP exchange with one key.
    async fn fetch_once(
        &self,
        api_key: &str,
        params: &FetchParams,
    ) -> Result<Vec<CandidateArticle>, ProviderError> {
        let url = self.format.request_url(&self.base_url, api_key, params);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response.text().await.map_err(reqwest::Error::without_url)?;
        Ok(self.format.parse(&body, &self.settings.canonicalizer)?)
    }
}

#[async_trait]
impl<W: WireFormat> ProviderAdapter for ProviderClient<W> {
    fn provider(&self) -> Provider {
        self.format.provider()
    }

    async fn fetch_articles(
        &self,
        params: &FetchParams,
    ) -> Result<Vec<CandidateArticle>, FetchError> {
        let provider = self.format.provider();
        let result = self
            .key_pool
            .call_with_keys(provider, |key| async move {
                retry_with_backoff(
                    provider.as_str(),
                    self.settings.max_retries,
                    self.settings.backoff_base_ms,
                    ProviderError::is_retriable,
                    || self.fetch_once(&key.value, params),
                )
                .await
            })
            .await;

        match result {
            Ok(articles) => {
                tracing::debug!(provider = %provider, count = articles.len(), "provider fetch succeeded");
                Ok(articles)
            }
            Err(KeyedCallError::Keys(KeyPoolError::NoKeysAvailable { provider })) => {
                Err(FetchError::NoKeysAvailable { provider })
            }
            Err(KeyedCallError::Call(ProviderError::Schema(source))) => {
                tracing::warn!(provider = %provider, error = %source, "discarding malformed provider response");
                Err(FetchError::Schema { provider, source })
            }
            Err(KeyedCallError::Call(e)) if e.is_retriable() => {
                Err(FetchError::Transient { provider, source: e })
            }
            Err(KeyedCallError::Call(e)) => Err(FetchError::Rejected { provider, source: e }),
        }
    }
}
