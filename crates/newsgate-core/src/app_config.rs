use std::path::PathBuf;

use crate::types::Provider;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Ordered credentials and endpoint override for one upstream.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    /// Keys in priority order: earlier keys are preferred, later keys are reserve.
    pub keys: Vec<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("keys", &format!("[{} redacted]", self.keys.len()))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub ingest_config_path: PathBuf,

    pub primary_provider: Provider,
    pub secondary_provider: Provider,
    pub newswire_a: ProviderCredentials,
    pub newswire_b: ProviderCredentials,
    pub analysis: ProviderCredentials,
    pub ai_model: String,
    pub ai_embed_model: String,

    pub key_cooldown_secs: u64,
    pub key_error_threshold: u32,
    pub circuit_threshold: u32,
    pub circuit_cooldown_secs: u64,
    pub circuit_window_secs: u64,

    pub min_yield: usize,
    pub parallel_fallback: bool,
    pub provider_timeout_secs: u64,
    pub provider_max_retries: u32,
    pub provider_backoff_base_ms: u64,

    pub claim_ttl_secs: u64,
    pub seen_ttl_secs: u64,
    pub decision_ttl_secs: u64,
    pub strike_threshold: u32,
    pub strike_window_secs: u64,
    pub min_text_len: usize,
    pub ai_timeout_secs: u64,
    pub classify_concurrency: usize,

    pub fetch_schedule: String,
    pub worker_concurrency: usize,
    pub worker_poll_ms: u64,
    pub job_max_attempts: u32,
    pub job_backoff_secs: u64,

    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

impl AppConfig {
    /// Credentials configured for `provider`.
    #[must_use]
    pub fn credentials(&self, provider: Provider) -> &ProviderCredentials {
        match provider {
            Provider::NewswireA => &self.newswire_a,
            Provider::NewswireB => &self.newswire_b,
            Provider::Analysis => &self.analysis,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("ingest_config_path", &self.ingest_config_path)
            .field("database_url", &"[redacted]")
            .field("primary_provider", &self.primary_provider)
            .field("secondary_provider", &self.secondary_provider)
            .field("newswire_a", &self.newswire_a)
            .field("newswire_b", &self.newswire_b)
            .field("analysis", &self.analysis)
            .field("ai_model", &self.ai_model)
            .field("ai_embed_model", &self.ai_embed_model)
            .field("key_cooldown_secs", &self.key_cooldown_secs)
            .field("key_error_threshold", &self.key_error_threshold)
            .field("circuit_threshold", &self.circuit_threshold)
            .field("circuit_cooldown_secs", &self.circuit_cooldown_secs)
            .field("circuit_window_secs", &self.circuit_window_secs)
            .field("min_yield", &self.min_yield)
            .field("parallel_fallback", &self.parallel_fallback)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("provider_max_retries", &self.provider_max_retries)
            .field("provider_backoff_base_ms", &self.provider_backoff_base_ms)
            .field("claim_ttl_secs", &self.claim_ttl_secs)
            .field("seen_ttl_secs", &self.seen_ttl_secs)
            .field("decision_ttl_secs", &self.decision_ttl_secs)
            .field("strike_threshold", &self.strike_threshold)
            .field("strike_window_secs", &self.strike_window_secs)
            .field("min_text_len", &self.min_text_len)
            .field("ai_timeout_secs", &self.ai_timeout_secs)
            .field("classify_concurrency", &self.classify_concurrency)
            .field("fetch_schedule", &self.fetch_schedule)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("worker_poll_ms", &self.worker_poll_ms)
            .field("job_max_attempts", &self.job_max_attempts)
            .field("job_backoff_secs", &self.job_backoff_secs)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .finish()
    }
}
