use std::env::VarError;
use std::path::PathBuf;
use std::str::FromStr;

use crate::app_config::{AppConfig, Environment, ProviderCredentials};
use crate::types::Provider;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the real environment so they can
/// be tested with a plain `HashMap` lookup.
///
/// # Errors
///
/// Returns `ConfigError` if required variables are missing or values are invalid.
pub fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("NEWSGATE_ENV", "development"))?;
    let log_level = or_default("NEWSGATE_LOG_LEVEL", "info");
    let ingest_config_path = PathBuf::from(or_default(
        "NEWSGATE_INGEST_CONFIG_PATH",
        "./config/ingest.yaml",
    ));

    let primary_provider = parse_provider(
        "NEWSGATE_PRIMARY_PROVIDER",
        &or_default("NEWSGATE_PRIMARY_PROVIDER", "newswire_a"),
    )?;
    let secondary_provider = parse_provider(
        "NEWSGATE_SECONDARY_PROVIDER",
        &or_default("NEWSGATE_SECONDARY_PROVIDER", "newswire_b"),
    )?;
    if primary_provider == secondary_provider {
        return Err(ConfigError::InvalidEnvVar {
            var: "NEWSGATE_SECONDARY_PROVIDER".to_string(),
            reason: "secondary provider must differ from the primary".to_string(),
        });
    }
    if primary_provider == Provider::Analysis || secondary_provider == Provider::Analysis {
        return Err(ConfigError::InvalidEnvVar {
            var: "NEWSGATE_PRIMARY_PROVIDER".to_string(),
            reason: "the analysis provider cannot serve news fetches".to_string(),
        });
    }

    let credentials = |keys_var: &str, url_var: &str| ProviderCredentials {
        keys: parse_key_list(&or_default(keys_var, "")),
        base_url: lookup(url_var).ok().filter(|s| !s.trim().is_empty()),
    };

    let newswire_a = credentials("NEWSWIRE_A_API_KEYS", "NEWSWIRE_A_BASE_URL");
    let newswire_b = credentials("NEWSWIRE_B_API_KEYS", "NEWSWIRE_B_BASE_URL");
    let analysis = credentials("AI_API_KEYS", "AI_BASE_URL");
    let ai_model = or_default("AI_MODEL", "gpt-4o-mini");
    let ai_embed_model = or_default("AI_EMBED_MODEL", "text-embedding-3-small");

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        ingest_config_path,
        primary_provider,
        secondary_provider,
        newswire_a,
        newswire_b,
        analysis,
        ai_model,
        ai_embed_model,
        key_cooldown_secs: parse_var(&lookup, "NEWSGATE_KEY_COOLDOWN_SECS", "600")?,
        key_error_threshold: parse_var(&lookup, "NEWSGATE_KEY_ERROR_THRESHOLD", "5")?,
        circuit_threshold: parse_var(&lookup, "NEWSGATE_CIRCUIT_THRESHOLD", "3")?,
        circuit_cooldown_secs: parse_var(&lookup, "NEWSGATE_CIRCUIT_COOLDOWN_SECS", "1800")?,
        circuit_window_secs: parse_var(&lookup, "NEWSGATE_CIRCUIT_WINDOW_SECS", "600")?,
        min_yield: parse_var(&lookup, "NEWSGATE_MIN_YIELD", "2")?,
        parallel_fallback: parse_var(&lookup, "NEWSGATE_PARALLEL_FALLBACK", "false")?,
        provider_timeout_secs: parse_var(&lookup, "NEWSGATE_PROVIDER_TIMEOUT_SECS", "15")?,
        provider_max_retries: parse_var(&lookup, "NEWSGATE_PROVIDER_MAX_RETRIES", "2")?,
        provider_backoff_base_ms: parse_var(&lookup, "NEWSGATE_PROVIDER_BACKOFF_BASE_MS", "500")?,
        claim_ttl_secs: parse_var(&lookup, "NEWSGATE_CLAIM_TTL_SECS", "300")?,
        seen_ttl_secs: parse_var(&lookup, "NEWSGATE_SEEN_TTL_SECS", "604800")?,
        decision_ttl_secs: parse_var(&lookup, "NEWSGATE_DECISION_TTL_SECS", "86400")?,
        strike_threshold: parse_var(&lookup, "NEWSGATE_STRIKE_THRESHOLD", "5")?,
        strike_window_secs: parse_var(&lookup, "NEWSGATE_STRIKE_WINDOW_SECS", "86400")?,
        min_text_len: parse_var(&lookup, "NEWSGATE_MIN_TEXT_LEN", "40")?,
        ai_timeout_secs: parse_var(&lookup, "NEWSGATE_AI_TIMEOUT_SECS", "20")?,
        classify_concurrency: parse_nonzero(&lookup, "NEWSGATE_CLASSIFY_CONCURRENCY", "4")?,
        fetch_schedule: or_default("NEWSGATE_FETCH_SCHEDULE", "0 */15 * * * *"),
        worker_concurrency: parse_nonzero(&lookup, "NEWSGATE_WORKER_CONCURRENCY", "2")?,
        worker_poll_ms: parse_var(&lookup, "NEWSGATE_WORKER_POLL_MS", "1000")?,
        job_max_attempts: parse_var(&lookup, "NEWSGATE_JOB_MAX_ATTEMPTS", "3")?,
        job_backoff_secs: parse_var(&lookup, "NEWSGATE_JOB_BACKOFF_SECS", "30")?,
        db_max_connections: parse_var(&lookup, "NEWSGATE_DB_MAX_CONNECTIONS", "10")?,
        db_min_connections: parse_var(&lookup, "NEWSGATE_DB_MIN_CONNECTIONS", "1")?,
        db_acquire_timeout_secs: parse_var(&lookup, "NEWSGATE_DB_ACQUIRE_TIMEOUT_SECS", "10")?,
    })
}

fn parse_var<T, F>(lookup: &F, var: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<String, VarError>,
{
    let raw = lookup(var).unwrap_or_else(|_| default.to_string());
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

fn parse_nonzero<F>(lookup: &F, var: &str, default: &str) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    let value: usize = parse_var(lookup, var, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(value)
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "NEWSGATE_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_provider(var: &str, raw: &str) -> Result<Provider, ConfigError> {
    raw.parse::<Provider>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
}

/// Split a comma-separated key list, preserving order and dropping blanks
/// and repeats.
fn parse_key_list(raw: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
