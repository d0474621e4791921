//! Ordered API-key pool with shared cooldowns.
//!
//! Keys are tried in configured priority order. A key is skipped while its
//! cooldown marker exists in the coordination store, so every worker process
//! sees the same cooldowns. Raw keys never reach the store; markers are
//! addressed by a SHA-256 fingerprint.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use newsgate_core::{AppConfig, Provider};
use sha2::{Digest, Sha256};

use crate::clock::{expiry_after, Clock, SystemClock};
use crate::error::{CoordError, KeyPoolError, KeyedCallError};
use crate::store::CoordinationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPoolSettings {
    /// How long a key is benched after a rate limit, auth failure, or too
    /// many errors.
    pub cooldown: Duration,
    /// Consecutive non-rate-limit errors that bench a key.
    pub error_threshold: u32,
    /// Lifetime of the shared error counter, measured from its first error.
    pub error_window: Duration,
}

impl Default for KeyPoolSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(600),
            error_threshold: 5,
            error_window: Duration::from_secs(3600),
        }
    }
}

impl KeyPoolSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.key_cooldown_secs),
            error_threshold: config.key_error_threshold.max(1),
            ..Self::default()
        }
    }
}

/// A key handed out by [`KeyPool::acquire`].
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub value: String,
    pub provider: Provider,
    pub consecutive_errors: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Short, non-reversible identifier safe for logs and store keys.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.value)
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("provider", &self.provider)
            .field("fingerprint", &self.fingerprint())
            .field("consecutive_errors", &self.consecutive_errors)
            .field("cooldown_until", &self.cooldown_until)
            .finish_non_exhaustive()
    }
}

/// Operator view of one configured key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    pub provider: Provider,
    /// Zero-based priority position.
    pub position: usize,
    pub fingerprint: String,
    pub consecutive_errors: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl KeyStatus {
    #[must_use]
    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

/// How a keyed call failed, from the key pool's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 429: bench the key, try the next one.
    RateLimited,
    /// HTTP 401/403: bench the key, try the next one.
    Unauthorized,
    /// Server or network trouble that survived the caller's own retries.
    Transient,
    /// Anything another key would not fix.
    Fatal,
}

/// Errors that [`KeyPool::call_with_keys`] can classify.
pub trait KeyedFailure {
    fn failure_kind(&self) -> FailureKind;
}

#[derive(Debug, Clone, Default)]
struct LocalKeyState {
    consecutive_errors: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

pub struct KeyPool {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    settings: KeyPoolSettings,
    keys: HashMap<Provider, Vec<String>>,
    local: Mutex<HashMap<String, LocalKeyState>>,
}

impl KeyPool {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, settings: KeyPoolSettings) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            settings,
            keys: HashMap::new(),
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Pool holding every provider's keys from `config`.
    #[must_use]
    pub fn from_app_config(store: Arc<dyn CoordinationStore>, config: &AppConfig) -> Self {
        [Provider::NewswireA, Provider::NewswireB, Provider::Analysis]
            .into_iter()
            .fold(
                Self::new(store, KeyPoolSettings::from_app_config(config)),
                |pool, provider| pool.with_keys(provider, config.credentials(provider).keys.clone()),
            )
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers `keys` for `provider` in priority order, replacing any
    /// previous list.
    #[must_use]
    pub fn with_keys(mut self, provider: Provider, keys: Vec<String>) -> Self {
        self.keys.insert(provider, keys);
        self
    }

    #[must_use]
    pub fn key_count(&self, provider: Provider) -> usize {
        self.keys_for(provider).len()
    }

    /// Returns the highest-priority key of `provider` that is not cooling down.
    ///
    /// If the store cannot be reached the local cooldown cache decides,
    /// which in a fresh process means every key is usable.
    ///
    /// # Errors
    ///
    /// Returns [`KeyPoolError::NoKeysAvailable`] when every key is cooling
    /// down or none are configured.
    pub async fn acquire(&self, provider: Provider) -> Result<ApiKey, KeyPoolError> {
        let now = self.clock.now();
        let mut store_down = false;

        for value in self.keys_for(provider) {
            let id = key_id(provider, value);
            let cooling_until = match self.store.get(&cooldown_key(&id)).await {
                Ok(marker) => {
                    let until = marker.map(|raw| self.parse_marker(&id, &raw, now));
                    self.update_local(&id, |s| s.cooldown_until = until);
                    until
                }
                Err(e) => {
                    if !store_down {
                        tracing::warn!(
                            provider = %provider,
                            error = %e,
                            "coordination store unreachable, using local key cooldowns"
                        );
                        store_down = true;
                    }
                    self.local_state(&id).cooldown_until
                }
            };

            if cooling_until.is_some_and(|until| until > now) {
                tracing::debug!(provider = %provider, key = %fingerprint(value), "key cooling down, skipping");
                continue;
            }

            return Ok(ApiKey {
                value: value.clone(),
                provider,
                consecutive_errors: self.local_state(&id).consecutive_errors,
                cooldown_until: None,
            });
        }

        Err(KeyPoolError::NoKeysAvailable { provider })
    }

    /// Clears the key's shared error counter. An active cooldown is left alone.
    pub async fn report_success(&self, key: &ApiKey) {
        let id = key_id(key.provider, &key.value);
        if let Err(e) = self.store.delete(&errors_key(&id)).await {
            tracing::warn!(provider = %key.provider, error = %e, "failed to clear key error counter");
        }
        self.update_local(&id, |s| s.consecutive_errors = 0);
    }

    /// Records a failed call made with `key`.
    ///
    /// Rate limits bench the key at once. Other failures bump the shared
    /// error counter and bench the key when it reaches the threshold.
    pub async fn report_failure(&self, key: &ApiKey, rate_limited: bool) {
        if rate_limited {
            tracing::warn!(
                provider = %key.provider,
                key = %key.fingerprint(),
                "key rate limited, cooling down"
            );
            self.cool_down(key).await;
            return;
        }

        let id = key_id(key.provider, &key.value);
        let count = match self
            .store
            .increment(&errors_key(&id), Some(self.settings.error_window))
            .await
        {
            Ok(n) => u32::try_from(n).unwrap_or(u32::MAX),
            Err(e) => {
                tracing::warn!(provider = %key.provider, error = %e, "failed to record key error in store");
                self.local_state(&id).consecutive_errors.saturating_add(1)
            }
        };
        self.update_local(&id, |s| s.consecutive_errors = count);

        if count >= self.settings.error_threshold {
            tracing::warn!(
                provider = %key.provider,
                key = %key.fingerprint(),
                errors = count,
                "key error threshold reached, cooling down"
            );
            self.cool_down(key).await;
            if let Err(e) = self.store.delete(&errors_key(&id)).await {
                tracing::warn!(provider = %key.provider, error = %e, "failed to reset key error counter");
            }
            self.update_local(&id, |s| s.consecutive_errors = 0);
        }
    }

    /// Benches a key the upstream rejected as invalid or unauthorized.
    pub async fn report_unauthorized(&self, key: &ApiKey) {
        tracing::warn!(
            provider = %key.provider,
            key = %key.fingerprint(),
            "key rejected as unauthorized, cooling down"
        );
        self.cool_down(key).await;
    }

    /// Reloads cooldowns and error counters for `provider` from the store.
    ///
    /// # Errors
    ///
    /// Returns the first store error; local state read before it is kept.
    pub async fn sync(&self, provider: Provider) -> Result<(), CoordError> {
        let now = self.clock.now();
        for value in self.keys_for(provider) {
            let id = key_id(provider, value);
            let marker = self.store.get(&cooldown_key(&id)).await?;
            let errors = self.store.get(&errors_key(&id)).await?;
            let until = marker.map(|raw| self.parse_marker(&id, &raw, now));
            let count = errors
                .and_then(|raw| raw.parse::<u32>().ok())
                .unwrap_or(0);
            self.update_local(&id, |s| {
                s.cooldown_until = until;
                s.consecutive_errors = count;
            });
        }
        Ok(())
    }

    /// Current status of every key configured for `provider`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn snapshot(&self, provider: Provider) -> Result<Vec<KeyStatus>, CoordError> {
        self.sync(provider).await?;
        Ok(self
            .keys_for(provider)
            .iter()
            .enumerate()
            .map(|(position, value)| {
                let state = self.local_state(&key_id(provider, value));
                KeyStatus {
                    provider,
                    position,
                    fingerprint: fingerprint(value),
                    consecutive_errors: state.consecutive_errors,
                    cooldown_until: state.cooldown_until,
                }
            })
            .collect())
    }

    /// Runs `op` with keys of `provider` in priority order until one succeeds.
    ///
    /// Rate-limited and unauthorized outcomes bench the key and move on to
    /// the next one, at most once per configured key. Transient failures are
    /// counted against the key and returned. Fatal failures are returned
    /// without touching key health.
    ///
    /// # Errors
    ///
    /// [`KeyedCallError::Keys`] when no usable key remains,
    /// [`KeyedCallError::Call`] for a transient or fatal failure.
    pub async fn call_with_keys<T, E, F, Fut>(
        &self,
        provider: Provider,
        mut op: F,
    ) -> Result<T, KeyedCallError<E>>
    where
        F: FnMut(ApiKey) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: KeyedFailure + std::error::Error + 'static,
    {
        for attempt in 1..=self.key_count(provider) {
            let key = self.acquire(provider).await?;
            let used = key.clone();
            match op(key).await {
                Ok(value) => {
                    self.report_success(&used).await;
                    return Ok(value);
                }
                Err(err) => match err.failure_kind() {
                    FailureKind::RateLimited => {
                        self.report_failure(&used, true).await;
                        tracing::debug!(provider = %provider, attempt, "rotating to next key");
                    }
                    FailureKind::Unauthorized => {
                        self.report_unauthorized(&used).await;
                        tracing::debug!(provider = %provider, attempt, "rotating to next key");
                    }
                    FailureKind::Transient => {
                        self.report_failure(&used, false).await;
                        return Err(KeyedCallError::Call(err));
                    }
                    FailureKind::Fatal => return Err(KeyedCallError::Call(err)),
                },
            }
        }
        Err(KeyPoolError::NoKeysAvailable { provider }.into())
    }

    async fn cool_down(&self, key: &ApiKey) {
        let id = key_id(key.provider, &key.value);
        let until = expiry_after(self.clock.now(), self.settings.cooldown);
        self.update_local(&id, |s| s.cooldown_until = Some(until));
        if let Err(e) = self
            .store
            .set(&cooldown_key(&id), &until.to_rfc3339(), Some(self.settings.cooldown))
            .await
        {
            tracing::warn!(
                provider = %key.provider,
                error = %e,
                "failed to share key cooldown, cooling locally only"
            );
        }
    }

    fn keys_for(&self, provider: Provider) -> &[String] {
        self.keys.get(&provider).map_or(&[], Vec::as_slice)
    }

    fn parse_marker(&self, id: &str, raw: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).map_or_else(
            |e| {
                // The marker exists, so the key is cooling; its expiry is unknown.
                tracing::warn!(key = id, error = %e, "unreadable cooldown marker");
                expiry_after(now, self.settings.cooldown)
            },
            |t| t.with_timezone(&Utc),
        )
    }

    fn lock_local(&self) -> MutexGuard<'_, HashMap<String, LocalKeyState>> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_state(&self, id: &str) -> LocalKeyState {
        self.lock_local().get(id).cloned().unwrap_or_default()
    }

    fn update_local(&self, id: &str, f: impl FnOnce(&mut LocalKeyState)) {
        f(self.lock_local().entry(id.to_string()).or_default());
    }
}

fn fingerprint(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn key_id(provider: Provider, value: &str) -> String {
    format!("{provider}:{}", fingerprint(value))
}

fn cooldown_key(id: &str) -> String {
    format!("keypool:cooldown:{id}")
}

fn errors_key(id: &str) -> String {
    format!("keypool:errors:{id}")
}

#[cfg(test)]
#[path = "key_pool_test.rs"]
mod tests;
