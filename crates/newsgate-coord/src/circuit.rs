//! Per-provider circuit breaker backed by the coordination store.
//!
//! Failures are counted in a windowed counter. When the count reaches the
//! threshold an "open" marker is written whose TTL is the cooldown; the
//! provider becomes available again only when that marker lapses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use newsgate_core::{AppConfig, Provider};

use crate::clock::{expiry_after, Clock, SystemClock};
use crate::store::CoordinationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub threshold: u32,
    pub cooldown: Duration,
    /// Failures older than this no longer count toward the threshold.
    pub window: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(1800),
            window: Duration::from_secs(600),
        }
    }
}

impl CircuitPolicy {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            threshold: config.circuit_threshold.max(1),
            cooldown: Duration::from_secs(config.circuit_cooldown_secs),
            window: Duration::from_secs(config.circuit_window_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Snapshot of one provider's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCircuit {
    pub provider: Provider,
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_until: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    policy: CircuitPolicy,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, policy: CircuitPolicy) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            policy,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn policy(&self) -> CircuitPolicy {
        self.policy
    }

    /// `true` unless the provider's breaker is open.
    ///
    /// A store that cannot be read never blocks a provider.
    pub async fn is_available(&self, provider: Provider) -> bool {
        match self.store.get(&open_key(provider)).await {
            Ok(None) => true,
            Ok(Some(raw)) => match parse_instant(&raw) {
                Some(until) => until <= self.clock.now(),
                None => {
                    tracing::warn!(provider = %provider, value = %raw, "unreadable circuit marker, treating as closed");
                    true
                }
            },
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "circuit state unavailable, treating as closed");
                true
            }
        }
    }

    /// Counts one failure and trips the breaker when `threshold` is reached.
    ///
    /// Tripping writes the open marker for `cooldown` and resets the counter.
    pub async fn record_failure(&self, provider: Provider, threshold: u32, cooldown: Duration) {
        let count = match self
            .store
            .increment(&failures_key(provider), Some(self.policy.window))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "failed to record provider failure");
                return;
            }
        };

        tracing::debug!(provider = %provider, failures = count, threshold, "provider failure recorded");
        if count < i64::from(threshold) {
            return;
        }

        let until = expiry_after(self.clock.now(), cooldown);
        if let Err(e) = self
            .store
            .set(&open_key(provider), &until.to_rfc3339(), Some(cooldown))
            .await
        {
            tracing::warn!(provider = %provider, error = %e, "failed to open circuit");
            return;
        }
        if let Err(e) = self.store.delete(&failures_key(provider)).await {
            tracing::warn!(provider = %provider, error = %e, "failed to reset failure counter");
        }
        tracing::warn!(
            provider = %provider,
            failures = count,
            opened_until = %until,
            "circuit opened"
        );
    }

    /// [`Self::record_failure`] with the configured policy.
    pub async fn record_failure_with_policy(&self, provider: Provider) {
        self.record_failure(provider, self.policy.threshold, self.policy.cooldown)
            .await;
    }

    /// Clears the failure counter. An open breaker stays open until its
    /// cooldown lapses.
    pub async fn record_success(&self, provider: Provider) {
        if let Err(e) = self.store.delete(&failures_key(provider)).await {
            tracing::warn!(provider = %provider, error = %e, "failed to clear failure counter");
        }
    }

    /// Reads the breaker state for status output.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn state(
        &self,
        provider: Provider,
    ) -> Result<ProviderCircuit, crate::error::CoordError> {
        let now = self.clock.now();
        let opened_until = self
            .store
            .get(&open_key(provider))
            .await?
            .as_deref()
            .and_then(parse_instant)
            .filter(|until| *until > now);
        let failure_count = self
            .store
            .get(&failures_key(provider))
            .await?
            .and_then(|raw| raw.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(ProviderCircuit {
            provider,
            state: if opened_until.is_some() {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            failure_count,
            opened_until,
        })
    }
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn failures_key(provider: Provider) -> String {
    format!("circuit:{provider}:failures")
}

fn open_key(provider: Provider) -> String {
    format!("circuit:{provider}:open")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryStore;
    use crate::testing::UnreachableStore;

    fn breaker() -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (
            CircuitBreaker::new(store, CircuitPolicy::default()).with_clock(clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn trips_at_threshold_and_recovers_after_cooldown() {
        let (breaker, clock) = breaker();
        let cooldown = Duration::from_secs(1800);

        breaker.record_failure(Provider::NewswireA, 3, cooldown).await;
        breaker.record_failure(Provider::NewswireA, 3, cooldown).await;
        assert!(breaker.is_available(Provider::NewswireA).await);

        breaker.record_failure(Provider::NewswireA, 3, cooldown).await;
        assert!(!breaker.is_available(Provider::NewswireA).await);

        clock.advance(Duration::from_secs(1799));
        assert!(!breaker.is_available(Provider::NewswireA).await);

        clock.advance(Duration::from_secs(2));
        assert!(breaker.is_available(Provider::NewswireA).await);
    }

    #[tokio::test]
    async fn success_does_not_close_an_open_breaker() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            breaker.record_failure_with_policy(Provider::NewswireB).await;
        }
        breaker.record_success(Provider::NewswireB).await;
        assert!(!breaker.is_available(Provider::NewswireB).await);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let (breaker, _) = breaker();
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        breaker.record_success(Provider::NewswireA).await;
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        assert!(breaker.is_available(Provider::NewswireA).await);

        let state = breaker.state(Provider::NewswireA).await.unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 1);
    }

    #[tokio::test]
    async fn failures_outside_the_window_do_not_accumulate() {
        let (breaker, clock) = breaker();
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        clock.advance(Duration::from_secs(601));
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        assert!(breaker.is_available(Provider::NewswireA).await);
    }

    #[tokio::test]
    async fn breakers_are_independent_per_provider() {
        let (breaker, _) = breaker();
        for _ in 0..3 {
            breaker.record_failure_with_policy(Provider::NewswireA).await;
        }
        assert!(!breaker.is_available(Provider::NewswireA).await);
        assert!(breaker.is_available(Provider::NewswireB).await);

        let state = breaker.state(Provider::NewswireA).await.unwrap();
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.failure_count, 0);
        assert!(state.opened_until.is_some());
    }

    #[tokio::test]
    async fn unreachable_store_means_available() {
        let breaker = CircuitBreaker::new(Arc::new(UnreachableStore::new()), CircuitPolicy::default());
        breaker.record_failure_with_policy(Provider::NewswireA).await;
        assert!(breaker.is_available(Provider::NewswireA).await);
        assert!(breaker.state(Provider::NewswireA).await.is_err());
    }
}
