use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::{expiry_after, Clock, SystemClock};
use crate::error::CoordError;
use crate::store::CoordinationStore;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`CoordinationStore`].
///
/// Coordinates tasks inside one process only, so it backs tests and the
/// in-memory doubles. Expiry follows the injected [`Clock`].
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.map(|ttl| expiry_after(self.clock.now(), ttl))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CoordError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        let now = self.clock.now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError> {
        let expires_at = self.expiry(ttl);
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CoordError> {
        let now = self.clock.now();
        let fresh_expiry = self.expiry(ttl);
        let mut entries = self.lock();

        let (current, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                let n = entry
                    .value
                    .parse::<i64>()
                    .map_err(|e| CoordError::Corrupt {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                (n, entry.expires_at)
            }
            _ => (0, fresh_expiry),
        };

        let next = current.saturating_add(1);
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), CoordError> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_if_not_exists_only_first_wins() {
        let (store, _) = store_with_clock();
        assert!(store.set_if_not_exists("k", "a", None).await.unwrap());
        assert!(!store.set_if_not_exists("k", "b", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_entry_can_be_claimed_again() {
        let (store, clock) = store_with_clock();
        let ttl = Some(Duration::from_secs(10));
        assert!(store.set_if_not_exists("k", "a", ttl).await.unwrap());
        clock.advance(Duration::from_secs(11));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_not_exists("k", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn increment_keeps_original_ttl() {
        let (store, clock) = store_with_clock();
        let ttl = Some(Duration::from_secs(60));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
        clock.advance(Duration::from_secs(40));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 2);
        // Window started at the first increment, not the second.
        clock.advance(Duration::from_secs(30));
        assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_value() {
        let (store, _) = store_with_clock();
        store.set("c", "nope", None).await.unwrap();
        assert!(matches!(
            store.increment("c", None).await,
            Err(CoordError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn delete_and_len() {
        let (store, _) = store_with_clock();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "1", None).await.unwrap();
        assert_eq!(store.len(), 2);
        store.delete("a").await.unwrap();
        assert_eq!(store.len(), 1);
        store.delete("missing").await.unwrap();
    }
}
