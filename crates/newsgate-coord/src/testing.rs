//! Store doubles for exercising degraded-mode behaviour.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoordError;
use crate::store::CoordinationStore;

/// A store whose every operation fails, as if the backend were down.
#[derive(Debug, Default)]
pub struct UnreachableStore {
    calls: AtomicU64,
}

impl UnreachableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How many operations were attempted against the store.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, CoordError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoordError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl CoordinationStore for UnreachableStore {
    async fn set_if_not_exists(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> Result<bool, CoordError> {
        self.fail()
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CoordError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CoordError> {
        self.fail()
    }

    async fn increment(&self, _key: &str, _ttl: Option<Duration>) -> Result<i64, CoordError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<(), CoordError> {
        self.fail()
    }
}
