use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoordError;

/// Shared key/value store with TTLs and atomic primitives.
///
/// Every method is a single atomic operation on the backend. Values are
/// plain strings; callers own their encoding. A `None` TTL means the entry
/// never expires.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Writes `value` only if `key` is absent (or expired). Returns `true`
    /// when this call created the entry.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CoordError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CoordError>;

    /// Unconditional write; replaces any existing value and TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError>;

    /// Atomically adds one to the integer at `key` and returns the new value.
    ///
    /// A missing or expired key starts from zero. `ttl` is applied only when
    /// the counter is created, so repeated increments do not extend it.
    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CoordError>;

    async fn delete(&self, key: &str) -> Result<(), CoordError>;
}
