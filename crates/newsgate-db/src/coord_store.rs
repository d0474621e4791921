//! Postgres-backed [`CoordinationStore`].
//!
//! Each trait method is exactly one SQL statement so concurrent workers
//! observe the same atomicity as a single-threaded key/value server.
//! Expired rows are invisible to reads and are overwritten by writes;
//! [`PgCoordinationStore::purge_expired`] reclaims their space.

use std::time::Duration;

use async_trait::async_trait;
use newsgate_coord::{CoordError, CoordinationStore};
use sqlx::PgPool;

use crate::{ttl_secs, DbError};

#[derive(Debug, Clone)]
pub struct PgCoordinationStore {
    pool: PgPool,
}

impl PgCoordinationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes expired entries and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM coord_entries WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn unavailable(e: sqlx::Error) -> CoordError {
    CoordError::Unavailable(e.to_string())
}

#[async_trait]
impl CoordinationStore for PgCoordinationStore {
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, CoordError> {
        // The conflicting row is replaced only when it has expired; otherwise
        // no row is returned.
        let created = sqlx::query_scalar::<_, String>(
            "INSERT INTO coord_entries (key, value, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3::float8)) \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at \
             WHERE coord_entries.expires_at IS NOT NULL AND coord_entries.expires_at <= NOW() \
             RETURNING key",
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(created.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CoordError> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM coord_entries \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoordError> {
        sqlx::query(
            "INSERT INTO coord_entries (key, value, expires_at) \
             VALUES ($1, $2, NOW() + make_interval(secs => $3::float8)) \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CoordError> {
        // An expired counter restarts at 1 with a fresh TTL; a live one keeps
        // its original expiry.
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO coord_entries (key, value, expires_at) \
             VALUES ($1, '1', NOW() + make_interval(secs => $2::float8)) \
             ON CONFLICT (key) DO UPDATE \
             SET value = CASE \
                     WHEN coord_entries.expires_at IS NOT NULL AND coord_entries.expires_at <= NOW() \
                         THEN '1' \
                     ELSE (coord_entries.value::bigint + 1)::text \
                 END, \
                 expires_at = CASE \
                     WHEN coord_entries.expires_at IS NOT NULL AND coord_entries.expires_at <= NOW() \
                         THEN EXCLUDED.expires_at \
                     ELSE coord_entries.expires_at \
                 END \
             RETURNING value::bigint",
        )
        .bind(key)
        .bind(ttl_secs(ttl))
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<(), CoordError> {
        sqlx::query("DELETE FROM coord_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
