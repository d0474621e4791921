//! Interfaces of the external collaborators the ingestion layer consumes.
//!
//! Implementations live in `newsgate-db` (Postgres) and `newsgate-analysis`
//! (AI client); in-memory doubles live in `newsgate-ingest::testing`.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisMode, AnalysisResult, AnalyzedArticle, JunkVerdict};

// ---------------------------------------------------------------------------
// AI analysis
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Full or basic analysis of article text.
    async fn analyze(&self, text: &str, mode: AnalysisMode) -> Result<AnalysisResult>;

    /// Classification-only call used by the gatekeeper.
    async fn classify(&self, text: &str) -> Result<JunkVerdict>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ---------------------------------------------------------------------------
// Persistent content store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Returns the subset of `urls` already stored. Always one round trip.
    async fn exists_by_url(&self, urls: &[String]) -> Result<HashSet<String>>;

    /// Inserts an analyzed article; returns `false` if the URL was already stored.
    async fn insert(&self, article: &AnalyzedArticle) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Total attempts including the first.
    pub attempts: u32,
    /// Base delay between attempts; doubles per failed attempt.
    pub backoff_secs: u64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub name: String,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    /// 1-based number of the attempt now running.
    pub attempt: u32,
    pub max_attempts: u32,
}

/// What the queue did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { run_at: DateTime<Utc> },
    Dead,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<i64>;

    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> Result<Vec<i64>>;

    /// Takes the next runnable job with `job_name`, if any, marking it running.
    async fn reserve(&self, job_name: &str) -> Result<Option<QueuedJob>>;

    async fn complete(&self, job_id: i64) -> Result<()>;

    async fn fail(&self, job_id: i64, error: &str) -> Result<FailureDisposition>;
}

/// Delay before the next attempt after `failed_attempts` failures.
#[must_use]
pub fn retry_delay_secs(backoff_secs: u64, failed_attempts: u32) -> u64 {
    let exponent = failed_attempts.saturating_sub(1).min(16);
    backoff_secs.saturating_mul(1u64 << exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        assert_eq!(retry_delay_secs(30, 1), 30);
        assert_eq!(retry_delay_secs(30, 2), 60);
        assert_eq!(retry_delay_secs(30, 3), 120);
    }

    #[test]
    fn retry_delay_saturates() {
        assert_eq!(retry_delay_secs(u64::MAX, 5), u64::MAX);
    }
}
