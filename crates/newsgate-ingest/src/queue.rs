//! Hand-off of accepted candidates to the job queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use newsgate_core::{AnalysisMode, AppConfig, CandidateArticle, Category, JobOptions, JobQueue, NewJob};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::gatekeeper::Classification;

pub const FETCH_CYCLE_JOB: &str = "fetch-cycle";
pub const ANALYZE_ARTICLE_JOB: &str = "analyze-article";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchCyclePayload {
    pub requested_at: DateTime<Utc>,
}

/// Everything the analysis job needs; the candidate travels whole so the
/// consumer never re-fetches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeArticlePayload {
    pub candidate: CandidateArticle,
    pub mode: AnalysisMode,
    pub category: Category,
}

impl AnalyzeArticlePayload {
    #[must_use]
    pub fn new(candidate: CandidateArticle, classification: &Classification) -> Self {
        Self {
            candidate,
            mode: classification.recommended_profile,
            category: classification.category,
        }
    }
}

pub struct IngestionQueue {
    jobs: Arc<dyn JobQueue>,
    options: JobOptions,
}

impl IngestionQueue {
    #[must_use]
    pub fn new(jobs: Arc<dyn JobQueue>, options: JobOptions) -> Self {
        Self { jobs, options }
    }

    #[must_use]
    pub fn from_app_config(jobs: Arc<dyn JobQueue>, config: &AppConfig) -> Self {
        Self::new(
            jobs,
            JobOptions {
                attempts: config.job_max_attempts.max(1),
                backoff_secs: config.job_backoff_secs,
            },
        )
    }

    /// Schedules one fetch cycle.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the payload cannot be encoded or the queue
    /// rejects the job.
    pub async fn enqueue_fetch_cycle(&self) -> Result<i64, QueueError> {
        let payload = FetchCyclePayload {
            requested_at: Utc::now(),
        };
        let id = self
            .jobs
            .enqueue(self.job(FETCH_CYCLE_JOB, &payload)?)
            .await
            .map_err(QueueError::Backend)?;
        tracing::info!(job_id = id, "fetch cycle enqueued");
        Ok(id)
    }

    /// Schedules analysis of one accepted candidate.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the payload cannot be encoded or the queue
    /// rejects the job.
    pub async fn enqueue_article(
        &self,
        candidate: CandidateArticle,
        classification: &Classification,
    ) -> Result<i64, QueueError> {
        let payload = AnalyzeArticlePayload::new(candidate, classification);
        self.jobs
            .enqueue(self.job(ANALYZE_ARTICLE_JOB, &payload)?)
            .await
            .map_err(QueueError::Backend)
    }

    /// Schedules analysis of a batch in one queue round trip.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if any payload cannot be encoded or the queue
    /// rejects the batch; in that case nothing was enqueued.
    pub async fn enqueue_articles(
        &self,
        batch: Vec<(CandidateArticle, Classification)>,
    ) -> Result<Vec<i64>, QueueError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let jobs = batch
            .into_iter()
            .map(|(candidate, classification)| {
                self.job(
                    ANALYZE_ARTICLE_JOB,
                    &AnalyzeArticlePayload::new(candidate, &classification),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.jobs
            .enqueue_batch(jobs)
            .await
            .map_err(QueueError::Backend)
    }

    fn job<P: Serialize>(&self, name: &str, payload: &P) -> Result<NewJob, QueueError> {
        Ok(NewJob {
            name: name.to_string(),
            payload: serde_json::to_value(payload)?,
            options: self.options,
        })
    }
}
