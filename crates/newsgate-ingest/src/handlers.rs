use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use newsgate_core::{AnalyzedArticle, Analyzer, ArticleStore, Category, QueuedJob};

use crate::dedup::DedupFilter;
use crate::error::IngestError;
use crate::pipeline::IngestionPipeline;
use crate::queue::{AnalyzeArticlePayload, ANALYZE_ARTICLE_JOB, FETCH_CYCLE_JOB};
use crate::worker::JobHandler;

/// Runs one [`IngestionPipeline`] cycle per `fetch-cycle` job.
pub struct FetchCycleHandler {
    pipeline: Arc<IngestionPipeline>,
}

impl FetchCycleHandler {
    #[must_use]
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl JobHandler for FetchCycleHandler {
    fn job_name(&self) -> &'static str {
        FETCH_CYCLE_JOB
    }

    async fn handle(&self, _job: &QueuedJob) -> anyhow::Result<()> {
        self.pipeline.run_cycle().await?;
        Ok(())
    }
}

/// Analyzes and stores one accepted candidate.
pub struct AnalyzeArticleHandler {
    analyzer: Arc<dyn Analyzer>,
    articles: Arc<dyn ArticleStore>,
    dedup: Arc<DedupFilter>,
}

impl AnalyzeArticleHandler {
    #[must_use]
    pub fn new(
        analyzer: Arc<dyn Analyzer>,
        articles: Arc<dyn ArticleStore>,
        dedup: Arc<DedupFilter>,
    ) -> Self {
        Self {
            analyzer,
            articles,
            dedup,
        }
    }
}

#[async_trait]
impl JobHandler for AnalyzeArticleHandler {
    fn job_name(&self) -> &'static str {
        ANALYZE_ARTICLE_JOB
    }

    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()> {
        let payload: AnalyzeArticlePayload = serde_json::from_value(job.payload.clone())
            .map_err(|source| IngestError::Payload {
                job: job.name.clone(),
                source,
            })?;
        let AnalyzeArticlePayload {
            candidate,
            mode,
            category,
        } = payload;

        let text = candidate.combined_text();
        let mut analysis = self
            .analyzer
            .analyze(&text, mode)
            .await
            .with_context(|| format!("analysis failed for {}", candidate.url))?;
        // The gatekeeper's label stands in when the analysis finds no topic.
        if analysis.category == Category::General {
            analysis.category = category;
        }

        // Embeddings are optional; a missing vector can be backfilled.
        let embedding = match self.analyzer.embed(&text).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "embedding failed, storing without vector");
                None
            }
        };

        let url = candidate.url.clone();
        let article = AnalyzedArticle {
            candidate,
            analysis,
            mode,
            embedding,
            analyzed_at: Utc::now(),
        };
        let inserted = self
            .articles
            .insert(&article)
            .await
            .with_context(|| format!("failed to store {url}"))?;
        if inserted {
            tracing::info!(url = %url, mode = mode.as_str(), "article stored");
        } else {
            tracing::debug!(url = %url, "article already stored");
        }

        let dedup = Arc::clone(&self.dedup);
        tokio::spawn(async move {
            dedup.release_url(&url).await;
        });
        Ok(())
    }
}
