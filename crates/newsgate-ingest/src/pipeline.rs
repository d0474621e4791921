//! One fetch cycle, end to end.

use std::sync::Arc;

use newsgate_coord::{CircuitBreaker, CoordinationStore, FetchCycle, KeyPool};
use newsgate_core::{
    Analyzer, AppConfig, ArticleStore, CandidateArticle, FetchSlot, IngestFile, JobQueue,
    UrlCanonicalizer,
};
use newsgate_providers::{build_adapter, ClientSettings, FetchParams};

use crate::dedup::{DedupFilter, DedupSettings};
use crate::error::IngestError;
use crate::gatekeeper::{Classification, Gatekeeper, GatekeeperSettings};
use crate::orchestrator::{FetchOrchestrator, ProviderOutcome};
use crate::queue::IngestionQueue;

/// Shared collaborators a pipeline is assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CoordinationStore>,
    pub articles: Arc<dyn ArticleStore>,
    pub jobs: Arc<dyn JobQueue>,
    pub analyzer: Arc<dyn Analyzer>,
    pub key_pool: Arc<KeyPool>,
    pub breaker: Arc<CircuitBreaker>,
}

/// Counts for one completed cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: i64,
    pub slot: FetchSlot,
    pub providers: Vec<ProviderOutcome>,
    pub fetched: usize,
    /// Unseen candidates whose claim this worker won.
    pub claimed: usize,
    /// Claimed candidates not yet in the article store.
    pub fresh: usize,
    pub rejected: usize,
    pub enqueued: usize,
}

pub struct IngestionPipeline {
    rotation: Vec<FetchSlot>,
    cycle: FetchCycle,
    orchestrator: FetchOrchestrator,
    dedup: Arc<DedupFilter>,
    gatekeeper: Gatekeeper,
    queue: IngestionQueue,
}

impl IngestionPipeline {
    #[must_use]
    pub fn new(
        rotation: Vec<FetchSlot>,
        cycle: FetchCycle,
        orchestrator: FetchOrchestrator,
        dedup: Arc<DedupFilter>,
        gatekeeper: Gatekeeper,
        queue: IngestionQueue,
    ) -> Self {
        Self {
            rotation,
            cycle,
            orchestrator,
            dedup,
            gatekeeper,
            queue,
        }
    }

    /// Wires the configured providers and filters around `collab`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if a provider client cannot be built or the
    /// junk keyword pattern does not compile.
    pub fn from_app_config(
        config: &AppConfig,
        ingest: &IngestFile,
        collab: &Collaborators,
    ) -> Result<Self, IngestError> {
        let settings =
            ClientSettings::from_app_config(config, UrlCanonicalizer::new(&ingest.query_domains));
        let primary = build_adapter(
            config.primary_provider,
            config,
            Arc::clone(&collab.key_pool),
            settings.clone(),
        )?;
        let secondary = build_adapter(
            config.secondary_provider,
            config,
            Arc::clone(&collab.key_pool),
            settings,
        )?;

        let orchestrator =
            FetchOrchestrator::new(primary, Some(secondary), Arc::clone(&collab.breaker))
                .configured(config);
        let dedup = Arc::new(DedupFilter::new(
            Arc::clone(&collab.store),
            Arc::clone(&collab.articles),
            DedupSettings::from_app_config(config),
        ));
        let gatekeeper = Gatekeeper::new(
            Arc::clone(&collab.store),
            Arc::clone(&collab.analyzer),
            ingest,
            GatekeeperSettings::from_app_config(config),
        )?;

        Ok(Self::new(
            ingest.slots.clone(),
            FetchCycle::new(Arc::clone(&collab.store)),
            orchestrator,
            dedup,
            gatekeeper,
            IngestionQueue::from_app_config(Arc::clone(&collab.jobs), config),
        ))
    }

    #[must_use]
    pub fn dedup(&self) -> Arc<DedupFilter> {
        Arc::clone(&self.dedup)
    }

    #[must_use]
    pub fn queue(&self) -> &IngestionQueue {
        &self.queue
    }

    /// Advances the global cycle counter, fetches its rotation slot and
    /// enqueues every candidate that survives dedup and the gatekeeper.
    ///
    /// Provider failures are not errors; they are reported per provider.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::EmptyRotation`] without a rotation, or
    /// [`IngestError::Queue`] if accepted candidates could not be enqueued.
    /// Their claims are released first so a later cycle can retry them.
    pub async fn run_cycle(&self) -> Result<CycleReport, IngestError> {
        if self.rotation.is_empty() {
            return Err(IngestError::EmptyRotation);
        }
        let position = self.cycle.advance(self.rotation.len()).await;
        let slot = self
            .rotation
            .get(position.index)
            .cloned()
            .ok_or(IngestError::EmptyRotation)?;
        tracing::info!(
            cycle = position.cycle,
            region = %slot.region,
            topic = %slot.topic,
            "fetch cycle started"
        );

        let fetch = self.orchestrator.fetch(&FetchParams::from(&slot)).await;
        let fetched = fetch.articles.len();

        let claimed = self.dedup.claim_unseen(fetch.articles).await;
        let claimed_count = claimed.len();
        let fresh = self.dedup.filter_existing_in_store(claimed).await;
        let fresh_count = fresh.len();

        let (accepted, rejected): (Vec<_>, Vec<_>) = self
            .gatekeeper
            .classify_batch(fresh)
            .await
            .into_iter()
            .partition(|(_, classification)| !classification.is_junk);

        let accepted_candidates: Vec<CandidateArticle> =
            accepted.iter().map(|(c, _)| c.clone()).collect();
        let enqueued = match self.queue.enqueue_articles(accepted).await {
            Ok(ids) => ids.len(),
            Err(e) => {
                tracing::error!(cycle = position.cycle, error = %e, "failed to enqueue accepted candidates");
                self.dedup.release(&accepted_candidates).await;
                return Err(e.into());
            }
        };
        self.dedup.mark_seen(&accepted_candidates).await;

        let report = CycleReport {
            cycle: position.cycle,
            slot,
            providers: fetch.outcomes,
            fetched,
            claimed: claimed_count,
            fresh: fresh_count,
            rejected: rejected.len(),
            enqueued,
        };
        log_rejections(&rejected);
        tracing::info!(
            cycle = report.cycle,
            fetched = report.fetched,
            claimed = report.claimed,
            fresh = report.fresh,
            rejected = report.rejected,
            enqueued = report.enqueued,
            "fetch cycle complete"
        );
        Ok(report)
    }
}

fn log_rejections(rejected: &[(CandidateArticle, Classification)]) {
    for (candidate, classification) in rejected {
        tracing::debug!(url = %candidate.url, stage = ?classification.stage, "candidate rejected");
    }
}
