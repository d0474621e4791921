//! Cross-process deduplication of fetched candidates.
//!
//! A candidate passes only if no worker has seen it recently, this worker
//! wins the short-lived claim on its URL, and the article store does not
//! already hold it. Seen markers are written once a candidate has been handed
//! to the queue and are never cleared.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use newsgate_coord::CoordinationStore;
use newsgate_core::{url_hash, AppConfig, ArticleStore, CandidateArticle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSettings {
    pub claim_ttl: Duration,
    pub seen_ttl: Duration,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            claim_ttl: Duration::from_secs(300),
            seen_ttl: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl DedupSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            claim_ttl: Duration::from_secs(config.claim_ttl_secs),
            seen_ttl: Duration::from_secs(config.seen_ttl_secs),
        }
    }
}

pub struct DedupFilter {
    store: Arc<dyn CoordinationStore>,
    articles: Arc<dyn ArticleStore>,
    settings: DedupSettings,
}

impl DedupFilter {
    #[must_use]
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        articles: Arc<dyn ArticleStore>,
        settings: DedupSettings,
    ) -> Self {
        Self {
            store,
            articles,
            settings,
        }
    }

    /// Keeps candidates that are unseen and whose claim this call won.
    ///
    /// Repeated URLs within `candidates` are collapsed first. If the store
    /// cannot be reached every candidate is let through.
    pub async fn claim_unseen(&self, candidates: Vec<CandidateArticle>) -> Vec<CandidateArticle> {
        let mut urls = HashSet::new();
        let unique: Vec<CandidateArticle> = candidates
            .into_iter()
            .filter(|c| urls.insert(c.url.clone()))
            .collect();

        let verdicts = join_all(unique.iter().map(|c| self.try_claim(c))).await;
        unique
            .into_iter()
            .zip(verdicts)
            .filter_map(|(candidate, won)| won.then_some(candidate))
            .collect()
    }

    /// Drops candidates the article store already holds, in one round trip.
    ///
    /// Dropped candidates get a seen marker so later cycles skip them
    /// without asking the store again. On store failure all are kept.
    pub async fn filter_existing_in_store(
        &self,
        candidates: Vec<CandidateArticle>,
    ) -> Vec<CandidateArticle> {
        if candidates.is_empty() {
            return candidates;
        }

        let urls: Vec<String> = candidates.iter().map(|c| c.url.clone()).collect();
        let existing = match self.articles.exists_by_url(&urls).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(error = %e, count = urls.len(), "article store check failed, keeping all candidates");
                return candidates;
            }
        };
        if existing.is_empty() {
            return candidates;
        }

        let (stored, fresh): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| existing.contains(&c.url));
        tracing::debug!(dropped = stored.len(), "candidates already in article store");
        self.mark_seen(&stored).await;
        fresh
    }

    /// Writes the long-lived seen marker for each candidate.
    pub async fn mark_seen(&self, candidates: &[CandidateArticle]) {
        let stamp = Utc::now().to_rfc3339();
        let writes = candidates.iter().map(|c| {
            let key = seen_key(&c.url);
            let stamp = stamp.as_str();
            async move {
                if let Err(e) = self
                    .store
                    .set_if_not_exists(&key, stamp, Some(self.settings.seen_ttl))
                    .await
                {
                    tracing::warn!(url = %c.url, error = %e, "failed to write seen marker");
                }
            }
        });
        join_all(writes).await;
    }

    /// Drops the claims on `candidates` so another cycle may pick them up.
    pub async fn release(&self, candidates: &[CandidateArticle]) {
        join_all(candidates.iter().map(|c| self.release_url(&c.url))).await;
    }

    pub async fn release_url(&self, url: &str) {
        if let Err(e) = self.store.delete(&claim_key(url)).await {
            tracing::warn!(url = %url, error = %e, "failed to release claim");
        }
    }

    async fn try_claim(&self, candidate: &CandidateArticle) -> bool {
        match self.store.get(&seen_key(&candidate.url)).await {
            Ok(Some(_)) => {
                tracing::debug!(url = %candidate.url, "already seen");
                return false;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "seen check unavailable, allowing candidate");
                return true;
            }
        }

        let stamp = Utc::now().to_rfc3339();
        match self
            .store
            .set_if_not_exists(
                &claim_key(&candidate.url),
                &stamp,
                Some(self.settings.claim_ttl),
            )
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(url = %candidate.url, "claimed by another worker");
                false
            }
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "claim unavailable, allowing candidate");
                true
            }
        }
    }
}

pub(crate) fn claim_key(url: &str) -> String {
    format!("dedup:claim:{}", url_hash(url))
}

pub(crate) fn seen_key(url: &str) -> String {
    format!("dedup:seen:{}", url_hash(url))
}
