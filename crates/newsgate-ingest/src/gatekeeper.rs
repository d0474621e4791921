//! Two-stage junk filter.
//!
//! Stage 1 is free: ban list, junk keywords and a minimum text length.
//! Stage 2 asks the analysis collaborator, with cached decisions and a hard
//! timeout. AI junk verdicts add strikes to the source domain; enough
//! strikes within the window ban the domain permanently, so later articles
//! from it never reach stage 2.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use newsgate_coord::CoordinationStore;
use newsgate_core::{
    domain_of, url_hash, AnalysisMode, Analyzer, AppConfig, CandidateArticle, Category,
    IngestFile, JunkVerdict,
};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Which check produced a [`Classification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStage {
    Banned,
    Keyword,
    TooShort,
    Cached,
    Ai,
    /// The AI call failed or timed out; the safe default was used.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub is_junk: bool,
    pub recommended_profile: AnalysisMode,
    pub stage: GateStage,
}

impl Classification {
    fn junk(stage: GateStage) -> Self {
        Self {
            category: Category::General,
            is_junk: true,
            recommended_profile: AnalysisMode::Basic,
            stage,
        }
    }

    fn fallback() -> Self {
        Self {
            category: Category::General,
            is_junk: false,
            recommended_profile: AnalysisMode::Full,
            stage: GateStage::Fallback,
        }
    }

    fn from_verdict(verdict: &JunkVerdict) -> Self {
        Self {
            category: verdict.category,
            is_junk: verdict.is_junk,
            recommended_profile: verdict.recommended_mode,
            stage: GateStage::Ai,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatekeeperSettings {
    /// Shortest combined title + description worth classifying, in chars.
    pub min_text_len: usize,
    pub decision_ttl: Duration,
    pub strike_threshold: i64,
    pub strike_window: Duration,
    pub ai_timeout: Duration,
    /// Candidates classified at once by [`Gatekeeper::classify_batch`].
    pub concurrency: usize,
}

impl Default for GatekeeperSettings {
    fn default() -> Self {
        Self {
            min_text_len: 40,
            decision_ttl: Duration::from_secs(24 * 3600),
            strike_threshold: 5,
            strike_window: Duration::from_secs(24 * 3600),
            ai_timeout: Duration::from_secs(20),
            concurrency: 4,
        }
    }
}

impl GatekeeperSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            min_text_len: config.min_text_len,
            decision_ttl: Duration::from_secs(config.decision_ttl_secs),
            strike_threshold: i64::from(config.strike_threshold.max(1)),
            strike_window: Duration::from_secs(config.strike_window_secs),
            ai_timeout: Duration::from_secs(config.ai_timeout_secs),
            concurrency: config.classify_concurrency,
        }
    }
}

pub struct Gatekeeper {
    store: Arc<dyn CoordinationStore>,
    analyzer: Arc<dyn Analyzer>,
    seed_bans: HashSet<String>,
    junk_pattern: Option<Regex>,
    settings: GatekeeperSettings,
}

impl Gatekeeper {
    /// Builds a gatekeeper seeded with the ban list and junk keywords from
    /// the ingest file.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::JunkPattern`] if the keyword pattern cannot be
    /// compiled.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        analyzer: Arc<dyn Analyzer>,
        ingest: &IngestFile,
        settings: GatekeeperSettings,
    ) -> Result<Self, IngestError> {
        let junk_pattern = if ingest.junk_keywords.is_empty() {
            None
        } else {
            let alternation = ingest
                .junk_keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(
                RegexBuilder::new(&alternation)
                    .case_insensitive(true)
                    .build()?,
            )
        };

        Ok(Self {
            store,
            analyzer,
            seed_bans: ingest.banned_domains.iter().cloned().collect(),
            junk_pattern,
            settings,
        })
    }

    /// Classifies one candidate. Never fails: AI trouble yields the
    /// not-junk fallback.
    pub async fn classify(&self, candidate: &CandidateArticle) -> Classification {
        let domain = domain_of(&candidate.url);
        if let Some(domain) = domain.as_deref() {
            if self.is_banned(domain).await {
                tracing::debug!(url = %candidate.url, domain, "rejected: banned domain");
                return Classification::junk(GateStage::Banned);
            }
        }

        let text = candidate.combined_text();
        if self
            .junk_pattern
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(&text))
        {
            tracing::debug!(url = %candidate.url, "rejected: junk keyword");
            return Classification::junk(GateStage::Keyword);
        }
        if text.chars().count() < self.settings.min_text_len {
            tracing::debug!(url = %candidate.url, "rejected: text too short");
            return Classification::junk(GateStage::TooShort);
        }

        let decision_key = decision_key(&candidate.url);
        if let Some(cached) = self.cached_decision(&decision_key).await {
            return Classification {
                stage: GateStage::Cached,
                ..cached
            };
        }

        let verdict =
            match tokio::time::timeout(self.settings.ai_timeout, self.analyzer.classify(&text))
                .await
            {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(e)) => {
                    tracing::warn!(url = %candidate.url, error = %e, "AI classification failed, using fallback");
                    return Classification::fallback();
                }
                Err(_) => {
                    tracing::warn!(
                        url = %candidate.url,
                        timeout_secs = self.settings.ai_timeout.as_secs(),
                        "AI classification timed out, using fallback"
                    );
                    return Classification::fallback();
                }
            };

        let classification = Classification::from_verdict(&verdict);
        self.cache_decision(&decision_key, &classification).await;
        if verdict.is_junk {
            if let Some(domain) = domain.as_deref() {
                self.add_strike(domain).await;
            }
        }
        classification
    }

    /// Classifies `candidates` with bounded concurrency. Output order is
    /// completion order.
    pub async fn classify_batch(
        &self,
        candidates: Vec<CandidateArticle>,
    ) -> Vec<(CandidateArticle, Classification)> {
        stream::iter(candidates)
            .map(|candidate| async move {
                let classification = self.classify(&candidate).await;
                (candidate, classification)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    /// Whether `domain` (or a parent domain) is on the seed list or has been
    /// banned by the learning loop. A store error counts as not banned.
    pub async fn is_banned(&self, domain: &str) -> bool {
        if parent_domains(domain).any(|d| self.seed_bans.contains(d)) {
            return true;
        }
        match self.store.get(&ban_key(domain)).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::warn!(domain, error = %e, "ban list unavailable, using seed list only");
                false
            }
        }
    }

    async fn cached_decision(&self, key: &str) -> Option<Classification> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Classification>(&raw) {
                Ok(decision) => Some(decision),
                Err(e) => {
                    tracing::warn!(key, error = %e, "discarding unreadable cached decision");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "decision cache unavailable");
                None
            }
        }
    }

    async fn cache_decision(&self, key: &str, classification: &Classification) {
        let encoded = match serde_json::to_string(classification) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to encode decision");
                return;
            }
        };
        if let Err(e) = self
            .store
            .set(key, &encoded, Some(self.settings.decision_ttl))
            .await
        {
            tracing::warn!(key, error = %e, "failed to cache decision");
        }
    }

    async fn add_strike(&self, domain: &str) {
        let strikes_key = strikes_key(domain);
        let strikes = match self
            .store
            .increment(&strikes_key, Some(self.settings.strike_window))
            .await
        {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(domain, error = %e, "failed to record junk strike");
                return;
            }
        };
        if strikes < self.settings.strike_threshold {
            tracing::debug!(domain, strikes, "junk strike recorded");
            return;
        }

        if let Err(e) = self
            .store
            .set(&ban_key(domain), &Utc::now().to_rfc3339(), None)
            .await
        {
            tracing::warn!(domain, error = %e, "failed to write domain ban");
            return;
        }
        if let Err(e) = self.store.delete(&strikes_key).await {
            tracing::warn!(domain, error = %e, "failed to reset junk strikes");
        }
        tracing::info!(domain, strikes, "domain banned after repeated junk verdicts");
    }
}

/// `a.b.example.com`, `b.example.com`, `example.com`, `com`.
fn parent_domains(domain: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(domain), |d| d.split_once('.').map(|(_, rest)| rest))
}

fn decision_key(url: &str) -> String {
    format!("gate:decision:{}", url_hash(url))
}

fn strikes_key(domain: &str) -> String {
    format!("gate:strikes:{domain}")
}

fn ban_key(domain: &str) -> String {
    format!("gate:ban:{domain}")
}
