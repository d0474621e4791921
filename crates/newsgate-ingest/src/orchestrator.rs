//! Primary/secondary provider fallback for one fetch.

use std::collections::HashSet;
use std::sync::Arc;

use newsgate_coord::CircuitBreaker;
use newsgate_core::{AppConfig, CandidateArticle, Provider};
use newsgate_providers::{FetchError, FetchParams, ProviderAdapter};

/// What happened to one provider during a fetch.
#[derive(Debug)]
pub struct ProviderOutcome {
    pub provider: Provider,
    pub fetched: usize,
    /// Whether the provider's articles made it into the merged result.
    pub used: bool,
    pub error: Option<FetchError>,
}

impl ProviderOutcome {
    fn skipped(provider: Provider) -> Self {
        Self {
            provider,
            fetched: 0,
            used: false,
            error: Some(FetchError::ProviderUnavailable { provider }),
        }
    }
}

/// Merged, URL-deduplicated articles plus per-provider outcomes.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub articles: Vec<CandidateArticle>,
    pub outcomes: Vec<ProviderOutcome>,
}

impl FetchReport {
    fn merge(&mut self, articles: Vec<CandidateArticle>, seen: &mut HashSet<String>) {
        self.articles
            .extend(articles.into_iter().filter(|a| seen.insert(a.url.clone())));
    }
}

pub struct FetchOrchestrator {
    primary: Arc<dyn ProviderAdapter>,
    secondary: Option<Arc<dyn ProviderAdapter>>,
    breaker: Arc<CircuitBreaker>,
    min_yield: usize,
    parallel_fallback: bool,
}

impl FetchOrchestrator {
    #[must_use]
    pub fn new(
        primary: Arc<dyn ProviderAdapter>,
        secondary: Option<Arc<dyn ProviderAdapter>>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            primary,
            secondary,
            breaker,
            min_yield: 2,
            parallel_fallback: false,
        }
    }

    /// Fewest primary articles that make the secondary unnecessary.
    #[must_use]
    pub fn with_min_yield(mut self, min_yield: usize) -> Self {
        self.min_yield = min_yield;
        self
    }

    /// Query both providers at once when both are available.
    #[must_use]
    pub fn with_parallel_fallback(mut self, enabled: bool) -> Self {
        self.parallel_fallback = enabled;
        self
    }

    #[must_use]
    pub fn configured(self, config: &AppConfig) -> Self {
        self.with_min_yield(config.min_yield)
            .with_parallel_fallback(config.parallel_fallback)
    }

    /// Fetches from the primary and, when it is unavailable or under-yields,
    /// from the secondary. Never fails; provider errors land in the report.
    pub async fn fetch(&self, params: &FetchParams) -> FetchReport {
        let mut report = FetchReport::default();
        let mut seen = HashSet::new();

        let primary_available = self.breaker.is_available(self.primary.provider()).await;
        let secondary = match &self.secondary {
            Some(adapter) => Some((
                adapter,
                self.breaker.is_available(adapter.provider()).await,
            )),
            None => None,
        };

        if let (true, true, Some((secondary, true))) =
            (self.parallel_fallback, primary_available, secondary)
        {
            let (primary_result, secondary_result) = tokio::join!(
                self.call(&*self.primary, params),
                self.call(&**secondary, params)
            );
            let under_yield = self.record(&mut report, &mut seen, primary_result, true);
            self.record(&mut report, &mut seen, secondary_result, under_yield);
        } else {
            let under_yield = if primary_available {
                let result = self.call(&*self.primary, params).await;
                self.record(&mut report, &mut seen, result, true)
            } else {
                tracing::info!(provider = %self.primary.provider(), "primary circuit open, skipping");
                report
                    .outcomes
                    .push(ProviderOutcome::skipped(self.primary.provider()));
                true
            };

            if under_yield {
                match secondary {
                    Some((adapter, true)) => {
                        let result = self.call(&**adapter, params).await;
                        self.record(&mut report, &mut seen, result, true);
                    }
                    Some((adapter, false)) => {
                        tracing::info!(provider = %adapter.provider(), "secondary circuit open, skipping");
                        report
                            .outcomes
                            .push(ProviderOutcome::skipped(adapter.provider()));
                    }
                    None => {}
                }
            }
        }

        tracing::info!(
            region = %params.region,
            topic = %params.topic,
            articles = report.articles.len(),
            providers = report.outcomes.len(),
            "fetch complete"
        );
        report
    }

    /// Calls one provider and reports the outcome to its breaker.
    async fn call(
        &self,
        adapter: &dyn ProviderAdapter,
        params: &FetchParams,
    ) -> (Provider, Result<Vec<CandidateArticle>, FetchError>) {
        let provider = adapter.provider();
        let result = adapter.fetch_articles(params).await;
        match &result {
            Ok(articles) => {
                tracing::debug!(provider = %provider, count = articles.len(), "provider fetch ok");
                self.breaker.record_success(provider).await;
            }
            Err(e) if e.counts_against_provider() => {
                tracing::warn!(provider = %provider, error = %e, "provider fetch failed");
                self.breaker.record_failure_with_policy(provider).await;
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "provider fetch skipped");
            }
        }
        (provider, result)
    }

    /// Adds one provider's result to the report, merging its articles when
    /// `merge` is set. Returns whether the merged total is below `min_yield`.
    fn record(
        &self,
        report: &mut FetchReport,
        seen: &mut HashSet<String>,
        (provider, result): (Provider, Result<Vec<CandidateArticle>, FetchError>),
        merge: bool,
    ) -> bool {
        let outcome = match result {
            Ok(articles) => {
                let fetched = articles.len();
                if merge {
                    report.merge(articles, seen);
                }
                ProviderOutcome {
                    provider,
                    fetched,
                    used: merge,
                    error: None,
                }
            }
            Err(e) => ProviderOutcome {
                provider,
                fetched: 0,
                used: false,
                error: Some(e),
            },
        };
        report.outcomes.push(outcome);
        report.articles.len() < self.min_yield
    }
}
