//! Provider fallback, merge and breaker reporting.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use newsgate_coord::{CircuitBreaker, CircuitPolicy, CircuitState, MemoryStore};
use newsgate_core::Provider;
use newsgate_ingest::testing::{candidate, StubAdapter};
use newsgate_ingest::FetchOrchestrator;
use newsgate_providers::{FetchError, FetchParams, ProviderAdapter, ProviderError, SchemaError};

fn params() -> FetchParams {
    FetchParams {
        region: "us".to_string(),
        topic: "world".to_string(),
        language: "en".to_string(),
        max_results: 10,
    }
}

fn shared(adapter: &Arc<StubAdapter>) -> Arc<dyn ProviderAdapter> {
    adapter.clone()
}

fn breaker() -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        Arc::new(MemoryStore::new()),
        CircuitPolicy::default(),
    ))
}

fn transient(provider: Provider) -> FetchError {
    FetchError::Transient {
        provider,
        source: ProviderError::Status {
            status: 503,
            body: String::new(),
        },
    }
}

#[tokio::test]
async fn under_yielding_primary_is_merged_with_secondary() {
    let primary = Arc::new(StubAdapter::new(Provider::NewswireA).returning("a.example", 1));
    // Seven new stories plus one the primary already returned.
    let mut secondary_articles: Vec<_> = (0..7)
        .map(|n| candidate(Provider::NewswireB, &format!("https://b.example/story-{n}")))
        .collect();
    secondary_articles.push(candidate(Provider::NewswireB, "https://a.example/story-0"));
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB).then(Ok(secondary_articles)));

    let orchestrator = FetchOrchestrator::new(primary.clone(), Some(shared(&secondary)), breaker());
    let report = orchestrator.fetch(&params()).await;

    assert!(report.articles.len() <= 9);
    assert_eq!(report.articles.len(), 8);
    let urls: HashSet<_> = report.articles.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(urls.len(), report.articles.len());
    // Primary results come first.
    assert_eq!(report.articles[0].provider, Provider::NewswireA);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn sufficient_primary_skips_secondary() {
    let primary = Arc::new(StubAdapter::new(Provider::NewswireA).returning("a.example", 5));
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB).returning("b.example", 5));

    let orchestrator = FetchOrchestrator::new(primary, Some(shared(&secondary)), breaker());
    let report = orchestrator.fetch(&params()).await;

    assert_eq!(report.articles.len(), 5);
    assert_eq!(secondary.calls(), 0);
    assert_eq!(report.outcomes.len(), 1);
}

#[tokio::test]
async fn open_primary_circuit_goes_straight_to_secondary() {
    let breaker = breaker();
    breaker
        .record_failure(Provider::NewswireA, 1, Duration::from_secs(600))
        .await;
    let primary = Arc::new(StubAdapter::new(Provider::NewswireA).returning("a.example", 5));
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB).returning("b.example", 3));

    let orchestrator = FetchOrchestrator::new(primary.clone(), Some(shared(&secondary)), breaker);
    let report = orchestrator.fetch(&params()).await;

    assert_eq!(primary.calls(), 0);
    assert_eq!(report.articles.len(), 3);
    assert!(matches!(
        report.outcomes[0].error,
        Some(FetchError::ProviderUnavailable {
            provider: Provider::NewswireA
        })
    ));
}

#[tokio::test]
async fn transient_failures_trip_the_breaker() {
    let breaker = breaker();
    let primary = Arc::new(
        StubAdapter::new(Provider::NewswireA)
            .then(Err(transient(Provider::NewswireA)))
            .then(Err(transient(Provider::NewswireA)))
            .then(Err(transient(Provider::NewswireA))),
    );
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB));
    let orchestrator =
        FetchOrchestrator::new(primary.clone(), Some(shared(&secondary)), Arc::clone(&breaker));

    for _ in 0..3 {
        orchestrator.fetch(&params()).await;
    }
    assert!(!breaker.is_available(Provider::NewswireA).await);

    orchestrator.fetch(&params()).await;
    assert_eq!(primary.calls(), 3);
}

fn malformed(provider: Provider) -> FetchError {
    FetchError::Schema {
        provider,
        source: SchemaError {
            provider,
            reason: "expected value at line 1 column 1".to_string(),
        },
    }
}

#[tokio::test]
async fn malformed_responses_count_against_provider() {
    let breaker = breaker();
    let primary = Arc::new(
        StubAdapter::new(Provider::NewswireA)
            .then(Err(transient(Provider::NewswireA)))
            .then(Err(transient(Provider::NewswireA)))
            .then(Err(malformed(Provider::NewswireA))),
    );
    let orchestrator = FetchOrchestrator::new(primary, None, Arc::clone(&breaker));

    orchestrator.fetch(&params()).await;
    orchestrator.fetch(&params()).await;
    let state = breaker.state(Provider::NewswireA).await.unwrap();
    assert_eq!(state.failure_count, 2);

    let report = orchestrator.fetch(&params()).await;
    assert!(report.articles.is_empty());
    assert!(matches!(
        report.outcomes[0].error,
        Some(FetchError::Schema { .. })
    ));

    let state = breaker.state(Provider::NewswireA).await.unwrap();
    assert_eq!(state.state, CircuitState::Open);
    assert!(!breaker.is_available(Provider::NewswireA).await);
}

#[tokio::test]
async fn key_exhaustion_does_not_count_against_provider() {
    let breaker = breaker();
    let no_keys = || {
        Err(FetchError::NoKeysAvailable {
            provider: Provider::NewswireA,
        })
    };
    let primary = Arc::new(
        StubAdapter::new(Provider::NewswireA)
            .then(no_keys())
            .then(no_keys())
            .then(no_keys()),
    );
    let orchestrator = FetchOrchestrator::new(primary, None, Arc::clone(&breaker));

    for _ in 0..3 {
        let report = orchestrator.fetch(&params()).await;
        assert!(report.articles.is_empty());
    }
    assert!(breaker.is_available(Provider::NewswireA).await);
}

#[tokio::test]
async fn parallel_mode_discards_secondary_when_primary_suffices() {
    let primary = Arc::new(StubAdapter::new(Provider::NewswireA).returning("a.example", 3));
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB).returning("b.example", 4));

    let orchestrator = FetchOrchestrator::new(primary, Some(shared(&secondary)), breaker())
        .with_parallel_fallback(true);
    let report = orchestrator.fetch(&params()).await;

    assert_eq!(secondary.calls(), 1);
    assert_eq!(report.articles.len(), 3);
    let secondary_outcome = &report.outcomes[1];
    assert_eq!(secondary_outcome.fetched, 4);
    assert!(!secondary_outcome.used);
}

#[tokio::test]
async fn parallel_mode_merges_when_primary_under_yields() {
    let primary = Arc::new(StubAdapter::new(Provider::NewswireA).returning("a.example", 1));
    let secondary = Arc::new(StubAdapter::new(Provider::NewswireB).returning("b.example", 4));

    let orchestrator = FetchOrchestrator::new(primary, Some(shared(&secondary)), breaker())
        .with_parallel_fallback(true);
    let report = orchestrator.fetch(&params()).await;

    assert_eq!(report.articles.len(), 5);
    assert!(report.outcomes.iter().all(|o| o.used));
}
