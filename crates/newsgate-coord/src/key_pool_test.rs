use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::clock::ManualClock;
use crate::memory::MemoryStore;
use crate::testing::UnreachableStore;

fn keys() -> Vec<String> {
    vec!["key-a".to_string(), "key-b".to_string(), "key-c".to_string()]
}

fn pool_on(store: Arc<dyn CoordinationStore>, clock: Arc<ManualClock>) -> KeyPool {
    KeyPool::new(store, KeyPoolSettings::default())
        .with_clock(clock)
        .with_keys(Provider::NewswireA, keys())
}

fn shared_store() -> (Arc<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    (Arc::new(MemoryStore::with_clock(clock.clone())), clock)
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}")]
struct FakeError {
    kind: FailureKind,
}

impl KeyedFailure for FakeError {
    fn failure_kind(&self) -> FailureKind {
        self.kind
    }
}

#[tokio::test]
async fn acquire_prefers_configured_order() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock);
    let key = pool.acquire(Provider::NewswireA).await.unwrap();
    assert_eq!(key.value, "key-a");
    assert_eq!(key.provider, Provider::NewswireA);
}

#[tokio::test]
async fn cooling_key_is_skipped_until_cooldown_elapses() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock.clone());

    let a = pool.acquire(Provider::NewswireA).await.unwrap();
    pool.report_failure(&a, true).await;

    for _ in 0..3 {
        let next = pool.acquire(Provider::NewswireA).await.unwrap();
        assert_eq!(next.value, "key-b", "B must be chosen before C while A cools");
    }

    clock.advance(Duration::from_secs(599));
    assert_eq!(pool.acquire(Provider::NewswireA).await.unwrap().value, "key-b");

    clock.advance(Duration::from_secs(2));
    assert_eq!(pool.acquire(Provider::NewswireA).await.unwrap().value, "key-a");
}

#[tokio::test]
async fn cooldown_is_visible_to_another_pool_on_the_same_store() {
    let (store, clock) = shared_store();
    let first = pool_on(store.clone(), clock.clone());
    let second = pool_on(store, clock);

    let a = first.acquire(Provider::NewswireA).await.unwrap();
    first.report_failure(&a, true).await;

    assert_eq!(second.acquire(Provider::NewswireA).await.unwrap().value, "key-b");
}

#[tokio::test]
async fn error_threshold_is_shared_across_pools() {
    let (store, clock) = shared_store();
    let first = pool_on(store.clone(), clock.clone());
    let second = pool_on(store.clone(), clock);

    let a = first.acquire(Provider::NewswireA).await.unwrap();
    for _ in 0..3 {
        first.report_failure(&a, false).await;
    }
    second.report_failure(&a, false).await;
    assert_eq!(first.acquire(Provider::NewswireA).await.unwrap().value, "key-a");

    second.report_failure(&a, false).await;
    assert_eq!(first.acquire(Provider::NewswireA).await.unwrap().value, "key-b");

    let id = key_id(Provider::NewswireA, "key-a");
    assert_eq!(store.get(&errors_key(&id)).await.unwrap(), None);
}

#[tokio::test]
async fn success_clears_error_counter_but_not_cooldown() {
    let (store, clock) = shared_store();
    let pool = pool_on(store.clone(), clock);

    let a = pool.acquire(Provider::NewswireA).await.unwrap();
    pool.report_failure(&a, false).await;
    pool.report_failure(&a, false).await;
    pool.report_success(&a).await;

    let id = key_id(Provider::NewswireA, "key-a");
    assert_eq!(store.get(&errors_key(&id)).await.unwrap(), None);

    pool.report_unauthorized(&a).await;
    pool.report_success(&a).await;
    assert_eq!(pool.acquire(Provider::NewswireA).await.unwrap().value, "key-b");
}

#[tokio::test]
async fn exhausted_pool_reports_no_keys() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock);
    for _ in 0..3 {
        let key = pool.acquire(Provider::NewswireA).await.unwrap();
        pool.report_unauthorized(&key).await;
    }
    assert_eq!(
        pool.acquire(Provider::NewswireA).await.unwrap_err(),
        KeyPoolError::NoKeysAvailable {
            provider: Provider::NewswireA
        }
    );
}

#[tokio::test]
async fn provider_without_keys_reports_no_keys() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock);
    assert!(pool.acquire(Provider::NewswireB).await.is_err());
}

#[tokio::test]
async fn store_down_falls_back_to_local_cache() {
    let clock = Arc::new(ManualClock::default());
    let pool = pool_on(Arc::new(UnreachableStore::new()), clock);

    let a = pool.acquire(Provider::NewswireA).await.unwrap();
    assert_eq!(a.value, "key-a");

    pool.report_failure(&a, true).await;
    assert_eq!(pool.acquire(Provider::NewswireA).await.unwrap().value, "key-b");
}

#[tokio::test]
async fn sync_and_snapshot_reflect_store_state() {
    let (store, clock) = shared_store();
    let first = pool_on(store.clone(), clock.clone());
    let second = pool_on(store, clock.clone());

    let a = first.acquire(Provider::NewswireA).await.unwrap();
    first.report_failure(&a, true).await;
    let b = first.acquire(Provider::NewswireA).await.unwrap();
    first.report_failure(&b, false).await;

    let snapshot = second.snapshot(Provider::NewswireA).await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert!(snapshot[0].is_cooling(clock.now()));
    assert!(!snapshot[1].is_cooling(clock.now()));
    assert_eq!(snapshot[1].consecutive_errors, 1);
    assert_eq!(snapshot[2].position, 2);
    assert_eq!(snapshot[2].fingerprint.len(), 16);
}

#[tokio::test]
async fn snapshot_fails_when_store_is_down() {
    let pool = pool_on(
        Arc::new(UnreachableStore::new()),
        Arc::new(ManualClock::default()),
    );
    assert!(pool.snapshot(Provider::NewswireA).await.is_err());
}

#[tokio::test]
async fn call_with_keys_rotates_past_rate_limited_key() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock);
    let calls = AtomicU32::new(0);

    let result = pool
        .call_with_keys(Provider::NewswireA, |key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if key.value == "key-a" {
                    Err(FakeError {
                        kind: FailureKind::RateLimited,
                    })
                } else {
                    Ok(key.value)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, "key-b");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pool.acquire(Provider::NewswireA).await.unwrap().value, "key-b");
}

#[tokio::test]
async fn call_with_keys_is_bounded_by_key_count() {
    let (store, clock) = shared_store();
    let pool = pool_on(store, clock);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = pool
        .call_with_keys(Provider::NewswireA, |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    kind: FailureKind::Unauthorized,
                })
            }
        })
        .await;

    assert!(matches!(
        result,
        Err(KeyedCallError::Keys(KeyPoolError::NoKeysAvailable { .. }))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn call_with_keys_returns_transient_without_rotating() {
    let (store, clock) = shared_store();
    let pool = pool_on(store.clone(), clock);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = pool
        .call_with_keys(Provider::NewswireA, |_key| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeError {
                    kind: FailureKind::Transient,
                })
            }
        })
        .await;

    assert!(matches!(result, Err(KeyedCallError::Call(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let id = key_id(Provider::NewswireA, "key-a");
    assert_eq!(store.get(&errors_key(&id)).await.unwrap().as_deref(), Some("1"));
}

#[test]
fn api_key_debug_hides_the_secret() {
    let key = ApiKey {
        value: "super-secret".to_string(),
        provider: Provider::Analysis,
        consecutive_errors: 0,
        cooldown_until: None,
    };
    assert!(!format!("{key:?}").contains("super-secret"));
}
