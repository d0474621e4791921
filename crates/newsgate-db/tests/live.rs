//! Live integration tests for newsgate-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness, so they need `DATABASE_URL` to point at a server
//! and are ignored by default. Run with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use newsgate_coord::CoordinationStore;
use newsgate_core::{
    AnalysisMode, AnalysisResult, AnalyzedArticle, ArticleStore, CandidateArticle, Category,
    FailureDisposition, JobOptions, JobQueue, NewJob, Provider,
};
use newsgate_db::{
    get_article_by_url, PgArticleStore, PgCoordinationStore, PgJobQueue, StaleJobs,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn analyzed(url: &str) -> AnalyzedArticle {
    AnalyzedArticle {
        candidate: CandidateArticle {
            title: "Central bank holds rates".to_string(),
            description: Some("Policy unchanged for a third meeting.".to_string()),
            url: url.to_string(),
            image_url: None,
            published_at: Some(Utc::now()),
            source_name: Some("Example Wire".to_string()),
            provider: Provider::NewswireA,
        },
        analysis: AnalysisResult {
            category: Category::Business,
            bias_score: 0.1,
            credibility_score: 0.8,
            summary: "Rates held.".to_string(),
            key_points: vec!["No change".to_string()],
        },
        mode: AnalysisMode::Full,
        embedding: Some(vec![0.1, 0.2, 0.3]),
        analyzed_at: Utc::now(),
    }
}

fn job(name: &str, attempts: u32) -> NewJob {
    NewJob {
        name: name.to_string(),
        payload: serde_json::json!({"n": 1}),
        options: JobOptions {
            attempts,
            backoff_secs: 30,
        },
    }
}

// ---------------------------------------------------------------------------
// Coordination store
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn set_if_not_exists_has_a_single_winner(pool: sqlx::PgPool) {
    let store = Arc::new(PgCoordinationStore::new(pool));
    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .set_if_not_exists("dedup:claim:abc", &i.to_string(), Some(Duration::from_secs(300)))
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for h in handles {
        if h.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn expired_entries_are_invisible_and_reclaimable(pool: sqlx::PgPool) {
    let store = PgCoordinationStore::new(pool);
    store
        .set("k", "v", Some(Duration::from_millis(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.get("k").await.unwrap(), None);
    assert!(store.set_if_not_exists("k", "w", None).await.unwrap());
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("w"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn increment_counts_and_restarts_after_expiry(pool: sqlx::PgPool) {
    let store = PgCoordinationStore::new(pool);
    let ttl = Some(Duration::from_millis(50));
    assert_eq!(store.increment("c", ttl).await.unwrap(), 1);
    assert_eq!(store.increment("c", ttl).await.unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.increment("c", ttl).await.unwrap(), 1);

    store.delete("c").await.unwrap();
    assert_eq!(store.get("c").await.unwrap(), None);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn purge_expired_removes_only_expired_rows(pool: sqlx::PgPool) {
    let store = PgCoordinationStore::new(pool);
    store.set("old", "1", Some(Duration::from_millis(1))).await.unwrap();
    store.set("forever", "1", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert_eq!(store.get("forever").await.unwrap().as_deref(), Some("1"));
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn insert_is_idempotent_per_url(pool: sqlx::PgPool) {
    let store = PgArticleStore::new(pool.clone());
    let article = analyzed("https://example.com/rates");

    assert!(store.insert(&article).await.unwrap());
    assert!(!store.insert(&article).await.unwrap());

    let row = get_article_by_url(&pool, "https://example.com/rates")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(row.category, "business");
    assert_eq!(row.analysis_mode, "full");
    assert_eq!(row.key_points.0, vec!["No change".to_string()]);
    assert_eq!(row.embedding.map(|e| e.len()), Some(3));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn exists_by_url_returns_stored_subset(pool: sqlx::PgPool) {
    let store = PgArticleStore::new(pool);
    store.insert(&analyzed("https://example.com/a")).await.unwrap();

    let urls = vec![
        "https://example.com/a".to_string(),
        "https://example.com/b".to_string(),
    ];
    let existing = store.exists_by_url(&urls).await.unwrap();
    assert_eq!(existing.len(), 1);
    assert!(existing.contains("https://example.com/a"));
    assert!(store.exists_by_url(&[]).await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn reserve_complete_lifecycle(pool: sqlx::PgPool) {
    let queue = PgJobQueue::new(pool);
    let id = queue.enqueue(job("fetch-cycle", 3)).await.unwrap();

    assert!(queue.reserve("analyze-article").await.unwrap().is_none());
    let reserved = queue.reserve("fetch-cycle").await.unwrap().unwrap();
    assert_eq!(reserved.id, id);
    assert_eq!(reserved.attempt, 1);
    assert!(queue.reserve("fetch-cycle").await.unwrap().is_none());

    queue.complete(id).await.unwrap();
    assert_eq!(queue.get_job(id).await.unwrap().status, "done");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn failing_job_backs_off_then_dies(pool: sqlx::PgPool) {
    let queue = PgJobQueue::new(pool.clone());
    let id = queue.enqueue(job("analyze-article", 2)).await.unwrap();

    queue.reserve("analyze-article").await.unwrap().unwrap();
    let first = queue.fail(id, "boom").await.unwrap();
    assert!(matches!(first, FailureDisposition::Retrying { run_at } if run_at > Utc::now()));
    // Backed off, so not yet runnable.
    assert!(queue.reserve("analyze-article").await.unwrap().is_none());

    sqlx::query("UPDATE jobs SET run_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    let again = queue.reserve("analyze-article").await.unwrap().unwrap();
    assert_eq!(again.attempt, 2);
    assert_eq!(queue.fail(id, "boom").await.unwrap(), FailureDisposition::Dead);
    assert_eq!(queue.get_job(id).await.unwrap().last_error.as_deref(), Some("boom"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn enqueue_batch_returns_ids_in_order(pool: sqlx::PgPool) {
    let queue = PgJobQueue::new(pool);
    let ids = queue
        .enqueue_batch(vec![job("analyze-article", 3), job("analyze-article", 3)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_running_jobs_are_requeued(pool: sqlx::PgPool) {
    let queue = PgJobQueue::new(pool.clone());
    let id = queue.enqueue(job("fetch-cycle", 3)).await.unwrap();
    queue.reserve("fetch-cycle").await.unwrap().unwrap();
    sqlx::query("UPDATE jobs SET locked_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let stale = queue.requeue_stale(Duration::from_secs(900)).await.unwrap();
    assert_eq!(stale, StaleJobs { requeued: 1, dead: 0 });
    assert_eq!(queue.get_job(id).await.unwrap().status, "queued");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn stale_job_on_its_last_attempt_is_parked_dead(pool: sqlx::PgPool) {
    let queue = PgJobQueue::new(pool.clone());
    let id = queue.enqueue(job("analyze-article", 1)).await.unwrap();
    queue.reserve("analyze-article").await.unwrap().unwrap();
    sqlx::query("UPDATE jobs SET locked_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let stale = queue.requeue_stale(Duration::from_secs(900)).await.unwrap();
    assert_eq!(stale, StaleJobs { requeued: 0, dead: 1 });

    let row = queue.get_job(id).await.unwrap();
    assert_eq!(row.status, "dead");
    assert!(row.locked_at.is_none());
    assert!(row.last_error.is_some());
    assert!(queue.reserve("analyze-article").await.unwrap().is_none());

    // Already dead, so a second sweep finds nothing.
    assert_eq!(
        queue.requeue_stale(Duration::from_secs(900)).await.unwrap(),
        StaleJobs::default()
    );
}
