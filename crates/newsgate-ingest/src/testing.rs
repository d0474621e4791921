//! In-memory collaborators for tests and local dry runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsgate_coord::{Clock, SystemClock};
use newsgate_core::{
    retry_delay_secs, AnalysisMode, AnalysisResult, AnalyzedArticle, Analyzer, ArticleStore,
    CandidateArticle, Category, FailureDisposition, JobQueue, JunkVerdict, NewJob, Provider,
    QueuedJob,
};
use newsgate_providers::{FetchError, FetchParams, ProviderAdapter};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A candidate with a title long enough to pass the length check.
#[must_use]
pub fn candidate(provider: Provider, url: &str) -> CandidateArticle {
    CandidateArticle {
        title: format!("Report on {url}"),
        description: Some("A sufficiently descriptive summary of the story.".to_string()),
        url: url.to_string(),
        image_url: None,
        published_at: Some(Utc::now()),
        source_name: None,
        provider,
    }
}

// ---------------------------------------------------------------------------
// Article store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryArticleStore {
    articles: Mutex<HashMap<String, AnalyzedArticle>>,
    unavailable: AtomicBool,
}

impl MemoryArticleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.articles).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<AnalyzedArticle> {
        lock(&self.articles).get(url).cloned()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("article store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn exists_by_url(&self, urls: &[String]) -> anyhow::Result<HashSet<String>> {
        self.check()?;
        let articles = lock(&self.articles);
        Ok(urls
            .iter()
            .filter(|url| articles.contains_key(*url))
            .cloned()
            .collect())
    }

    async fn insert(&self, article: &AnalyzedArticle) -> anyhow::Result<bool> {
        self.check()?;
        let mut articles = lock(&self.articles);
        if articles.contains_key(&article.candidate.url) {
            return Ok(false);
        }
        articles.insert(article.candidate.url.clone(), article.clone());
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryJobStatus {
    Queued,
    Running,
    Done,
    Dead,
}

#[derive(Debug, Clone)]
pub struct MemoryJob {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: MemoryJobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff_secs: u64,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Job queue with the same attempt and backoff rules as the Postgres one.
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<MemoryJob>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes enqueue calls fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    #[must_use]
    pub fn jobs(&self) -> Vec<MemoryJob> {
        lock(&self.jobs).clone()
    }

    #[must_use]
    pub fn job(&self, id: i64) -> Option<MemoryJob> {
        lock(&self.jobs).iter().find(|j| j.id == id).cloned()
    }

    /// Jobs named `name` that are queued or running.
    #[must_use]
    pub fn pending(&self, name: &str) -> usize {
        lock(&self.jobs)
            .iter()
            .filter(|j| {
                j.name == name
                    && matches!(j.status, MemoryJobStatus::Queued | MemoryJobStatus::Running)
            })
            .count()
    }

    fn push(&self, jobs: &mut Vec<MemoryJob>, job: NewJob) -> i64 {
        let id = i64::try_from(jobs.len()).unwrap_or(i64::MAX) + 1;
        jobs.push(MemoryJob {
            id,
            name: job.name,
            payload: job.payload,
            status: MemoryJobStatus::Queued,
            attempts: 0,
            max_attempts: job.options.attempts.max(1),
            backoff_secs: job.options.backoff_secs,
            run_at: self.clock.now(),
            last_error: None,
        });
        id
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("job queue unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: NewJob) -> anyhow::Result<i64> {
        self.check()?;
        let mut jobs = lock(&self.jobs);
        Ok(self.push(&mut jobs, job))
    }

    async fn enqueue_batch(&self, batch: Vec<NewJob>) -> anyhow::Result<Vec<i64>> {
        self.check()?;
        let mut jobs = lock(&self.jobs);
        Ok(batch
            .into_iter()
            .map(|job| self.push(&mut jobs, job))
            .collect())
    }

    async fn reserve(&self, job_name: &str) -> anyhow::Result<Option<QueuedJob>> {
        let now = self.clock.now();
        let mut jobs = lock(&self.jobs);
        let Some(job) = jobs.iter_mut().find(|j| {
            j.name == job_name && j.status == MemoryJobStatus::Queued && j.run_at <= now
        }) else {
            return Ok(None);
        };
        job.status = MemoryJobStatus::Running;
        job.attempts += 1;
        Ok(Some(QueuedJob {
            id: job.id,
            name: job.name.clone(),
            payload: job.payload.clone(),
            attempt: job.attempts,
            max_attempts: job.max_attempts,
        }))
    }

    async fn complete(&self, job_id: i64) -> anyhow::Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == MemoryJobStatus::Running)
            .ok_or_else(|| anyhow!("job {job_id} is not running"))?;
        job.status = MemoryJobStatus::Done;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str) -> anyhow::Result<FailureDisposition> {
        let now = self.clock.now();
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == MemoryJobStatus::Running)
            .ok_or_else(|| anyhow!("job {job_id} is not running"))?;
        job.last_error = Some(error.to_string());
        if job.attempts >= job.max_attempts {
            job.status = MemoryJobStatus::Dead;
            return Ok(FailureDisposition::Dead);
        }
        let delay = retry_delay_secs(job.backoff_secs, job.attempts);
        let delay = chrono::Duration::seconds(i64::try_from(delay).unwrap_or(i64::MAX));
        job.run_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        job.status = MemoryJobStatus::Queued;
        Ok(FailureDisposition::Retrying { run_at: job.run_at })
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Scripted analyzer. Texts containing a registered junk marker are junk;
/// everything else is a full-depth general article.
#[derive(Default)]
pub struct StubAnalyzer {
    junk_markers: Vec<String>,
    classify_delay: Option<Duration>,
    fail_classify: AtomicBool,
    fail_analyze: AtomicBool,
    fail_embed: AtomicBool,
    classify_calls: AtomicUsize,
    analyze_calls: AtomicUsize,
}

impl StubAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn junk_when(mut self, marker: &str) -> Self {
        self.junk_markers.push(marker.to_lowercase());
        self
    }

    #[must_use]
    pub fn with_classify_delay(mut self, delay: Duration) -> Self {
        self.classify_delay = Some(delay);
        self
    }

    pub fn set_fail_classify(&self, fail: bool) {
        self.fail_classify.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_analyze(&self, fail: bool) {
        self.fail_analyze.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_embed(&self, fail: bool) {
        self.fail_embed.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    fn is_junk(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.junk_markers.iter().any(|m| lower.contains(m.as_str()))
    }
}

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn analyze(&self, text: &str, mode: AnalysisMode) -> anyhow::Result<AnalysisResult> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_analyze.load(Ordering::SeqCst) {
            bail!("analysis backend unavailable");
        }
        let key_points = match mode {
            AnalysisMode::Full => vec![text.lines().next().unwrap_or_default().to_string()],
            AnalysisMode::Basic => Vec::new(),
        };
        Ok(AnalysisResult {
            category: Category::General,
            bias_score: 0.0,
            credibility_score: 0.8,
            summary: text.chars().take(80).collect(),
            key_points,
        })
    }

    async fn classify(&self, text: &str) -> anyhow::Result<JunkVerdict> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.classify_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_classify.load(Ordering::SeqCst) {
            bail!("classifier unavailable");
        }
        let is_junk = self.is_junk(text);
        Ok(JunkVerdict {
            is_junk,
            category: if is_junk {
                Category::Lifestyle
            } else {
                Category::General
            },
            recommended_mode: if is_junk {
                AnalysisMode::Basic
            } else {
                AnalysisMode::Full
            },
        })
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if self.fail_embed.load(Ordering::SeqCst) {
            bail!("embedding backend unavailable");
        }
        #[allow(clippy::cast_precision_loss)]
        let len = text.len() as f32;
        Ok(vec![len, 1.0])
    }
}

// ---------------------------------------------------------------------------
// Provider adapter
// ---------------------------------------------------------------------------

/// Adapter that replays scripted responses, then returns no articles.
pub struct StubAdapter {
    provider: Provider,
    responses: Mutex<VecDeque<Result<Vec<CandidateArticle>, FetchError>>>,
    calls: AtomicUsize,
}

impl StubAdapter {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues a response returning `count` articles at `https://<host>/story-<n>`.
    #[must_use]
    pub fn returning(self, host: &str, count: usize) -> Self {
        let articles = (0..count)
            .map(|n| candidate(self.provider, &format!("https://{host}/story-{n}")))
            .collect();
        self.then(Ok(articles))
    }

    #[must_use]
    pub fn then(self, response: Result<Vec<CandidateArticle>, FetchError>) -> Self {
        lock(&self.responses).push_back(response);
        self
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for StubAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch_articles(
        &self,
        _params: &FetchParams,
    ) -> Result<Vec<CandidateArticle>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use newsgate_coord::ManualClock;
    use newsgate_core::JobOptions;

    use super::*;

    fn job(name: &str, attempts: u32) -> NewJob {
        NewJob {
            name: name.to_string(),
            payload: serde_json::json!({}),
            options: JobOptions {
                attempts,
                backoff_secs: 30,
            },
        }
    }

    #[tokio::test]
    async fn failed_job_backs_off_then_dies() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let queue = MemoryJobQueue::with_clock(clock.clone());
        let id = queue.enqueue(job("analyze-article", 2)).await.unwrap();

        let first = queue.reserve("analyze-article").await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        let disposition = queue.fail(id, "boom").await.unwrap();
        assert!(matches!(disposition, FailureDisposition::Retrying { .. }));

        // Not runnable until the backoff elapses.
        assert!(queue.reserve("analyze-article").await.unwrap().is_none());
        clock.advance(Duration::from_secs(31));
        let second = queue.reserve("analyze-article").await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);

        assert_eq!(
            queue.fail(id, "boom again").await.unwrap(),
            FailureDisposition::Dead
        );
        assert_eq!(queue.job(id).unwrap().status, MemoryJobStatus::Dead);
        assert_eq!(queue.job(id).unwrap().last_error.as_deref(), Some("boom again"));
    }

    #[tokio::test]
    async fn reserve_filters_by_name() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("fetch-cycle", 1)).await.unwrap();
        assert!(queue.reserve("analyze-article").await.unwrap().is_none());
        assert!(queue.reserve("fetch-cycle").await.unwrap().is_some());
        // Running jobs are not handed out twice.
        assert!(queue.reserve("fetch-cycle").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completing_an_unreserved_job_fails() {
        let queue = MemoryJobQueue::new();
        let id = queue.enqueue(job("fetch-cycle", 1)).await.unwrap();
        assert!(queue.complete(id).await.is_err());
    }

    #[tokio::test]
    async fn article_store_insert_is_idempotent() {
        let store = MemoryArticleStore::new();
        let article = AnalyzedArticle {
            candidate: candidate(Provider::NewswireA, "https://example.com/a"),
            analysis: AnalysisResult {
                category: Category::World,
                bias_score: 0.0,
                credibility_score: 1.0,
                summary: String::new(),
                key_points: Vec::new(),
            },
            mode: AnalysisMode::Basic,
            embedding: None,
            analyzed_at: Utc::now(),
        };
        assert!(store.insert(&article).await.unwrap());
        assert!(!store.insert(&article).await.unwrap());
        let found = store
            .exists_by_url(&["https://example.com/a".to_string(), "https://example.com/b".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
