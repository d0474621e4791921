use std::sync::Arc;
use std::time::Duration;

use newsgate_analysis::AiClient;
use newsgate_coord::{CircuitBreaker, CircuitPolicy, KeyPool};
use newsgate_core::{AppConfig, Provider};
use newsgate_db::{PgArticleStore, PgCoordinationStore, PgJobQueue};
use newsgate_ingest::{
    AnalyzeArticleHandler, Collaborators, FetchCycleHandler, IngestionPipeline, Worker,
};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: `RUST_LOG` if set, else the configured level.
///
/// # Errors
///
/// Returns an error if the configured level is not a valid filter directive.
pub fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}

/// Every long-lived component of one process, backed by Postgres.
pub struct Runtime {
    pub config: Arc<AppConfig>,
    pub pool: PgPool,
    pub coord: Arc<PgCoordinationStore>,
    pub jobs: Arc<PgJobQueue>,
    pub key_pool: Arc<KeyPool>,
    pub breaker: Arc<CircuitBreaker>,
    pub collab: Collaborators,
    pub pipeline: Arc<IngestionPipeline>,
}

impl Runtime {
    /// Assembles the components on an already-migrated pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingest file cannot be loaded or a provider or
    /// AI client cannot be built.
    pub async fn new(config: Arc<AppConfig>, pool: PgPool) -> anyhow::Result<Self> {
        let ingest = newsgate_core::load_ingest_file(&config.ingest_config_path)?;

        let coord = Arc::new(PgCoordinationStore::new(pool.clone()));
        let jobs = Arc::new(PgJobQueue::new(pool.clone()));
        let key_pool = Arc::new(KeyPool::from_app_config(coord.clone(), &config));
        for provider in [Provider::NewswireA, Provider::NewswireB, Provider::Analysis] {
            if key_pool.key_count(provider) == 0 {
                tracing::warn!(provider = %provider, "no API keys configured");
            }
            if let Err(e) = key_pool.sync(provider).await {
                tracing::warn!(provider = %provider, error = %e, "could not load shared key state");
            }
        }
        let breaker = Arc::new(CircuitBreaker::new(
            coord.clone(),
            CircuitPolicy::from_app_config(&config),
        ));
        let analyzer = Arc::new(AiClient::from_app_config(
            &config,
            Arc::clone(&key_pool),
            Arc::clone(&breaker),
        )?);

        let collab = Collaborators {
            store: coord.clone(),
            articles: Arc::new(PgArticleStore::new(pool.clone())),
            jobs: jobs.clone(),
            analyzer,
            key_pool: Arc::clone(&key_pool),
            breaker: Arc::clone(&breaker),
        };
        let pipeline = Arc::new(IngestionPipeline::from_app_config(
            &config, &ingest, &collab,
        )?);

        Ok(Self {
            config,
            pool,
            coord,
            jobs,
            key_pool,
            breaker,
            collab,
            pipeline,
        })
    }

    /// One consumer per configured worker slot, each handling both job kinds.
    #[must_use]
    pub fn workers(&self) -> Vec<Worker> {
        let poll = Duration::from_millis(self.config.worker_poll_ms.max(10));
        (0..self.config.worker_concurrency)
            .map(|id| {
                Worker::new(id, self.collab.jobs.clone(), poll)
                    .with_handler(Arc::new(FetchCycleHandler::new(Arc::clone(
                        &self.pipeline,
                    ))))
                    .with_handler(Arc::new(AnalyzeArticleHandler::new(
                        Arc::clone(&self.collab.analyzer),
                        Arc::clone(&self.collab.articles),
                        self.pipeline.dedup(),
                    )))
            })
            .collect()
    }
}
