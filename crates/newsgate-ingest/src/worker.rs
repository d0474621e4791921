//! Job consumer loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use newsgate_core::{FailureDisposition, JobQueue, QueuedJob};
use tokio::sync::watch;

/// Executes jobs of one name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_name(&self) -> &'static str;

    /// An `Err` fails the attempt; the queue decides whether to retry.
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()>;
}

/// Polls the queue for every registered job name and dispatches to the
/// matching handler, one job at a time.
pub struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    handlers: Vec<Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(id: usize, queue: Arc<dyn JobQueue>, poll_interval: Duration) -> Self {
        Self {
            id,
            queue,
            handlers: Vec::new(),
            poll_interval,
        }
    }

    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Reserves and runs at most one job. Returns `true` if a job ran.
    ///
    /// # Errors
    ///
    /// Returns an error only when the queue itself fails; handler errors are
    /// recorded on the job.
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        for handler in &self.handlers {
            let Some(job) = self.queue.reserve(handler.job_name()).await? else {
                continue;
            };
            self.execute(&**handler, &job).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Runs until `shutdown` flips to `true`. The job in flight, if any, is
    /// finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = self.id, "worker started");
        while !*shutdown.borrow() {
            let idle = match self.run_once().await {
                Ok(ran) => !ran,
                Err(e) => {
                    tracing::warn!(worker = self.id, error = %e, "job queue unavailable");
                    true
                }
            };
            if idle {
                tokio::select! {
                    () = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::info!(worker = self.id, "worker stopped");
    }

    async fn execute(&self, handler: &dyn JobHandler, job: &QueuedJob) -> anyhow::Result<()> {
        tracing::debug!(
            worker = self.id,
            job_id = job.id,
            job = %job.name,
            attempt = job.attempt,
            "running job"
        );
        match handler.handle(job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
            }
            Err(e) => {
                let message = format!("{e:#}");
                match self.queue.fail(job.id, &message).await? {
                    FailureDisposition::Retrying { run_at } => tracing::warn!(
                        worker = self.id,
                        job_id = job.id,
                        job = %job.name,
                        attempt = job.attempt,
                        retry_at = %run_at,
                        error = %message,
                        "job failed, will retry"
                    ),
                    FailureDisposition::Dead => tracing::error!(
                        worker = self.id,
                        job_id = job.id,
                        job = %job.name,
                        attempt = job.attempt,
                        error = %message,
                        "job failed permanently"
                    ),
                }
            }
        }
        Ok(())
    }
}
