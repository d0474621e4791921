//! Recurring jobs: fetch-cycle enqueueing and store housekeeping.

use std::sync::Arc;
use std::time::Duration;

use newsgate_db::{PgCoordinationStore, PgJobQueue, StaleJobs};
use newsgate_ingest::IngestionPipeline;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::runtime::Runtime;

const HOUSEKEEPING_CRON: &str = "0 */10 * * * *";
/// Running jobs untouched for this long belong to a dead worker.
const STALE_JOB_AFTER: Duration = Duration::from_secs(15 * 60);
const FINISHED_JOB_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Builds and starts the scheduler.
///
/// The returned handle must be kept alive; dropping it stops every job.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, a
/// cron expression is invalid, or the scheduler fails to start.
pub async fn build_scheduler(runtime: &Runtime) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    register_fetch_job(
        &scheduler,
        &runtime.config.fetch_schedule,
        Arc::clone(&runtime.pipeline),
    )
    .await?;
    register_housekeeping_job(&scheduler, runtime.coord.clone(), runtime.jobs.clone()).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Enqueues a `fetch-cycle` job on `cron`. Whichever worker reserves it runs
/// the cycle, so several schedulers only add queue entries, never parallel
/// fetches of the same slot.
async fn register_fetch_job(
    scheduler: &JobScheduler,
    cron: &str,
    pipeline: Arc<IngestionPipeline>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            if let Err(e) = pipeline.queue().enqueue_fetch_cycle().await {
                tracing::error!(error = %e, "scheduler: failed to enqueue fetch cycle");
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered fetch-cycle job");
    Ok(())
}

async fn register_housekeeping_job(
    scheduler: &JobScheduler,
    coord: Arc<PgCoordinationStore>,
    jobs: Arc<PgJobQueue>,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(HOUSEKEEPING_CRON, move |_uuid, _lock| {
        let coord = Arc::clone(&coord);
        let jobs = Arc::clone(&jobs);
        Box::pin(async move {
            run_housekeeping(&coord, &jobs).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = HOUSEKEEPING_CRON, "scheduler: registered housekeeping job");
    Ok(())
}

/// Each step is independent; a failure is logged and the rest still run.
async fn run_housekeeping(coord: &PgCoordinationStore, jobs: &PgJobQueue) {
    match coord.purge_expired().await {
        Ok(n) => tracing::debug!(purged = n, "housekeeping: expired coordination entries"),
        Err(e) => tracing::warn!(error = %e, "housekeeping: purge of coordination entries failed"),
    }
    match jobs.requeue_stale(STALE_JOB_AFTER).await {
        Ok(StaleJobs { requeued: 0, dead: 0 }) => {}
        Ok(stale) => tracing::warn!(
            requeued = stale.requeued,
            dead = stale.dead,
            "housekeeping: recovered stale jobs"
        ),
        Err(e) => tracing::warn!(error = %e, "housekeeping: stale job re-queue failed"),
    }
    match jobs.purge_finished(FINISHED_JOB_RETENTION).await {
        Ok(n) => tracing::debug!(purged = n, "housekeeping: finished jobs"),
        Err(e) => tracing::warn!(error = %e, "housekeeping: finished job purge failed"),
    }
}
