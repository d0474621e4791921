//! The ingestion pipeline: fetch, dedup, gate and enqueue news candidates,
//! plus the job consumers that run downstream analysis.
//!
//! One fetch cycle flows through [`FetchOrchestrator`] (provider fallback),
//! [`DedupFilter`] (cross-process claims), [`Gatekeeper`] (junk filter) and
//! [`IngestionQueue`] (hand-off). [`Worker`] drains the resulting jobs.

pub mod dedup;
pub mod error;
pub mod gatekeeper;
pub mod handlers;
pub mod orchestrator;
pub mod pipeline;
pub mod queue;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod worker;

pub use dedup::{DedupFilter, DedupSettings};
pub use error::{IngestError, QueueError};
pub use gatekeeper::{Classification, GateStage, Gatekeeper, GatekeeperSettings};
pub use handlers::{AnalyzeArticleHandler, FetchCycleHandler};
pub use orchestrator::{FetchOrchestrator, FetchReport, ProviderOutcome};
pub use pipeline::{Collaborators, CycleReport, IngestionPipeline};
pub use queue::{
    AnalyzeArticlePayload, FetchCyclePayload, IngestionQueue, ANALYZE_ARTICLE_JOB,
    FETCH_CYCLE_JOB,
};
pub use worker::{JobHandler, Worker};
