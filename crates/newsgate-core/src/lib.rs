//! Shared domain types, configuration and collaborator interfaces for the
//! newsgate ingestion layer.

pub mod app_config;
pub mod canonical;
pub mod collab;
pub mod config;
pub mod ingest_file;
pub mod types;

pub use app_config::{AppConfig, Environment, ProviderCredentials};
pub use canonical::{canonicalize_url, domain_of, url_hash, UrlCanonicalizer};
pub use collab::{
    retry_delay_secs, Analyzer, ArticleStore, FailureDisposition, JobOptions, JobQueue, NewJob,
    QueuedJob,
};
pub use config::{build_app_config, load_app_config, load_app_config_from_env};
pub use ingest_file::{load_ingest_file, parse_ingest_file, FetchSlot, IngestFile};
pub use types::{
    AnalysisMode, AnalysisResult, AnalyzedArticle, CandidateArticle, Category, JunkVerdict,
    Provider,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read ingest config at {path}: {source}")]
    IngestFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ingest config: {0}")]
    IngestFileParse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}
