//! Error types for the engine, one enum per subsystem.

use thiserror::Error;

use super::{JobId, JobStatus, PaperId, SearchQueryId, SourceId};

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Paper not found: {0}")]
    PaperNotFound(PaperId),

    #[error("Ingestion source not found: {0}")]
    SourceNotFound(SourceId),

    #[error("Search query not found: {0}")]
    QueryNotFound(SearchQueryId),

    #[error("Duplicate paper: {reason}")]
    DuplicatePaper { reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Work queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Enqueue failed: {0}")]
    EnqueueFailed(String),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

/// Stage execution errors, mapped to `FAILED` by the dispatcher.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Precondition failed for job {job_id} in {stage}: {reason}")]
    Precondition {
        job_id: JobId,
        stage: &'static str,
        reason: String,
    },

    #[error("No handler registered for status {0}")]
    NoHandler(JobStatus),

    #[error("Stage {stage} failed for job {job_id}: {reason}")]
    Execution {
        job_id: JobId,
        stage: &'static str,
        reason: String,
    },
}

/// LLM provider errors. Provider-specific failures never cross this boundary.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),

    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("LLM returned an empty or unparseable response: {0}")]
    Unparseable(String),

    #[error("LLM retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("No LLM provider configured")]
    NotConfigured,
}

/// Embedding provider errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Embedding request failed: {0}")]
    RequestFailed(String),

    #[error("Embedding response malformed: {0}")]
    Malformed(String),

    #[error("No embedding provider configured")]
    NotConfigured,
}

/// Text extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Paper provider and download errors.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited after {attempts} attempts")]
    RateLimited { provider: String, attempts: u32 },

    #[error("No provider available for domain {0:?}")]
    NoProvider(Option<String>),

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },
}

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;
