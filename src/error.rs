//! Error types for the ragdocs service.

use std::path::PathBuf;

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors raised while turning a single file into documents.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("unsupported file extension '{0}'")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file exceeds maximum size: {size} > {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("text/html content not found in email")]
    NoHtmlContent,

    #[error("text/plain content not found in email")]
    NoTextContent,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("loader panicked: {0}")]
    Panicked(String),
}

impl LoaderError {
    pub fn parse(err: impl std::fmt::Display) -> Self {
        LoaderError::Parse(err.to_string())
    }
}

/// A loader error tagged with the file that produced it.
///
/// Failures are isolated per file: the ingestion batch keeps going and the
/// caller decides whether to skip or abort.
#[derive(Debug, Error)]
#[error("{path}: {error}")]
pub struct LoadFailure {
    pub path: String,
    #[source]
    pub error: LoaderError,
}

impl LoadFailure {
    pub fn new(path: impl Into<String>, error: LoaderError) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("failed to connect to embedding server: {0}")]
    ConnectionError(String),

    #[error("embedding server error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding timeout")]
    Timeout,
}

fn is_transient_status(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("429")
        || lower.contains("unavailable")
        || lower.contains("too many requests")
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            EmbeddingError::ServerError(msg) => is_transient_status(msg),
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to language model generation.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to connect to language model server: {0}")]
    ConnectionError(String),

    #[error("language model server error: {0}")]
    ServerError(String),

    #[error("generation request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    #[error("generation timeout")]
    Timeout,
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::ConnectionError(_) => true,
            LlmError::ServerError(msg) => is_transient_status(msg),
            LlmError::RequestError(e) => e.is_connect(),
            // A generation that timed out already occupied the engine for the full window.
            LlmError::Timeout | LlmError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("collection error: {0}")]
    CollectionError(String),

    #[error("upsert error: {0}")]
    UpsertError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("delete error: {0}")]
    DeleteError(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector store client error: {0}")]
    ClientError(String),

    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),
}

/// Errors related to ingesting a tenant's documents.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("directory walk error: {0}")]
    WalkError(String),

    #[error("{} file(s) failed to load", .0.len())]
    LoadFailures(Vec<LoadFailure>),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
}

/// Errors raised while answering a query through a retrieval chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("generation error: {0}")]
    Llm(#[from] LlmError),

    #[error("conversation memory unavailable: {0}")]
    Memory(String),
}

/// Errors returned by the inference scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("inference worker is not running")]
    WorkerStopped,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors related to sessions, authentication and authorization.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session expired, please login again")]
    Expired,

    #[error("Unauthorized, only allowed for admin")]
    Unauthorized,

    #[error("missing bearer token")]
    MissingCredentials,

    #[error("identity resolution failed: {0}")]
    IdentityResolution(String),

    #[error("failed to build retrieval chain: {0}")]
    Chain(#[from] ChainError),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failure_names_the_file() {
        let failure = LoadFailure::new("/docs/acme/b.pdf", LoaderError::parse("bad xref"));
        assert_eq!(failure.to_string(), "/docs/acme/b.pdf: parse error: bad xref");
    }

    #[test]
    fn test_embedding_error_retryable() {
        assert!(EmbeddingError::Timeout.is_retryable());
        assert!(EmbeddingError::ServerError("status 503: busy".into()).is_retryable());
        assert!(!EmbeddingError::ServerError("status 400: bad".into()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_llm_timeout_not_retried() {
        assert!(!LlmError::Timeout.is_retryable());
        assert!(LlmError::ConnectionError("refused".into()).is_retryable());
    }

    #[test]
    fn test_load_failures_message_counts_files() {
        let err = IngestError::LoadFailures(vec![
            LoadFailure::new("a", LoaderError::NoHtmlContent),
            LoadFailure::new("b", LoaderError::UnsupportedFormat(".doc".into())),
        ]);
        assert_eq!(err.to_string(), "2 file(s) failed to load");
    }
}
