mod config;
mod document;
mod retrieval;

pub use config::{
    Config, DEFAULT_COLLECTION_PREFIX, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_URL,
    DEFAULT_INSUFFICIENT_CONTEXT_MARKER, DEFAULT_LLM_URL, DEFAULT_QDRANT_URL,
    DEFAULT_SESSION_TTL_SECS, DistanceMetric, EmbeddingConfig, IdentityConfig, IndexingConfig,
    LlmConfig, MetricsConfig, RetrievalConfig, ServerConfig, SessionConfig, VectorDriver,
    VectorStoreConfig,
};
pub use document::{
    DocumentChunk, EmbeddedChunk, LoadedDocument, META_CHECKSUM, META_EXTENSION, META_FILE_NAME,
    ScoredChunk,
};
pub use retrieval::{Identity, OutputFormat, RetrievalResult, SourceExcerpt};
