use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_LLM_URL: &str = "http://localhost:11434";
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION_PREFIX: &str = "ragdocs_";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24;
pub const DEFAULT_INSUFFICIENT_CONTEXT_MARKER: &str =
    "I don't know based on the provided documents.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ragdocs").join("config.toml"))
    }

    pub fn metrics_db_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("ragdocs").join("metrics.db"))
    }

    /// Load from the default location, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.indexing.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "indexing.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return Err(ConfigError::ValidationError(format!(
                "indexing.chunk_overlap ({}) must be smaller than indexing.chunk_size ({})",
                self.indexing.chunk_overlap, self.indexing.chunk_size
            )));
        }
        if self.retrieval.retrieval_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.retrieval_k must be greater than zero".to_string(),
            ));
        }
        if self.session.session_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "session.session_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Parallel file loaders; defaults to the available CPU parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_workers: Option<usize>,

    #[serde(default)]
    pub abort_on_load_failure: bool,

    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: u32,
}

fn default_chunk_size() -> u32 {
    500
}

fn default_chunk_overlap() -> u32 {
    50
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/~$*".to_string(),
        "**/.DS_Store".to_string(),
    ]
}

fn default_embed_batch_size() -> u32 {
    32
}

impl IndexingConfig {
    pub fn workers(&self) -> usize {
        self.load_workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            exclude_patterns: default_exclude_patterns(),
            load_workers: None,
            abort_on_load_failure: false,
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: u32,

    /// Estimated tokens of retrieved context the model may receive.
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: u32,

    #[serde(default = "default_memory_token_budget")]
    pub memory_token_budget: u32,

    #[serde(default = "default_insufficient_context_marker")]
    pub insufficient_context_marker: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_language: Option<String>,
}

fn default_retrieval_k() -> u32 {
    4
}

fn default_context_token_budget() -> u32 {
    1500
}

fn default_memory_token_budget() -> u32 {
    1000
}

fn default_insufficient_context_marker() -> String {
    DEFAULT_INSUFFICIENT_CONTEXT_MARKER.to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieval_k: default_retrieval_k(),
            context_token_budget: default_context_token_budget(),
            memory_token_budget: default_memory_token_budget(),
            insufficient_context_marker: default_insufficient_context_marker(),
            answer_language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_embedding_dimension")]
    pub dimension: u32,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_embedding_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: None,
            timeout_secs: default_timeout(),
            dimension: default_embedding_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_llm_url() -> String {
    DEFAULT_LLM_URL.to_string()
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_llm_timeout() -> u64 {
    600
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
        }
    }
}

/// Vector database driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorDriver {
    #[default]
    Qdrant,
    /// In-process store, lost on restart.
    Memory,
}

impl std::fmt::Display for VectorDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorDriver::Qdrant => write!(f, "qdrant"),
            VectorDriver::Memory => write!(f, "memory"),
        }
    }
}

/// Similarity metric used for nearest-neighbour search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    #[serde(default)]
    pub driver: VectorDriver,

    #[serde(default = "default_qdrant_url")]
    pub url: String,

    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    #[serde(default)]
    pub distance: DistanceMetric,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_qdrant_url() -> String {
    DEFAULT_QDRANT_URL.to_string()
}

fn default_collection_prefix() -> String {
    DEFAULT_COLLECTION_PREFIX.to_string()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            driver: VectorDriver::default(),
            url: default_qdrant_url(),
            collection_prefix: default_collection_prefix(),
            distance: DistanceMetric::default(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_url")]
    pub url: String,

    /// Label whose presence marks an admin caller.
    #[serde(default = "default_admin_label")]
    pub admin_label: String,

    /// Label holding the caller's tenant.
    #[serde(default = "default_tenant_label")]
    pub tenant_label: String,

    #[serde(default = "default_identity_timeout")]
    pub timeout_secs: u64,
}

fn default_identity_url() -> String {
    "http://localhost:8081/user/profile".to_string()
}

fn default_admin_label() -> String {
    "straightdocs-admin".to_string()
}

fn default_tenant_label() -> String {
    "customer".to_string()
}

fn default_identity_timeout() -> u64 {
    10
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            url: default_identity_url(),
            admin_label: default_admin_label(),
            tenant_label: default_tenant_label(),
            timeout_secs: default_identity_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root holding one document directory per tenant.
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("documents")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            documents_dir: default_documents_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_days: default_retention_days(),
        }
    }
}
