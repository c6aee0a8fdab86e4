//! Vector store abstraction layer.
//!
//! A [`VectorBackend`] owns the connection to a vector database and hands
//! out one [`VectorIndex`] per tenant. Each tenant's chunks live in their own
//! collection so tenants can never see each other's documents.

mod memory;
mod qdrant;

pub use memory::MemoryBackend;
pub use qdrant::QdrantBackend;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::VectorStoreError;
use crate::models::{
    DocumentChunk, EmbeddedChunk, ScoredChunk, VectorDriver, VectorStoreConfig,
};
use crate::utils::tenant_key;

/// Payload key holding a chunk's source file.
pub const SOURCE_PATH_KEY: &str = "source_path";

/// Metadata selector for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexFilter {
    /// Every chunk whose `source_path` equals the given path.
    SourcePath(String),
}

impl IndexFilter {
    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        match self {
            IndexFilter::SourcePath(path) => chunk.source_path == *path,
        }
    }
}

/// One tenant's collection of embedded chunks.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite entries. Entries with the same id replace each
    /// other, so re-upserting a chunk is harmless.
    async fn upsert(&self, chunks: Vec<EmbeddedChunk>) -> Result<(), VectorStoreError>;

    /// Up to `k` nearest chunks, most similar first.
    async fn query(&self, embedding: &[f32], k: usize)
    -> Result<Vec<ScoredChunk>, VectorStoreError>;

    /// Remove matching entries and return how many were removed.
    async fn delete(&self, filter: &IndexFilter) -> Result<u64, VectorStoreError>;

    /// Distinct `source_path` values currently stored.
    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError>;

    async fn count(&self) -> Result<u64, VectorStoreError>;

    /// Collection name.
    fn name(&self) -> &str;
}

/// A vector database holding one collection per tenant.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Open the tenant's collection, creating it if it does not exist yet.
    async fn open(&self, tenant: &str) -> Result<Arc<dyn VectorIndex>, VectorStoreError>;

    async fn collection_exists(&self, tenant: &str) -> Result<bool, VectorStoreError>;

    /// Drop the tenant's collection. Returns false if there was none.
    async fn drop_collection(&self, tenant: &str) -> Result<bool, VectorStoreError>;

    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    fn driver(&self) -> VectorDriver;
}

/// Storage key for a tenant; see [`tenant_key`]. Blank ids are rejected.
pub fn checked_tenant_key(tenant: &str) -> Result<String, VectorStoreError> {
    tenant_key(tenant).ok_or_else(|| VectorStoreError::InvalidTenant(tenant.to_string()))
}

/// Collection name for a tenant.
pub fn collection_name(prefix: &str, tenant: &str) -> Result<String, VectorStoreError> {
    Ok(format!("{}{}", prefix, checked_tenant_key(tenant)?))
}

pub(crate) fn check_dimension(expected: usize, actual: usize) -> Result<(), VectorStoreError> {
    if expected != actual {
        return Err(VectorStoreError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Create a vector store backend based on configuration.
pub fn create_backend(
    config: &VectorStoreConfig,
    dimension: usize,
) -> Result<Arc<dyn VectorBackend>, VectorStoreError> {
    match config.driver {
        VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(config, dimension)?)),
        VectorDriver::Memory => Ok(Arc::new(MemoryBackend::new(config, dimension))),
    }
}
