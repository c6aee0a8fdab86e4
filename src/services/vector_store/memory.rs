//! In-process vector store, lost on restart.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use super::{IndexFilter, VectorBackend, VectorIndex, check_dimension, collection_name};
use crate::error::VectorStoreError;
use crate::models::{DistanceMetric, EmbeddedChunk, ScoredChunk, VectorDriver, VectorStoreConfig};

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Higher is more similar for every metric.
fn score(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => cosine_similarity(a, b),
        DistanceMetric::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        DistanceMetric::Euclid => -a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    }
}

pub struct MemoryIndex {
    name: String,
    dimension: usize,
    metric: DistanceMetric,
    entries: RwLock<Vec<EmbeddedChunk>>,
}

impl MemoryIndex {
    fn new(name: String, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            name,
            dimension,
            metric,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, chunks: Vec<EmbeddedChunk>) -> Result<(), VectorStoreError> {
        for chunk in &chunks {
            check_dimension(self.dimension, chunk.embedding.len())?;
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        for chunk in chunks {
            match entries.iter_mut().find(|e| e.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => entries.push(chunk),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        check_dimension(self.dimension, embedding.len())?;

        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: score(self.metric, embedding, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<u64, VectorStoreError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|entry| !filter.matches(&entry.chunk));
        Ok((before - entries.len()) as u64)
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .iter()
            .map(|entry| entry.chunk.source_path.clone())
            .collect())
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.len() as u64)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Collections keyed by name, shared by every handle opened on them.
pub struct MemoryBackend {
    prefix: String,
    dimension: usize,
    metric: DistanceMetric,
    collections: RwLock<HashMap<String, Arc<MemoryIndex>>>,
}

impl MemoryBackend {
    pub fn new(config: &VectorStoreConfig, dimension: usize) -> Self {
        Self {
            prefix: config.collection_prefix.clone(),
            dimension,
            metric: config.distance,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    async fn open(&self, tenant: &str) -> Result<Arc<dyn VectorIndex>, VectorStoreError> {
        let name = collection_name(&self.prefix, tenant)?;
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let index = collections
            .entry(name.clone())
            .or_insert_with(|| Arc::new(MemoryIndex::new(name, self.dimension, self.metric)))
            .clone();
        Ok(index)
    }

    async fn collection_exists(&self, tenant: &str) -> Result<bool, VectorStoreError> {
        let name = collection_name(&self.prefix, tenant)?;
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.contains_key(&name))
    }

    async fn drop_collection(&self, tenant: &str) -> Result<bool, VectorStoreError> {
        let name = collection_name(&self.prefix, tenant)?;
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        match collections.remove(&name) {
            Some(index) => {
                // Handles still held by sessions must observe the drop.
                index.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChunk;
    use std::collections::BTreeMap;

    fn embedded(path: &str, index: u32, embedding: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk::new(
            DocumentChunk {
                text: format!("{path}#{index}"),
                source_path: path.to_string(),
                sequence_index: index,
                extra_metadata: BTreeMap::new(),
            },
            embedding,
        )
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new(&VectorStoreConfig::default(), 2)
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_query_ranks_most_similar_first() {
        let index = backend().open("acme").await.unwrap();
        index
            .upsert(vec![
                embedded("/a", 0, vec![0.0, 1.0]),
                embedded("/b", 0, vec![1.0, 0.1]),
                embedded("/c", 0, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = index.query(&[1.0, 0.0], 2).await.unwrap();
        let paths: Vec<_> = results.iter().map(|r| r.chunk.source_path.as_str()).collect();
        assert_eq!(paths, vec!["/b", "/c"]);
    }

    #[tokio::test]
    async fn test_upsert_same_address_overwrites() {
        let index = backend().open("acme").await.unwrap();
        index.upsert(vec![embedded("/a", 0, vec![1.0, 0.0])]).await.unwrap();
        index.upsert(vec![embedded("/a", 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let index = backend().open("acme").await.unwrap();
        let err = index
            .upsert(vec![embedded("/a", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch { expected: 2, actual: 3 }
        ));
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let backend = backend();
        let acme = backend.open("acme").await.unwrap();
        let globex = backend.open("globex").await.unwrap();
        acme.upsert(vec![embedded("/a", 0, vec![1.0, 0.0])]).await.unwrap();

        assert_eq!(acme.count().await.unwrap(), 1);
        assert_eq!(globex.count().await.unwrap(), 0);
        assert!(globex.query(&[1.0, 0.0], 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_collection() {
        let backend = backend();
        let held = backend.open("acme").await.unwrap();
        held.upsert(vec![embedded("/a", 0, vec![1.0, 0.0])]).await.unwrap();

        assert!(backend.drop_collection("acme").await.unwrap());
        assert!(!backend.drop_collection("acme").await.unwrap());
        assert!(!backend.collection_exists("acme").await.unwrap());
        assert_eq!(held.count().await.unwrap(), 0);
    }
}
