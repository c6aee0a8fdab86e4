//! Qdrant vector store backend implementation.

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PayloadIncludeSelector, PointId,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value, VectorParamsBuilder,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{
    IndexFilter, SOURCE_PATH_KEY, VectorBackend, VectorIndex, check_dimension, collection_name,
};
use crate::error::VectorStoreError;
use crate::models::{
    DistanceMetric, DocumentChunk, EmbeddedChunk, ScoredChunk, VectorDriver, VectorStoreConfig,
};

const SEQUENCE_INDEX_KEY: &str = "sequence_index";
const TEXT_KEY: &str = "text";
const META_PREFIX: &str = "meta.";
const SCROLL_BATCH: u32 = 256;

fn distance(metric: DistanceMetric) -> Distance {
    match metric {
        DistanceMetric::Cosine => Distance::Cosine,
        DistanceMetric::Dot => Distance::Dot,
        DistanceMetric::Euclid => Distance::Euclid,
    }
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn payload_u32(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => u32::try_from(*n).ok(),
        _ => None,
    }
}

fn chunk_to_payload(chunk: DocumentChunk) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert(SOURCE_PATH_KEY.to_string(), chunk.source_path.into());
    payload.insert(
        SEQUENCE_INDEX_KEY.to_string(),
        i64::from(chunk.sequence_index).into(),
    );
    payload.insert(TEXT_KEY.to_string(), chunk.text.into());
    for (key, value) in chunk.extra_metadata {
        payload.insert(format!("{META_PREFIX}{key}"), value.into());
    }
    payload
}

fn chunk_from_payload(payload: &HashMap<String, Value>) -> DocumentChunk {
    let extra_metadata: BTreeMap<String, String> = payload
        .iter()
        .filter_map(|(key, value)| {
            let meta_key = key.strip_prefix(META_PREFIX)?;
            match &value.kind {
                Some(Kind::StringValue(s)) => Some((meta_key.to_string(), s.clone())),
                _ => None,
            }
        })
        .collect();

    DocumentChunk {
        text: payload_str(payload, TEXT_KEY).unwrap_or_default().to_string(),
        source_path: payload_str(payload, SOURCE_PATH_KEY)
            .unwrap_or_default()
            .to_string(),
        sequence_index: payload_u32(payload, SEQUENCE_INDEX_KEY).unwrap_or_default(),
        extra_metadata,
    }
}

fn filter_for(filter: &IndexFilter) -> Filter {
    match filter {
        IndexFilter::SourcePath(path) => {
            Filter::must([Condition::matches(SOURCE_PATH_KEY, path.clone())])
        }
    }
}

/// One tenant collection in Qdrant.
pub struct QdrantIndex {
    client: Arc<Qdrant>,
    collection: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Scroll through the collection, handing each page's points to `visit`.
    async fn scroll_all<F>(
        &self,
        filter: Option<Filter>,
        payload_fields: Option<Vec<String>>,
        mut visit: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnMut(Option<PointId>, &HashMap<String, Value>) + Send,
    {
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_BATCH)
                .with_vectors(false);

            builder = match &payload_fields {
                Some(fields) => builder.with_payload(PayloadIncludeSelector {
                    fields: fields.clone(),
                }),
                None => builder.with_payload(false),
            };
            if let Some(f) = &filter {
                builder = builder.filter(f.clone());
            }
            if let Some(off) = offset.take() {
                builder = builder.offset(off);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

            for point in response.result {
                visit(point.id, &point.payload);
            }

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, chunks: Vec<EmbeddedChunk>) -> Result<(), VectorStoreError> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in &chunks {
            check_dimension(self.dimension, chunk.embedding.len())?;
        }

        let points: Vec<PointStruct> = chunks
            .into_iter()
            .map(|c| PointStruct::new(c.id, c.embedding, chunk_to_payload(c.chunk)))
            .collect();

        let upsert = UpsertPointsBuilder::new(&self.collection, points).wait(true);

        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| VectorStoreError::UpsertError(e.to_string()))?;

        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, VectorStoreError> {
        check_dimension(self.dimension, embedding.len())?;

        let search = SearchPointsBuilder::new(&self.collection, embedding.to_vec(), k as u64)
            .with_payload(true);

        let results = self
            .client
            .search_points(search)
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| ScoredChunk {
                chunk: chunk_from_payload(&point.payload),
                score: point.score,
            })
            .collect())
    }

    async fn delete(&self, filter: &IndexFilter) -> Result<u64, VectorStoreError> {
        let mut ids: Vec<PointId> = Vec::new();
        self.scroll_all(Some(filter_for(filter)), None, |id, _| {
            if let Some(id) = id {
                ids.push(id);
            }
        })
        .await?;

        if ids.is_empty() {
            return Ok(0);
        }
        let removed = ids.len() as u64;

        let delete = DeletePointsBuilder::new(&self.collection)
            .points(ids)
            .wait(true);

        self.client
            .delete_points(delete)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(removed)
    }

    async fn list_sources(&self) -> Result<BTreeSet<String>, VectorStoreError> {
        let mut sources = BTreeSet::new();
        self.scroll_all(None, Some(vec![SOURCE_PATH_KEY.to_string()]), |_, payload| {
            if let Some(path) = payload_str(payload, SOURCE_PATH_KEY) {
                sources.insert(path.to_string());
            }
        })
        .await?;
        Ok(sources)
    }

    async fn count(&self) -> Result<u64, VectorStoreError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;
        Ok(response.result.map_or(0, |r| r.count))
    }

    fn name(&self) -> &str {
        &self.collection
    }
}

/// Qdrant server with one collection per tenant.
pub struct QdrantBackend {
    client: Arc<Qdrant>,
    prefix: String,
    dimension: usize,
    metric: DistanceMetric,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig, dimension: usize) -> Result<Self, VectorStoreError> {
        let mut builder = Qdrant::from_url(&config.url);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            prefix: config.collection_prefix.clone(),
            dimension,
            metric: config.distance,
        })
    }

    async fn exists(&self, collection: &str) -> Result<bool, VectorStoreError> {
        self.client
            .collection_exists(collection)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))
    }

    async fn create_collection(&self, collection: &str) -> Result<(), VectorStoreError> {
        let create = CreateCollectionBuilder::new(collection).vectors_config(
            VectorParamsBuilder::new(self.dimension as u64, distance(self.metric)),
        );

        self.client
            .create_collection(create)
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        // Deletes and dedup lookups filter on the source path.
        self.client
            .create_field_index(
                CreateFieldIndexCollectionBuilder::new(
                    collection,
                    SOURCE_PATH_KEY,
                    FieldType::Keyword,
                )
                .wait(true),
            )
            .await
            .map_err(|e| VectorStoreError::CollectionError(e.to_string()))?;

        tracing::info!(collection, dimension = self.dimension, "created collection");
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    async fn open(&self, tenant: &str) -> Result<Arc<dyn VectorIndex>, VectorStoreError> {
        let collection = collection_name(&self.prefix, tenant)?;
        if !self.exists(&collection).await? {
            self.create_collection(&collection).await?;
        }

        Ok(Arc::new(QdrantIndex {
            client: Arc::clone(&self.client),
            collection,
            dimension: self.dimension,
        }))
    }

    async fn collection_exists(&self, tenant: &str) -> Result<bool, VectorStoreError> {
        self.exists(&collection_name(&self.prefix, tenant)?).await
    }

    async fn drop_collection(&self, tenant: &str) -> Result<bool, VectorStoreError> {
        let collection = collection_name(&self.prefix, tenant)?;
        if !self.exists(&collection).await? {
            return Ok(false);
        }

        self.client
            .delete_collection(&collection)
            .await
            .map_err(|e| VectorStoreError::DeleteError(e.to_string()))?;

        Ok(true)
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    fn driver(&self) -> VectorDriver {
        VectorDriver::Qdrant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip_keeps_metadata() {
        let mut extra = BTreeMap::new();
        extra.insert("file_name".to_string(), "a.txt".to_string());
        let chunk = DocumentChunk {
            text: "hello".to_string(),
            source_path: "/d/acme/a.txt".to_string(),
            sequence_index: 7,
            extra_metadata: extra,
        };

        let payload = chunk_to_payload(chunk.clone());
        assert!(payload.contains_key("meta.file_name"));
        assert_eq!(chunk_from_payload(&payload), chunk);
    }

    #[test]
    fn test_backend_creation() {
        let backend = QdrantBackend::new(&VectorStoreConfig::default(), 384);
        assert!(backend.is_ok());
    }

    #[test]
    fn test_distance_mapping() {
        assert_eq!(distance(DistanceMetric::Cosine), Distance::Cosine);
        assert_eq!(distance(DistanceMetric::Euclid), Distance::Euclid);
    }
}
