//! Tenant-level ingestion and deletion.
//!
//! [`TenantManager`] composes the ingestion pipeline, the embedder and the
//! vector backend. The set of files a tenant already has is read back from
//! its index on every run, never tracked separately. At most one structural
//! change (ingest or delete) runs per tenant at a time.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{IngestError, LoadFailure, VectorStoreError};
use crate::models::IndexingConfig;
use crate::services::batch::embed_chunks;
use crate::services::embedding::Embedder;
use crate::services::ingestion::{IngestionPipeline, source_path};
use crate::services::vector_store::{IndexFilter, VectorBackend, checked_tenant_key};
use crate::utils::secure_filename;

/// What one ingestion run changed.
#[derive(Debug)]
pub struct IngestSummary {
    pub tenant: String,
    pub added_chunks: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub failures: Vec<LoadFailure>,
    pub count_before: u64,
    pub count_after: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub tenant: String,
    pub exists: bool,
    pub count: u64,
    pub sources: BTreeSet<String>,
}

pub struct TenantManager {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    pipeline: IngestionPipeline,
    documents_dir: PathBuf,
    embed_batch_size: usize,
    abort_on_load_failure: bool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TenantManager {
    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embedder: Arc<dyn Embedder>,
        indexing: &IndexingConfig,
        documents_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            embedder,
            pipeline: IngestionPipeline::new(indexing),
            documents_dir,
            embed_batch_size: indexing.embed_batch_size.max(1) as usize,
            abort_on_load_failure: indexing.abort_on_load_failure,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn VectorBackend> {
        &self.backend
    }

    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// `<documents_dir>/<tenant key>`, always one level below the root.
    pub fn tenant_directory(&self, tenant: &str) -> Result<PathBuf, VectorStoreError> {
        Ok(self.documents_dir.join(checked_tenant_key(tenant)?))
    }

    /// Source path a file in the tenant's directory is indexed under.
    /// Path components in `file_name` are discarded.
    pub fn file_source_path(
        &self,
        tenant: &str,
        file_name: &str,
    ) -> Result<String, VectorStoreError> {
        let directory = self.tenant_directory(tenant)?;
        Ok(source_path(&directory.join(secure_filename(file_name))))
    }

    fn lock_for(&self, tenant: &str) -> Result<Arc<tokio::sync::Mutex<()>>, VectorStoreError> {
        let key = checked_tenant_key(tenant)?;
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(locks.entry(key).or_default()))
    }

    /// Ingest the tenant's own document directory.
    pub async fn ingest(&self, tenant: &str) -> Result<IngestSummary, IngestError> {
        let directory = self.tenant_directory(tenant)?;
        self.ingest_directory(tenant, &directory).await
    }

    pub async fn ingest_directory(
        &self,
        tenant: &str,
        directory: &Path,
    ) -> Result<IngestSummary, IngestError> {
        self.ingest_with_progress(tenant, directory, |_, _| {}).await
    }

    /// Add every file under `directory` not yet in the tenant's index.
    ///
    /// All chunks are embedded before anything is written, then committed in
    /// one upsert, so an embedding failure leaves the index untouched.
    pub async fn ingest_with_progress<F>(
        &self,
        tenant: &str,
        directory: &Path,
        on_progress: F,
    ) -> Result<IngestSummary, IngestError>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let lock = self.lock_for(tenant)?;
        if !directory.is_dir() {
            return Err(IngestError::DirectoryNotFound(directory.to_path_buf()));
        }

        let _guard = lock.lock().await;

        let index = self.backend.open(tenant).await?;
        let already_indexed = index.list_sources().await?;
        let count_before = index.count().await?;

        let report = self
            .pipeline
            .process_with_progress(tenant, directory, &already_indexed, on_progress)
            .await?;

        if self.abort_on_load_failure && !report.failures.is_empty() {
            return Err(IngestError::LoadFailures(report.failures));
        }

        let mut summary = IngestSummary {
            tenant: tenant.to_string(),
            added_chunks: 0,
            files_loaded: report.files_loaded,
            files_skipped: report.files_skipped,
            failures: report.failures,
            count_before,
            count_after: count_before,
        };

        if report.chunks.is_empty() {
            tracing::info!(tenant, "nothing new to index");
            return Ok(summary);
        }

        let embedded =
            embed_chunks(self.embedder.as_ref(), report.chunks, self.embed_batch_size).await?;
        summary.added_chunks = embedded.len();
        index.upsert(embedded).await?;
        summary.count_after = index.count().await?;

        tracing::info!(
            tenant,
            collection = index.name(),
            added = summary.added_chunks,
            count = summary.count_after,
            "indexed documents"
        );
        Ok(summary)
    }

    /// Drop the tenant's collection. Returns false if it did not exist.
    pub async fn delete_collection(&self, tenant: &str) -> Result<bool, VectorStoreError> {
        let lock = self.lock_for(tenant)?;
        let _guard = lock.lock().await;

        let dropped = self.backend.drop_collection(tenant).await?;
        if dropped {
            tracing::info!(tenant, "deleted collection");
        } else {
            tracing::info!(tenant, "collection does not exist");
        }
        Ok(dropped)
    }

    /// Remove every chunk of one source file; returns how many were removed.
    pub async fn delete_file(&self, tenant: &str, source: &str) -> Result<u64, VectorStoreError> {
        let lock = self.lock_for(tenant)?;
        let _guard = lock.lock().await;

        if !self.backend.collection_exists(tenant).await? {
            return Ok(0);
        }
        let index = self.backend.open(tenant).await?;
        let removed = index
            .delete(&IndexFilter::SourcePath(source.to_string()))
            .await?;

        tracing::info!(tenant, source, removed, "deleted file from collection");
        Ok(removed)
    }

    pub async fn status(&self, tenant: &str) -> Result<TenantStatus, VectorStoreError> {
        if !self.backend.collection_exists(tenant).await? {
            return Ok(TenantStatus {
                tenant: tenant.to_string(),
                exists: false,
                count: 0,
                sources: BTreeSet::new(),
            });
        }

        let index = self.backend.open(tenant).await?;
        Ok(TenantStatus {
            tenant: tenant.to_string(),
            exists: true,
            count: index.count().await?,
            sources: index.list_sources().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorStoreConfig;
    use crate::services::vector_store::MemoryBackend;
    use crate::testing::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    const DIM: usize = 32;

    struct Fixture {
        _root: TempDir,
        manager: Arc<TenantManager>,
        embedder: Arc<HashEmbedder>,
    }

    fn fixture_with(indexing: IndexingConfig) -> Fixture {
        let root = TempDir::new().unwrap();
        let embedder = Arc::new(HashEmbedder::new(DIM));
        let backend = Arc::new(MemoryBackend::new(&VectorStoreConfig::default(), DIM));
        let manager = Arc::new(TenantManager::new(
            backend,
            embedder.clone(),
            &indexing,
            root.path().to_path_buf(),
        ));
        Fixture {
            _root: root,
            manager,
            embedder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(IndexingConfig {
            load_workers: Some(2),
            ..Default::default()
        })
    }

    fn write(f: &Fixture, tenant: &str, name: &str, content: &[u8]) -> String {
        let dir = f.manager.tenant_directory(tenant).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
        f.manager.file_source_path(tenant, name).unwrap()
    }

    #[tokio::test]
    async fn test_second_ingest_adds_nothing() {
        let f = fixture();
        write(&f, "acme", "a.txt", b"Invoices are sent monthly.");
        write(&f, "acme", "b.md", b"# Refunds\n\nRefunds take fourteen days.");

        let first = f.manager.ingest("acme").await.unwrap();
        assert!(first.added_chunks > 0);
        assert_eq!(first.count_after, first.added_chunks as u64);
        let calls = f.embedder.batch_calls();

        let second = f.manager.ingest("acme").await.unwrap();
        assert_eq!(second.added_chunks, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(second.count_after, first.count_after);
        assert_eq!(f.embedder.batch_calls(), calls);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported_not_fatal() {
        let f = fixture();
        let a = write(&f, "acme", "a.txt", b"Valid text document.");
        let b = write(&f, "acme", "b.pdf", b"%PDF-garbage");

        let summary = f.manager.ingest("acme").await.unwrap();
        assert!(summary.added_chunks > 0);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, b);

        let status = f.manager.status("acme").await.unwrap();
        assert_eq!(status.sources, BTreeSet::from([a]));
    }

    #[tokio::test]
    async fn test_abort_on_load_failure_commits_nothing() {
        let f = fixture_with(IndexingConfig {
            abort_on_load_failure: true,
            load_workers: Some(2),
            ..Default::default()
        });
        write(&f, "acme", "a.txt", b"Valid text document.");
        write(&f, "acme", "b.pdf", b"not a pdf");

        let err = f.manager.ingest("acme").await.unwrap_err();
        assert!(matches!(err, IngestError::LoadFailures(ref v) if v.len() == 1));
        assert_eq!(f.manager.status("acme").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_delete_file_removes_only_that_file() {
        let f = fixture();
        let a = write(&f, "acme", "a.txt", b"alpha document text");
        let b = write(&f, "acme", "b.txt", b"beta document text");
        f.manager.ingest("acme").await.unwrap();
        let before = f.manager.status("acme").await.unwrap();

        let removed = f.manager.delete_file("acme", &a).await.unwrap();
        assert!(removed > 0);

        let after = f.manager.status("acme").await.unwrap();
        assert_eq!(after.count, before.count - removed);
        assert_eq!(after.sources, BTreeSet::from([b]));
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_noop() {
        let f = fixture();
        write(&f, "acme", "a.txt", b"alpha document text");
        f.manager.ingest("acme").await.unwrap();
        let count = f.manager.status("acme").await.unwrap().count;

        let missing = f.manager.file_source_path("acme", "nope.txt").unwrap();
        assert_eq!(f.manager.delete_file("acme", &missing).await.unwrap(), 0);
        assert_eq!(f.manager.delete_file("globex", &missing).await.unwrap(), 0);
        assert_eq!(f.manager.status("acme").await.unwrap().count, count);
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let f = fixture();
        write(&f, "acme", "a.txt", b"alpha document text");
        f.manager.ingest("acme").await.unwrap();

        assert!(f.manager.delete_collection("acme").await.unwrap());
        assert!(!f.manager.delete_collection("acme").await.unwrap());
        let status = f.manager.status("acme").await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.count, 0);
    }

    #[tokio::test]
    async fn test_tenants_do_not_share_documents() {
        let f = fixture();
        write(&f, "acme", "a.txt", b"acme secret plans");
        write(&f, "globex", "g.txt", b"globex public notes");
        f.manager.ingest("acme").await.unwrap();
        f.manager.ingest("globex").await.unwrap();

        let acme = f.manager.status("acme").await.unwrap();
        assert!(acme.sources.iter().all(|s| s.contains("acme")));
        let globex = f.manager.status("globex").await.unwrap();
        assert!(globex.sources.iter().all(|s| s.contains("globex")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ingests_are_serialized() {
        let f = fixture();
        for i in 0..4 {
            write(&f, "acme", &format!("doc{i}.txt"), format!("document number {i}").as_bytes());
        }

        let runs: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&f.manager);
                tokio::spawn(async move { manager.ingest("acme").await.unwrap() })
            })
            .collect();

        let mut added = 0;
        for run in runs {
            added += run.await.unwrap().added_chunks;
        }

        let status = f.manager.status("acme").await.unwrap();
        assert_eq!(added as u64, status.count);
        assert_eq!(status.sources.len(), 4);
    }

    #[test]
    fn test_file_source_path_strips_traversal() {
        let f = fixture();
        let path = f.manager.file_source_path("acme", "../../etc/passwd").unwrap();
        let dir = source_path(&f.manager.tenant_directory("acme").unwrap());
        assert!(path.starts_with(&dir));
        assert!(path.ends_with("passwd"));
        assert!(!path.contains(".."));
    }

    #[tokio::test]
    async fn test_missing_tenant_directory() {
        let f = fixture();
        let err = f.manager.ingest("nobody").await.unwrap_err();
        assert!(matches!(err, IngestError::DirectoryNotFound(_)));
    }

    #[tokio::test]
    async fn test_similar_tenant_names_get_separate_collections() {
        let f = fixture();
        let secret = write(&f, "Acme Corp", "secret.txt", b"acme corp payroll figures");
        f.manager.ingest("Acme Corp").await.unwrap();

        for other in ["acme.corp", "ACME_CORP", "acme_corp", "acme corp"] {
            let status = f.manager.status(other).await.unwrap();
            assert!(!status.exists, "{other}");
            assert_eq!(f.manager.delete_file(other, &secret).await.unwrap(), 0);
            assert!(!f.manager.delete_collection(other).await.unwrap());
            assert_ne!(
                f.manager.tenant_directory(other).unwrap(),
                f.manager.tenant_directory("Acme Corp").unwrap()
            );
        }

        let status = f.manager.status("Acme Corp").await.unwrap();
        assert_eq!(status.sources, BTreeSet::from([secret]));
    }

    #[test]
    fn test_tenant_directory_stays_below_root() {
        let f = fixture();
        for tenant in ["..", ".", "../globex", "a/b"] {
            let dir = f.manager.tenant_directory(tenant).unwrap();
            assert_eq!(dir.parent(), Some(f.manager.documents_dir()), "{tenant}");
        }
    }

    #[tokio::test]
    async fn test_blank_tenant_is_rejected() {
        let f = fixture();
        assert!(matches!(
            f.manager.ingest("").await,
            Err(IngestError::VectorStore(VectorStoreError::InvalidTenant(_)))
        ));
        assert!(matches!(
            f.manager.status("  ").await,
            Err(VectorStoreError::InvalidTenant(_))
        ));
        assert!(f.manager.tenant_directory("").is_err());
    }
}
