//! Directory ingestion: discover, load, split.
//!
//! The pipeline turns a tenant's document directory into chunks ready for
//! embedding. Files already present in the tenant's index (by full source
//! path) are skipped, so re-running over an unchanged directory is a no-op.
//! Each file loads on the blocking pool; a file that fails to load, or whose
//! loader panics, is reported as a [`LoadFailure`] without affecting the
//! rest of the batch.

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::task::JoinError;
use walkdir::WalkDir;

use crate::error::{IngestError, LoadFailure, LoaderError};
use crate::loaders::{DocumentFormat, load_single_document};
use crate::models::{DocumentChunk, IndexingConfig, LoadedDocument};
use crate::services::chunker::TextSplitter;

/// Outcome of one pipeline run.
#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<DocumentChunk>,
    pub failures: Vec<LoadFailure>,
    /// Files that loaded successfully.
    pub files_loaded: usize,
    /// Discovered files skipped because they are already indexed.
    pub files_skipped: usize,
}

impl IngestionReport {
    /// True when there is nothing to embed or commit.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub struct IngestionPipeline {
    splitter: TextSplitter,
    exclude_patterns: Vec<glob::Pattern>,
    max_file_size: u64,
    workers: usize,
}

impl IngestionPipeline {
    pub fn new(config: &IndexingConfig) -> Self {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();

        Self {
            splitter: TextSplitter::new(config),
            exclude_patterns,
            max_file_size: config.max_file_size,
            workers: config.workers(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Recursively list document files under `directory`, sorted by path.
    ///
    /// Documents without a loader are listed too so that loading reports them.
    pub fn discover(&self, directory: &Path) -> Result<Vec<PathBuf>, IngestError> {
        if !directory.is_dir() {
            return Err(IngestError::DirectoryNotFound(directory.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(directory).follow_links(false) {
            let entry = entry.map_err(|e| IngestError::WalkError(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(directory).unwrap_or(path);
            if self.exclude_patterns.iter().any(|p| p.matches_path(relative)) {
                tracing::debug!(path = %path.display(), "excluded");
                continue;
            }

            if DocumentFormat::is_document(path) {
                files.push(path.to_path_buf());
            } else {
                tracing::debug!(path = %path.display(), "not a document, skipping");
            }
        }

        files.sort();
        Ok(files)
    }

    /// Load and split every file under `directory` not in `already_indexed`.
    pub async fn process(
        &self,
        tenant_id: &str,
        directory: &Path,
        already_indexed: &BTreeSet<String>,
    ) -> Result<IngestionReport, IngestError> {
        self.process_with_progress(tenant_id, directory, already_indexed, |_, _| {})
            .await
    }

    /// Like [`process`](Self::process), calling `on_progress(done, total)`
    /// after each file finishes loading.
    pub async fn process_with_progress<F>(
        &self,
        tenant_id: &str,
        directory: &Path,
        already_indexed: &BTreeSet<String>,
        on_progress: F,
    ) -> Result<IngestionReport, IngestError>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let discovered = self.discover(directory)?;
        let total_discovered = discovered.len();

        let new_files: Vec<PathBuf> = discovered
            .into_iter()
            .filter(|path| !already_indexed.contains(&source_path(path)))
            .collect();
        let files_skipped = total_discovered - new_files.len();

        if new_files.is_empty() {
            tracing::info!(tenant = tenant_id, skipped = files_skipped, "no new documents to load");
            return Ok(IngestionReport {
                files_skipped,
                ..Default::default()
            });
        }

        tracing::info!(
            tenant = tenant_id,
            files = new_files.len(),
            skipped = files_skipped,
            workers = self.workers,
            "loading new documents"
        );

        let (documents, failures, files_loaded) = self
            .load_files(new_files, load_single_document, &on_progress)
            .await;
        for failure in &failures {
            tracing::warn!(tenant = tenant_id, path = %failure.path, error = %failure.error, "failed to load document");
        }

        let chunks = self.splitter.split_documents(&documents);
        tracing::info!(
            tenant = tenant_id,
            documents = documents.len(),
            chunks = chunks.len(),
            failures = failures.len(),
            "split documents"
        );

        Ok(IngestionReport {
            chunks,
            failures,
            files_loaded,
            files_skipped,
        })
    }

    /// Load files concurrently on the blocking pool with `load`.
    ///
    /// Documents come back ordered by source path regardless of which loader
    /// finished first.
    async fn load_files<L, F>(
        &self,
        files: Vec<PathBuf>,
        load: L,
        on_progress: &F,
    ) -> (Vec<LoadedDocument>, Vec<LoadFailure>, usize)
    where
        L: Fn(&Path, u64) -> Result<Vec<LoadedDocument>, LoadFailure> + Copy + Send + 'static,
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = files.len();
        let max_file_size = self.max_file_size;

        let mut results: Vec<(String, Result<Vec<LoadedDocument>, LoadFailure>)> =
            stream::iter(files)
                .map(|path| async move {
                    let display = source_path(&path);
                    let result = tokio::task::spawn_blocking(move || load(&path, max_file_size))
                    .await
                    .unwrap_or_else(|e| {
                        Err(LoadFailure::new(
                            display.clone(),
                            LoaderError::Panicked(panic_message(e)),
                        ))
                    });
                    (display, result)
                })
                .buffer_unordered(self.workers.max(1))
                .enumerate()
                .map(|(done, item)| {
                    on_progress(done + 1, total);
                    item
                })
                .collect()
                .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut documents = Vec::new();
        let mut failures = Vec::new();
        let mut files_loaded = 0;
        for (_, result) in results {
            match result {
                Ok(docs) => {
                    files_loaded += 1;
                    documents.extend(docs);
                }
                Err(failure) => failures.push(failure),
            }
        }

        (documents, failures, files_loaded)
    }
}

/// The string a file is indexed under.
pub fn source_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}
