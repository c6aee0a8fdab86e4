//! Collection maintenance: add, delete, delete-file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{EmbeddingClient, TenantManager, create_backend};

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Directory containing the documents
    pub directory: PathBuf,

    /// Collection (tenant) to add them to
    pub tenant: String,
}

fn tenant_manager(config: &Config) -> Result<TenantManager> {
    let embedder = Arc::new(
        EmbeddingClient::new(&config.embedding).context("failed to create embedding client")?,
    );
    let backend = create_backend(&config.vector_store, config.embedding.dimension as usize)
        .context("failed to connect to vector store")?;
    Ok(TenantManager::new(
        backend,
        embedder,
        &config.indexing,
        config.server.documents_dir.clone(),
    ))
}

pub async fn handle_add(
    args: AddArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);
    let start = Instant::now();

    let directory = args
        .directory
        .canonicalize()
        .with_context(|| format!("invalid directory: {}", args.directory.display()))?;
    let manager = tenant_manager(&config)?;

    if verbose {
        eprintln!(
            "Indexing {} into collection {}",
            directory.display(),
            args.tenant
        );
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta})",
            )?
            .progress_chars("#>-"),
    );

    let summary = manager
        .ingest_with_progress(&args.tenant, &directory, |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        })
        .await;
    pb.finish_and_clear();
    let summary = summary.with_context(|| format!("failed to index {}", directory.display()))?;

    if summary.files_loaded == 0 && summary.failures.is_empty() {
        println!(
            "{}",
            formatter.format_message(&format!(
                "No new documents to add to collection {}",
                args.tenant
            ))
        );
        return Ok(());
    }

    print!(
        "{}",
        formatter.format_ingest_summary(&summary, start.elapsed().as_millis() as u64)
    );
    Ok(())
}

pub async fn handle_delete(tenant: String, config: Config, format: OutputFormat) -> Result<()> {
    let formatter = get_formatter(format);
    let manager = tenant_manager(&config)?;

    let message = if manager.delete_collection(&tenant).await? {
        format!("deleted collection {} successfully", tenant)
    } else {
        format!("Collection {} does not exist", tenant)
    };
    println!("{}", formatter.format_message(&message));
    Ok(())
}

pub async fn handle_delete_file(
    tenant: String,
    path: String,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);
    let manager = tenant_manager(&config)?;

    let removed = manager.delete_file(&tenant, &path).await?;
    let message = if removed == 0 {
        format!("No chunks of {} found in collection {}", path, tenant)
    } else {
        format!(
            "deleted file {} from collection {} successfully ({} chunks)",
            path, tenant, removed
        )
    };
    println!("{}", formatter.format_message(&message));
    Ok(())
}
