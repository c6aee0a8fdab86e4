use std::sync::Arc;

use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat, VectorDriver};
use crate::services::{EmbeddingClient, MetricsStore, OllamaClient, TenantManager, create_backend};

pub async fn handle_status(
    tenant: Option<String>,
    config: Config,
    format: OutputFormat,
) -> Result<()> {
    let formatter = get_formatter(format);

    let embedder = EmbeddingClient::new(&config.embedding)?;
    let embedding_connected = embedder.health_check().await.is_ok();

    let llm_connected = match OllamaClient::new(&config.llm) {
        Ok(client) => client.health_check().await.is_ok(),
        Err(_) => false,
    };

    let backend = create_backend(&config.vector_store, config.embedding.dimension as usize).ok();
    let vector_store_connected = match &backend {
        Some(backend) => backend.health_check().await.unwrap_or(false),
        None => false,
    };

    let tenant = match (tenant, backend) {
        (Some(tenant), Some(backend)) if vector_store_connected => {
            let manager = TenantManager::new(
                backend,
                Arc::new(embedder),
                &config.indexing,
                config.server.documents_dir.clone(),
            );
            manager.status(&tenant).await.ok()
        }
        _ => None,
    };

    let metrics = if config.metrics.enabled {
        Config::metrics_db_path()
            .filter(|path| path.exists())
            .and_then(|path| MetricsStore::open(&path).ok())
            .map(|store| store.get_summary(config.metrics.retention_days))
    } else {
        None
    };

    let status = StatusInfo {
        vector_store_driver: config.vector_store.driver.to_string(),
        vector_store_url: config.vector_store.url.clone(),
        vector_store_connected,
        embedding_url: config.embedding.url.clone(),
        embedding_connected,
        llm_url: config.llm.url.clone(),
        llm_model: config.llm.model.clone(),
        llm_connected,
        tenant,
        metrics,
    };

    print!("{}", formatter.format_status(&status));

    if !vector_store_connected && config.vector_store.driver == VectorDriver::Qdrant {
        eprintln!();
        eprintln!("Warning: Qdrant not running. Start with: docker-compose up -d qdrant");
    }
    if !embedding_connected {
        eprintln!("Warning: embedding server not reachable at {}", config.embedding.url);
    }
    if !llm_connected {
        eprintln!("Warning: LLM server not reachable at {}", config.llm.url);
    }

    Ok(())
}
