//! HTTP service: session login, queued queries and tenant index management.

pub mod error;
pub mod handlers;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::models::Config;
use crate::services::chain::DefaultChainFactory;
use crate::services::{
    EmbeddingClient, HttpIdentityResolver, InferenceScheduler, MetricsStore, OllamaClient,
    SessionRegistry, SystemClock, TenantManager, create_backend,
};

/// Shared state behind every route.
pub struct AppState {
    pub sessions: SessionRegistry,
    pub scheduler: InferenceScheduler,
    pub tenants: TenantManager,
    pub metrics: Option<Arc<MetricsStore>>,
    pub retention_days: u32,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        sessions: SessionRegistry,
        scheduler: InferenceScheduler,
        tenants: TenantManager,
        metrics: Option<Arc<MetricsStore>>,
        retention_days: u32,
    ) -> Self {
        Self {
            sessions,
            scheduler,
            tenants,
            metrics,
            retention_days,
            started_at: Instant::now(),
        }
    }

    /// Wire the HTTP-backed collaborators from configuration. Must be called
    /// inside a tokio runtime, which hosts the inference worker.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
        let model = Arc::new(OllamaClient::new(&config.llm)?);
        let backend = create_backend(&config.vector_store, config.embedding.dimension as usize)?;
        let resolver = Arc::new(HttpIdentityResolver::new(&config.identity)?);

        let factory = Arc::new(DefaultChainFactory::new(
            Arc::clone(&backend),
            embedder.clone(),
            model,
            config.retrieval.clone(),
        ));
        let sessions = SessionRegistry::new(
            resolver,
            factory,
            Arc::new(SystemClock),
            config.session.ttl(),
        );
        let tenants = TenantManager::new(
            backend,
            embedder,
            &config.indexing,
            config.server.documents_dir.clone(),
        );

        let metrics = open_metrics(config).map(Arc::new);
        let scheduler = InferenceScheduler::start(metrics.clone());

        Ok(Self::new(
            sessions,
            scheduler,
            tenants,
            metrics,
            config.metrics.retention_days,
        ))
    }
}

fn open_metrics(config: &Config) -> Option<MetricsStore> {
    if !config.metrics.enabled {
        return None;
    }
    let path = Config::metrics_db_path()?;
    match MetricsStore::open(&path) {
        Ok(store) => {
            let removed = store.cleanup(config.metrics.retention_days);
            tracing::info!(
                path = %path.display(),
                retention_days = config.metrics.retention_days,
                removed,
                "metrics enabled"
            );
            Some(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to open metrics database");
            None
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/query", post(handlers::query))
        .route(
            "/vectorstore",
            get(handlers::get_vectorstore)
                .post(handlers::add_to_vectorstore)
                .delete(handlers::delete_vectorstore),
        )
        .route("/vectorstore/:file", delete(handlers::delete_file))
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c. Queued queries finish before the worker stops.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(%addr, driver = %state.tenants.backend().driver(), "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
