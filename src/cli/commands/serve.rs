use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use crate::models::Config;
use crate::server::{self, AppState};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind (defaults to server.host)
    #[arg(long, env = "RAGDOCS_HOST")]
    pub host: Option<String>,

    /// Port to bind (defaults to server.port)
    #[arg(long, short = 'p', env = "RAGDOCS_PORT")]
    pub port: Option<u16>,
}

pub async fn handle_serve(args: ServeArgs, config: Config) -> Result<()> {
    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    let state = Arc::new(AppState::from_config(&config).context("failed to start service")?);
    tracing::info!(
        documents_dir = %config.server.documents_dir.display(),
        driver = %config.vector_store.driver,
        llm = %config.llm.model,
        "service ready"
    );

    server::serve(Arc::clone(&state), &host, port)
        .await
        .with_context(|| format!("server on {host}:{port} failed"))?;

    // The router is gone once serving stops; drain queued queries.
    if let Ok(state) = Arc::try_unwrap(state) {
        state.scheduler.shutdown().await;
    }
    Ok(())
}
