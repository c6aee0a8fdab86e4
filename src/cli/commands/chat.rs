use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::{
    ChainFactory, DefaultChainFactory, EmbeddingClient, InferenceScheduler, OllamaClient,
    RetrievalChain, create_backend,
};

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Collection (tenant) to ask
    pub tenant: String,

    /// Question to ask; starts an interactive session when omitted
    pub query: Option<String>,
}

pub async fn handle_chat(
    args: ChatArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);

    let embedder = Arc::new(
        EmbeddingClient::new(&config.embedding).context("failed to create embedding client")?,
    );
    let model = Arc::new(OllamaClient::new(&config.llm).context("failed to create LLM client")?);
    let backend = create_backend(&config.vector_store, config.embedding.dimension as usize)
        .context("failed to connect to vector store")?;

    if !backend.collection_exists(&args.tenant).await? {
        eprintln!(
            "{} collection {} does not exist; answers will decline",
            style("Warning:").yellow(),
            args.tenant
        );
    }

    let factory = DefaultChainFactory::new(backend, embedder, model, config.retrieval.clone());
    let chain = factory
        .build(&args.tenant)
        .await
        .context("failed to build retrieval chain")?;

    let scheduler = InferenceScheduler::start(None);
    let result = match args.query {
        Some(query) => ask(&scheduler, &chain, &query, formatter.as_ref(), verbose).await,
        None => interactive(&scheduler, &chain, formatter.as_ref(), verbose).await,
    };
    scheduler.shutdown().await;
    result
}

async fn ask(
    scheduler: &InferenceScheduler,
    chain: &Arc<RetrievalChain>,
    query: &str,
    formatter: &dyn Formatter,
    verbose: bool,
) -> Result<()> {
    let start = Instant::now();
    let completed = scheduler.submit(query, Arc::clone(chain)).await?;
    print!("{}", formatter.format_answer(&completed.result));
    if verbose {
        eprintln!("Answered in {}ms", start.elapsed().as_millis());
    }
    Ok(())
}

async fn interactive(
    scheduler: &InferenceScheduler,
    chain: &Arc<RetrievalChain>,
    formatter: &dyn Formatter,
    verbose: bool,
) -> Result<()> {
    eprintln!("Type your question, or 'exit' to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("\n{} ", style("Q:").cyan().bold());
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" || query == "quit" {
            break;
        }

        if let Err(e) = ask(scheduler, chain, query, formatter, verbose).await {
            eprint!("{}", formatter.format_error(&format!("{e:#}")));
        }
    }
    Ok(())
}
