use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ragdocs::cli::commands::{
    handle_add, handle_chat, handle_config, handle_delete, handle_delete_file, handle_serve,
    handle_status,
};
use ragdocs::cli::{Cli, Commands, load_config};

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "ragdocs=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let Cli {
        config: config_path,
        format,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);
    let format = format.unwrap_or_default();

    let config = || load_config(config_path.as_deref());

    match command {
        Commands::Serve(args) => handle_serve(args, config()?).await,
        Commands::Add(args) => handle_add(args, config()?, format, verbose).await,
        Commands::Delete { tenant } => handle_delete(tenant, config()?, format).await,
        Commands::DeleteFile { tenant, path } => {
            handle_delete_file(tenant, path, config()?, format).await
        }
        Commands::Chat(args) => handle_chat(args, config()?, format, verbose).await,
        Commands::Status { tenant } => handle_status(tenant, config()?, format).await,
        Commands::Config(cmd) => handle_config(cmd, config_path.as_deref(), format),
    }
}
