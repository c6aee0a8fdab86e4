//! Command-line interface for the ragdocs service.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::models::{Config, OutputFormat};

/// Multi-tenant question answering over document collections.
#[derive(Debug, Parser)]
#[command(name = "ragdocs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "RAGDOCS_CONFIG",
        help = "Path to a config.toml file"
    )]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'f', global = true, help = "Output format: text or json")]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        load_config(self.config.as_deref())
    }
}

/// The `--config` file when given, otherwise the default location.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve(commands::ServeArgs),

    /// Index a directory of documents into a collection
    Add(commands::AddArgs),

    /// Delete a collection
    Delete {
        /// Collection (tenant) name
        tenant: String,
    },

    /// Remove one file's chunks from a collection
    DeleteFile {
        /// Collection (tenant) name
        tenant: String,

        /// Source path of the file as it was indexed
        path: String,
    },

    /// Ask questions against a collection
    Chat(commands::ChatArgs),

    /// Check backend connectivity and collection contents
    Status {
        /// Also report this collection
        tenant: Option<String>,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
