use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::load_config;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Write a config file with default values")]
    Init {
        #[arg(long, short = 'f', help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show,
    #[command(about = "Show configuration file paths")]
    Path,
}

pub fn handle_config(
    cmd: ConfigCommand,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        ConfigCommand::Init { force } => handle_init(config_path, force, format),
        ConfigCommand::Show => handle_show(config_path, format),
        ConfigCommand::Path => handle_path(config_path),
    }
}

fn target_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(Config::config_path)
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))
}

fn handle_init(config_path: Option<&Path>, force: bool, format: OutputFormat) -> Result<()> {
    let path = init_config(&target_path(config_path)?, force)?;
    println!(
        "{}",
        get_formatter(format).format_message(&format!("Created config at: {}", path.display()))
    );
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<PathBuf> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }
    Config::default()
        .save_to(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn handle_show(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = redacted(load_config(config_path)?);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    match config_path.map(Path::to_path_buf).or_else(Config::config_path) {
        Some(path) if path.exists() => println!("# Config: {}", path.display()),
        _ => println!("# Config: defaults (no config file)"),
    }
    println!();
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Mask secrets before printing.
fn redacted(mut config: Config) -> Config {
    if config.vector_store.api_key.is_some() {
        config.vector_store.api_key = Some("********".to_string());
    }
    config
}

fn handle_path(config_path: Option<&Path>) -> Result<()> {
    println!("Configuration paths:");
    println!();

    let path = target_path(config_path)?;
    if path.exists() {
        println!("Config (active): {}", path.display());
    } else {
        println!("Config (would be): {}", path.display());
    }

    if let Some(metrics) = Config::metrics_db_path() {
        println!("Metrics database: {}", metrics.display());
    }

    if let Ok(cwd) = std::env::current_dir() {
        let env_path = cwd.join(".env");
        if env_path.exists() {
            println!(".env file (active): {}", env_path.display());
        } else {
            println!(".env file (would be): {}", env_path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragdocs").join("config.toml");

        init_config(&path, false).unwrap();
        assert!(Config::load_from(&path).is_ok());
        assert!(init_config(&path, false).is_err());
        assert!(init_config(&path, true).is_ok());
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let mut config = Config::default();
        config.vector_store.api_key = Some("secret".to_string());
        let shown = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("********"));
    }
}
