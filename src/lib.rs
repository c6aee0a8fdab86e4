pub mod cli;
pub mod error;
pub mod loaders;
pub mod models;
pub mod server;
pub mod services;
pub mod utils;

#[cfg(test)]
mod testing;

pub use cli::{Cli, Commands};
pub use error::AppError;
pub use models::{Config, OutputFormat};
