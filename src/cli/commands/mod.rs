mod chat;
mod config;
mod ingest;
mod serve;
mod status;

pub use chat::ChatArgs;
pub use config::ConfigCommand;
pub use ingest::AddArgs;
pub use serve::ServeArgs;

pub use chat::handle_chat;
pub use config::handle_config;
pub use ingest::{handle_add, handle_delete, handle_delete_file};
pub use serve::handle_serve;
pub use status::handle_status;
