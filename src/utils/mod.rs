//! Utility modules.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{calculate_checksum, file_extension, secure_filename, tenant_key};
pub use retry::{RetryConfig, RetryResult, Retryable, retry, with_retry};
pub use text::{estimate_tokens, has_meaningful_content, normalize_whitespace};
