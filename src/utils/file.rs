//! File utilities for ingestion and tenant storage.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Calculate SHA-256 checksum of bytes.
pub fn calculate_checksum(content: &[u8]) -> String {
    let hash = Sha256::digest(content);
    hex::encode(hash)
}

/// Lower-cased extension of a path, without the dot.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Reduce an uploaded or user-supplied file name to a single safe path
/// component.
///
/// Path separators, control characters and characters rejected by common
/// filesystems become `_`; leading dots are stripped so the result can never
/// be `.` or `..` or a hidden file.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    cleaned.trim_start_matches('.').trim_matches('_').to_string()
}

const PLAIN_TENANT_MAX_LEN: usize = 64;

fn is_plain_tenant_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'
}

/// Name a tenant's collection and document directory are stored under.
///
/// Ids made only of `[a-z0-9_-]` (up to 64 chars) are used as-is. Any other
/// id becomes a lower-cased readable form, a `.`, and the first 16 hex digits
/// of the SHA-256 of the raw id. Plain ids never contain `.`, so distinct ids
/// never share a key. Blank ids have no key.
pub fn tenant_key(tenant: &str) -> Option<String> {
    if tenant.trim().is_empty() {
        return None;
    }
    if tenant.len() <= PLAIN_TENANT_MAX_LEN && tenant.chars().all(is_plain_tenant_char) {
        return Some(tenant.to_string());
    }

    let readable: String = tenant
        .chars()
        .take(48)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if is_plain_tenant_char(c) { c } else { '_' }
        })
        .collect();
    let digest = calculate_checksum(tenant.as_bytes());
    Some(format!("{}.{}", readable, &digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_calculate_checksum() {
        let checksum = calculate_checksum(b"hello world");
        assert_eq!(checksum.len(), 64);
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_file_extension_is_lowercase() {
        assert_eq!(file_extension(&PathBuf::from("A/B.PDF")), Some("pdf".into()));
        assert_eq!(file_extension(&PathBuf::from("README")), None);
    }

    #[test]
    fn test_secure_filename_strips_traversal() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("..\\secret.txt"), "secret.txt");
        assert_eq!(secure_filename("my report.pdf"), "my_report.pdf");
        assert_eq!(secure_filename(".."), "");
        assert_eq!(secure_filename(".hidden"), "hidden");
    }

    #[test]
    fn test_plain_tenant_key_is_unchanged() {
        assert_eq!(tenant_key("globex-1").as_deref(), Some("globex-1"));
        assert_eq!(tenant_key("acme_corp").as_deref(), Some("acme_corp"));
    }

    #[test]
    fn test_tenant_key_keeps_similar_ids_apart() {
        let ids = ["Acme Corp", "acme.corp", "ACME_CORP", "acme_corp", "acme corp"];
        let keys: std::collections::BTreeSet<_> =
            ids.iter().map(|id| tenant_key(id).unwrap()).collect();
        assert_eq!(keys.len(), ids.len());

        let key = tenant_key("Acme Corp").unwrap();
        assert!(key.starts_with("acme_corp."));
        assert_eq!(tenant_key("Acme Corp").unwrap(), key);
    }

    #[test]
    fn test_tenant_key_is_one_safe_component() {
        for id in ["..", ".", "../globex", "a/b", "C:\\x"] {
            let key = tenant_key(id).unwrap();
            assert!(!key.contains('/') && !key.contains('\\'), "{id}");
            assert_ne!(key, "..");
            assert_ne!(key, ".");
        }
        assert!(tenant_key(&"a".repeat(65)).unwrap().contains('.'));
    }

    #[test]
    fn test_blank_tenant_has_no_key() {
        assert_eq!(tenant_key(""), None);
        assert_eq!(tenant_key("   "), None);
    }
}
