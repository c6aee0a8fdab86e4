use crate::error::LoaderError;
use crate::models::LoadedDocument;
use crate::utils::normalize_whitespace;

pub(super) fn load_pdf(bytes: &[u8], source_path: &str) -> Result<LoadedDocument, LoaderError> {
    let text = pdf_extract::extract_text_from_mem(bytes).map_err(LoaderError::parse)?;
    Ok(LoadedDocument::new(normalize_whitespace(&text), source_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_is_a_load_error() {
        let result = std::panic::catch_unwind(|| load_pdf(b"not a pdf at all", "/d/b.pdf"));
        // Malformed input must never come back as a successful document.
        assert!(!matches!(result, Ok(Ok(_))));
    }
}
