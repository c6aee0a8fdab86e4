//! File loaders keyed by extension.
//!
//! Every supported format is a [`DocumentFormat`] variant. Resolving a path
//! whose extension is not in the table fails with
//! [`LoaderError::UnsupportedFormat`]; nothing is skipped silently here.

mod email;
mod markup;
mod office;
mod pdf;
mod text;

use std::path::Path;

use crate::error::{LoadFailure, LoaderError};
use crate::models::{LoadedDocument, META_CHECKSUM, META_EXTENSION, META_FILE_NAME};
use crate::utils::{calculate_checksum, file_extension};

/// Legacy binary Office documents. They have no loader.
pub const UNSUPPORTED_DOCUMENT_EXTENSIONS: [&str; 2] = ["doc", "ppt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Csv,
    Text,
    Markdown,
    Html,
    Pdf,
    Docx,
    Odt,
    Pptx,
    Epub,
    Email,
    Evernote,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 11] = [
        DocumentFormat::Csv,
        DocumentFormat::Text,
        DocumentFormat::Markdown,
        DocumentFormat::Html,
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Odt,
        DocumentFormat::Pptx,
        DocumentFormat::Epub,
        DocumentFormat::Email,
        DocumentFormat::Evernote,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            DocumentFormat::Csv => &["csv"],
            DocumentFormat::Text => &["txt"],
            DocumentFormat::Markdown => &["md"],
            DocumentFormat::Html => &["html", "htm"],
            DocumentFormat::Pdf => &["pdf"],
            DocumentFormat::Docx => &["docx"],
            DocumentFormat::Odt => &["odt"],
            DocumentFormat::Pptx => &["pptx"],
            DocumentFormat::Epub => &["epub"],
            DocumentFormat::Email => &["eml"],
            DocumentFormat::Evernote => &["enex"],
        }
    }

    /// Case-insensitive lookup; the extension is given without the dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let ext = file_extension(path).unwrap_or_default();
        Self::from_extension(&ext).ok_or_else(|| LoaderError::UnsupportedFormat(format!(".{ext}")))
    }

    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }

    /// Whether directory ingestion should pick the file up: either it has a
    /// loader, or it is a document format without one, which then fails to
    /// load and is reported rather than passed over.
    pub fn is_document(path: &Path) -> bool {
        Self::is_supported(path)
            || file_extension(path)
                .is_some_and(|ext| UNSUPPORTED_DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
    }

    pub fn name(self) -> &'static str {
        match self {
            DocumentFormat::Csv => "csv",
            DocumentFormat::Text => "text",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Html => "html",
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Odt => "odt",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Epub => "epub",
            DocumentFormat::Email => "email",
            DocumentFormat::Evernote => "evernote",
        }
    }

    /// Extract documents from raw file bytes.
    pub fn extract(
        self,
        bytes: &[u8],
        source_path: &str,
    ) -> Result<Vec<LoadedDocument>, LoaderError> {
        match self {
            DocumentFormat::Csv => text::load_csv(bytes, source_path),
            DocumentFormat::Text => text::load_text(bytes, source_path).map(single),
            DocumentFormat::Markdown => markup::load_markdown(bytes, source_path).map(single),
            DocumentFormat::Html => markup::load_html(bytes, source_path).map(single),
            DocumentFormat::Pdf => pdf::load_pdf(bytes, source_path).map(single),
            DocumentFormat::Docx => office::load_docx(bytes, source_path).map(single),
            DocumentFormat::Odt => office::load_odt(bytes, source_path).map(single),
            DocumentFormat::Pptx => office::load_pptx(bytes, source_path).map(single),
            DocumentFormat::Epub => markup::load_epub(bytes, source_path).map(single),
            DocumentFormat::Email => email::load_email(bytes, source_path).map(single),
            DocumentFormat::Evernote => markup::load_enex(bytes, source_path),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn single(doc: LoadedDocument) -> Vec<LoadedDocument> {
    vec![doc]
}

/// Load one file into documents, tagging any failure with the file's path.
///
/// Blocking; callers on the async runtime run this on the blocking pool.
pub fn load_single_document(
    path: &Path,
    max_file_size: u64,
) -> Result<Vec<LoadedDocument>, LoadFailure> {
    let source_path = path.to_string_lossy().to_string();
    load_inner(path, &source_path, max_file_size)
        .map_err(|error| LoadFailure::new(source_path, error))
}

fn load_inner(
    path: &Path,
    source_path: &str,
    max_file_size: u64,
) -> Result<Vec<LoadedDocument>, LoaderError> {
    let format = DocumentFormat::from_path(path)?;

    let size = std::fs::metadata(path)?.len();
    if size > max_file_size {
        return Err(LoaderError::TooLarge {
            size,
            max: max_file_size,
        });
    }

    let bytes = std::fs::read(path)?;
    let checksum = calculate_checksum(&bytes);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = file_extension(path).unwrap_or_default();

    let documents = format.extract(&bytes, source_path)?;

    Ok(documents
        .into_iter()
        .map(|doc| {
            doc.with_metadata(META_FILE_NAME, file_name.clone())
                .with_metadata(META_EXTENSION, extension.clone())
                .with_metadata(META_CHECKSUM, checksum.clone())
        })
        .collect())
}
