use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata keys attached to every loaded document.
pub const META_FILE_NAME: &str = "file_name";
pub const META_EXTENSION: &str = "extension";
pub const META_CHECKSUM: &str = "checksum";

/// Text extracted from one file (or one logical record inside it, such as a
/// CSV row or an Evernote note) before splitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedDocument {
    pub text: String,
    pub source_path: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl LoadedDocument {
    pub fn new(text: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_path: source_path.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A window of text produced by the splitter. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source_path: String,
    pub sequence_index: u32,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, String>,
}

impl DocumentChunk {
    /// Deterministic point id for `(source_path, sequence_index)`.
    pub fn generate_id(source_path: &str, sequence_index: u32) -> String {
        use uuid::Uuid;
        let name = format!("{}:{}", source_path, sequence_index);
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
    }

    pub fn id(&self) -> String {
        Self::generate_id(&self.source_path, self.sequence_index)
    }
}

/// A chunk paired with its embedding, ready for upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub id: String,
    pub embedding: Vec<f32>,
    pub chunk: DocumentChunk,
}

impl EmbeddedChunk {
    pub fn new(chunk: DocumentChunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id(),
            embedding,
            chunk,
        }
    }
}

/// A chunk returned by similarity search, most relevant first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, index: u32) -> DocumentChunk {
        DocumentChunk {
            text: "text".to_string(),
            source_path: path.to_string(),
            sequence_index: index,
            extra_metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_chunk_generate_id() {
        let id = DocumentChunk::generate_id("/docs/acme/a.txt", 5);
        assert_eq!(id.len(), 36);
        assert!(id.chars().filter(|c| *c == '-').count() == 4);
        let id2 = DocumentChunk::generate_id("/docs/acme/a.txt", 5);
        assert_eq!(id, id2);
        let id3 = DocumentChunk::generate_id("/docs/acme/a.txt", 6);
        assert_ne!(id, id3);
    }

    #[test]
    fn test_embedded_chunk_uses_chunk_address() {
        let embedded = EmbeddedChunk::new(chunk("/docs/acme/a.txt", 2), vec![0.5; 4]);
        assert_eq!(embedded.id, DocumentChunk::generate_id("/docs/acme/a.txt", 2));
    }

    #[test]
    fn test_loaded_document_metadata() {
        let doc = LoadedDocument::new("body", "/docs/a.csv").with_metadata("row", "3");
        assert_eq!(doc.metadata.get("row").map(String::as_str), Some("3"));
    }
}
