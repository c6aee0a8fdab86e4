//! Text splitting into overlapping windows for embedding.

use std::collections::HashMap;

use crate::models::{DocumentChunk, IndexingConfig, LoadedDocument};
use crate::utils::has_meaningful_content;

/// Splits loaded documents into overlapping character windows.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    /// Window size in characters
    chunk_size: usize,
    /// Characters shared by consecutive windows
    overlap: usize,
}

impl TextSplitter {
    pub fn new(config: &IndexingConfig) -> Self {
        Self::with_sizes(config.chunk_size as usize, config.chunk_overlap as usize)
    }

    pub fn with_sizes(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&IndexingConfig::default())
    }

    /// Split documents into chunks.
    ///
    /// `sequence_index` counts per `source_path`, so a file that loads as
    /// several documents (CSV rows, notes) still gets one contiguous
    /// numbering. Windows never span two documents.
    pub fn split_documents(&self, documents: &[LoadedDocument]) -> Vec<DocumentChunk> {
        let mut next_index: HashMap<&str, u32> = HashMap::new();
        let mut chunks = Vec::new();

        for document in documents {
            for text in self.split_text(&document.text) {
                let counter = next_index.entry(document.source_path.as_str()).or_insert(0);
                chunks.push(DocumentChunk {
                    text,
                    source_path: document.source_path.clone(),
                    sequence_index: *counter,
                    extra_metadata: document.metadata.clone(),
                });
                *counter += 1;
            }
        }

        chunks
    }

    /// Split text into overlapping windows, dropping whitespace-only ones.
    pub fn split_text(&self, content: &str) -> Vec<String> {
        let chars: Vec<char> = content.chars().collect();
        let total_chars = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let end = (start + self.chunk_size).min(total_chars);
            let adjusted_end = self.find_break_point(&chars, start, end, total_chars);

            let window: String = chars[start..adjusted_end].iter().collect();
            let window = window.trim();
            if has_meaningful_content(window) {
                chunks.push(window.to_string());
            }

            if adjusted_end >= total_chars {
                break;
            }

            let next = adjusted_end.saturating_sub(self.overlap);
            start = if next > start { next } else { adjusted_end };
        }

        chunks
    }

    /// Find a natural break point near the target end position.
    fn find_break_point(&self, chars: &[char], start: usize, target_end: usize, total: usize) -> usize {
        if target_end >= total {
            return total;
        }

        // Only the last 20% of the window is searched.
        let search_start = target_end
            .saturating_sub(self.chunk_size / 5)
            .max(start + 1);
        if search_start >= target_end {
            return target_end;
        }
        let search_range = &chars[search_start..target_end];

        // Priority: double newline > single newline > period+space > space
        let mut best_break = None;
        let mut last_newline = None;
        let mut last_sentence = None;
        let mut last_space = None;

        for (i, c) in search_range.iter().enumerate() {
            let pos = search_start + i;
            match c {
                '\n' => {
                    if i > 0 && search_range[i - 1] == '\n' {
                        best_break = Some(pos + 1);
                    }
                    last_newline = Some(pos + 1);
                }
                '.' | '!' | '?' => {
                    let next = chars.get(pos + 1);
                    if next.is_some_and(|c| c.is_whitespace()) {
                        last_sentence = Some(pos + 1);
                    }
                }
                ' ' | '\t' => {
                    last_space = Some(pos + 1);
                }
                _ => {}
            }
        }

        best_break
            .or(last_newline)
            .or(last_sentence)
            .or(last_space)
            .unwrap_or(target_end)
    }
}
