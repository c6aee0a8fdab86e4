use crate::error::EmbeddingError;
use crate::models::{DocumentChunk, EmbeddedChunk};
use crate::services::Embedder;

/// Embed chunks in batches of `batch_size`, pairing each with its vector.
///
/// Either every chunk comes back embedded or the call fails; there is no
/// partial result to commit.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: Vec<DocumentChunk>,
    batch_size: usize,
) -> Result<Vec<EmbeddedChunk>, EmbeddingError> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = batch_size.max(1);
    let mut embeddings = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        embeddings.extend(vectors);
    }

    Ok(chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| EmbeddedChunk::new(chunk, embedding))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;
    use std::collections::BTreeMap;

    fn chunk(i: u32) -> DocumentChunk {
        DocumentChunk {
            text: format!("chunk number {i}"),
            source_path: "/d/a.txt".to_string(),
            sequence_index: i,
            extra_metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_embeds_across_batches_in_order() {
        let embedder = HashEmbedder::new(16);
        let chunks: Vec<_> = (0..5).map(chunk).collect();
        let embedded = embed_chunks(&embedder, chunks, 2).await.unwrap();

        assert_eq!(embedded.len(), 5);
        for (i, e) in embedded.iter().enumerate() {
            assert_eq!(e.chunk.sequence_index, i as u32);
            assert_eq!(e.embedding, embedder.embed(&e.chunk.text).await.unwrap());
        }
        assert_eq!(embedder.batch_calls(), 3);
    }

    #[tokio::test]
    async fn test_empty_input_does_not_call_embedder() {
        let embedder = HashEmbedder::new(16);
        let embedded = embed_chunks(&embedder, Vec::new(), 8).await.unwrap();
        assert!(embedded.is_empty());
        assert_eq!(embedder.batch_calls(), 0);
    }
}
