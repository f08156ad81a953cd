pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::{Chunk, estimate_tokens};
pub use chunker::{Chunker, ChunkerConfig};
pub use reader::FileReader;

use sha2::{Digest, Sha256};

/// Generate a stable document ID from a title or path
pub fn generate_doc_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Chunk an in-memory document
pub fn ingest_text(document_id: &str, text: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let chunks = Chunker::new(config.clone()).chunk_text(document_id, text);
    tracing::debug!(document_id, chunks = chunks.len(), "Chunked document");
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_id_is_stable() {
        assert_eq!(generate_doc_id("report.txt"), generate_doc_id("report.txt"));
        assert_ne!(generate_doc_id("report.txt"), generate_doc_id("other.txt"));
    }

    #[test]
    fn test_ingest_text_uses_document_id() {
        let chunks = ingest_text("doc-1", "Short text.", &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document_id, "doc-1");
    }
}
