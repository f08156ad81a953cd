use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Rough token estimate used throughout ingestion: ~4 characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_id: String,
    /// 0-based position of this chunk within its document
    pub sequence: usize,
    pub content: String,
    pub offset: (usize, usize), // [start, end) character positions in the stripped source text
    pub token_estimate: usize,
}

impl Chunk {
    pub fn new(document_id: &str, sequence: usize, content: String, offset: (usize, usize)) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(document_id, sequence, &content);
        let token_estimate = estimate_tokens(&content);

        Self {
            document_id: document_id.to_string(),
            chunk_id,
            sequence,
            content,
            offset,
            token_estimate,
        }
    }

    fn generate_chunk_id(document_id: &str, sequence: usize, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(sequence.to_string().as_bytes());
        hasher.update(content.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}
