use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::model::{ChunkId, ChunkRecord};

/// Retrieves the ids of the corpus chunks nearest to a query vector.
#[async_trait]
pub trait ChunkRetriever: Send + Sync {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ChunkId>>;
}

/// Pre-indexed chunk corpus held in a Qdrant collection, accessed over REST.
pub struct QdrantChunkIndex {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

impl QdrantChunkIndex {
    pub fn new(base_url: impl Into<String>, collection_name: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            collection_name: collection_name.into(),
        }
    }

    /// Create the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let list: CollectionList = response.json().await?;
        if list
            .result
            .collections
            .iter()
            .any(|c| c.name == self.collection_name)
        {
            debug!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine".to_string(),
            },
        };

        let response = self.client.put(&url).json(&create_req).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to create collection: {}", error_text);
        }

        info!(collection = %self.collection_name, dimension, "Created collection");
        Ok(())
    }

    /// Index chunks with their precomputed embeddings, pairwise.
    pub async fn upsert_chunks(&self, chunks: &[ChunkRecord], vectors: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "Got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        let points = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload = HashMap::new();
                payload.insert("chunk_id".to_string(), serde_json::json!(chunk.id));
                payload.insert("document_id".to_string(), serde_json::json!(chunk.document_id));
                payload.insert("sequence".to_string(), serde_json::json!(chunk.sequence));
                Point {
                    id: point_id(&chunk.id),
                    vector,
                    payload,
                }
            })
            .collect();

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );
        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints { points })
            .send()
            .await
            .context("Failed to send upsert request")?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to upsert points: {}", error_text);
        }

        Ok(())
    }
}

#[async_trait]
impl ChunkRetriever for QdrantChunkIndex {
    async fn search(&self, vector: &[f32], top_k: usize) -> Result<Vec<ChunkId>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let request = SearchRequest {
            vector,
            limit: top_k,
            with_payload: true,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send search request")?;

        if !response.status().is_success() {
            anyhow::bail!("Search request failed: {}", response.status());
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse search response")?;

        Ok(chunk_ids_from_hits(body.result))
    }
}

fn chunk_ids_from_hits(hits: Vec<ScoredPoint>) -> Vec<ChunkId> {
    hits.into_iter()
        .filter_map(|hit| {
            let id = hit.payload.get("chunk_id")?.as_str()?.to_string();
            debug!(chunk_id = %id, score = hit.score, "Search hit");
            Some(id)
        })
        .collect()
}

/// Qdrant point ids must be integers or UUIDs; chunk ids are hex digests,
/// so their leading 64 bits serve directly.
fn point_id(chunk_id: &str) -> u64 {
    chunk_id
        .get(..16)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .unwrap_or_else(|| {
            use std::collections::hash_map::DefaultHasher;
            use std::hash::{Hash, Hasher};

            let mut hasher = DefaultHasher::new();
            chunk_id.hash(&mut hasher);
            hasher.finish()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_uses_digest_prefix() {
        assert_eq!(point_id("00000000000000ffabcdef"), 255);
        // Non-hex ids still map deterministically
        assert_eq!(point_id("not-a-digest"), point_id("not-a-digest"));
    }

    #[test]
    fn test_hits_without_chunk_id_are_skipped() {
        let body: SearchResponse = serde_json::from_str(
            r#"{"result": [
                {"id": 1, "score": 0.9, "payload": {"chunk_id": "abc"}},
                {"id": 2, "score": 0.8, "payload": {}},
                {"id": 3, "score": 0.7}
            ]}"#,
        )
        .unwrap();

        assert_eq!(chunk_ids_from_hits(body.result), vec!["abc".to_string()]);
    }
}
