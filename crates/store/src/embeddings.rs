use anyhow::{Context, Result};
use async_trait::async_trait;
use extract::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("Embedding service error: {0}")]
    Service(String),

    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

impl EmbeddingError {
    pub fn is_external_service(&self) -> bool {
        matches!(self, EmbeddingError::Service(_))
    }
}

/// Embedding collaborator: one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Check that a response holds one vector per request text and, when a
/// dimension is configured, that every vector has it.
pub fn validate_embeddings(
    expected_count: usize,
    dimension: Option<usize>,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }

    if let Some(expected) = dimension {
        if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                index,
                expected,
                actual: v.len(),
            });
        }
    }

    Ok(())
}

/// Embed and validate in one step.
pub async fn embed_checked(
    embedder: &dyn Embedder,
    texts: &[String],
    dimension: Option<usize>,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let vectors = embedder.embed(texts).await?;
    validate_embeddings(texts.len(), dimension, &vectors)?;
    Ok(vectors)
}

/// Ollama batch embedding client (`/api/embed`).
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build embedding HTTP client")?;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.base_url);
        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let body: EmbedResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        Ok(body.embeddings)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = texts.len(), model = %self.model, "Embedding texts");

        self.retry
            .run("embed", |_: &anyhow::Error| true, || self.embed_once(texts))
            .await
            .map_err(|e| EmbeddingError::Service(format!("{:#}", e)))
    }
}
