use anyhow::{Context, Result};
use extract::{ExtractorConfig, RetryPolicy};
use ingest::ChunkerConfig;
use resolve::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::PipelineConfig;

/// Application configuration. Every section and field has a default, so a
/// config file only needs to name what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub chunking: ChunkingConfig,
    pub extraction: ExtractionConfig,
    pub resolution: ResolutionConfig,
    pub search: SearchConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub request_timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 120,
            temperature: 0.1,
            max_tokens: 4000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Consecutive external-service chunk failures that fail the job
    pub circuit_breaker_threshold: usize,
    pub progress_start: u8,
    pub progress_end: u8,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            circuit_breaker_threshold: 3,
            progress_start: 30,
            progress_end: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub use_llm: bool,
    pub llm_confirm_threshold: u8,
    pub llm_batch_size: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            use_llm: true,
            llm_confirm_threshold: 60,
            llm_batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub enabled: bool,
    pub top_k: usize,
    /// LLM-generated query variations searched alongside the query
    pub num_expansions: usize,
    pub qdrant_url: String,
    pub collection: String,
    pub embedding_dimension: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: 20,
            num_expansions: 15,
            qdrant_url: "http://localhost:6333".to_string(),
            collection: "apor_chunks".to_string(),
            embedding_dimension: 768,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub neo4j: Option<Neo4jConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("chunking.chunk_size must be positive");
        }
        if self.extraction.circuit_breaker_threshold == 0 {
            anyhow::bail!("extraction.circuit_breaker_threshold must be positive");
        }
        if self.extraction.progress_start > self.extraction.progress_end
            || self.extraction.progress_end > 100
        {
            anyhow::bail!("extraction progress range must satisfy start <= end <= 100");
        }
        if self.resolution.llm_batch_size == 0 {
            anyhow::bail!("resolution.llm_batch_size must be positive");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            self.retry.initial_backoff_ms,
            self.retry.max_backoff_ms,
        )
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size_tokens: self.chunking.chunk_size,
            overlap_tokens: self.chunking.overlap,
        }
    }

    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            use_llm: self.resolution.use_llm,
            llm_confirm_threshold: self.resolution.llm_confirm_threshold,
            llm_batch_size: self.resolution.llm_batch_size,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunking: self.chunker_config(),
            circuit_breaker_threshold: self.extraction.circuit_breaker_threshold,
            progress_start: self.extraction.progress_start,
            progress_end: self.extraction.progress_end,
            search_top_k: self.search.top_k,
            num_expansions: self.search.num_expansions,
            embedding_dimension: Some(self.search.embedding_dimension),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [llm]
            model = "mistral"

            [resolution]
            use_llm = false
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert!(!config.resolution.use_llm);
        assert_eq!(config.resolution.llm_batch_size, 20);
        assert_eq!(config.extraction.circuit_breaker_threshold, 3);
        assert!(config.export.neo4j.is_none());
        assert_eq!(config.pipeline_config().num_expansions, 15);
    }

    #[test]
    fn test_expansion_can_be_disabled() {
        let config = AppConfig::from_toml("[search]\nnum_expansions = 0\n").unwrap();

        assert_eq!(config.pipeline_config().num_expansions, 0);
        assert_eq!(config.pipeline_config().search_top_k, 20);
    }

    #[test]
    fn test_neo4j_section() {
        let config = AppConfig::from_toml(
            r#"
            [export.neo4j]
            uri = "bolt://localhost:7687"
            user = "neo4j"
            password = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.export.neo4j.unwrap().user, "neo4j");
    }

    #[test]
    fn test_rejects_inverted_progress_range() {
        let err = AppConfig::from_toml(
            r#"
            [extraction]
            progress_start = 80
            progress_end = 40
            "#,
        )
        .unwrap_err();

        assert!(err.to_string().contains("progress range"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apor.toml");
        std::fs::write(&path, "[chunking]\nchunk_size = 500\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.chunker_config().chunk_size_tokens, 500);
        assert_eq!(config.chunker_config().overlap_tokens, 200);
    }
}
