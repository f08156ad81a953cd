pub mod llm;
pub mod mock;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use llm::{CompletionRequest, LlmClient, LlmError, OllamaClient, complete_json, parse_json};
pub use mock::ScriptedLlm;
pub use retry::RetryPolicy;
pub use schema::{
    ChunkExtraction, EntityBatch, EntityType, ExtractedEntity, ExtractedRelationship,
    RelationshipBatch,
};

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

pub const RELATIONSHIP_TASK: &str = "extract_relationships";

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1, // Low temperature for extraction
            max_tokens: 4000,
        }
    }
}

/// Multi-pass APOR extraction over one chunk: four category passes run
/// concurrently, then one relationship pass over everything they found.
#[derive(Clone)]
pub struct Extractor {
    llm: Arc<dyn LlmClient>,
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            config: ExtractorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract entities and relationships from a chunk of text.
    ///
    /// A failing category pass contributes nothing. Only when every pass
    /// fails and at least one failure came from the LLM service itself is
    /// that error returned, so callers can tell a dead service apart from a
    /// chunk that simply yielded nothing.
    pub async fn extract(&self, chunk_text: &str) -> Result<ChunkExtraction, LlmError> {
        let passes = join_all(EntityType::ALL.iter().map(|&entity_type| async move {
            (entity_type, self.extract_type(chunk_text, entity_type).await)
        }))
        .await;

        let mut extraction = ChunkExtraction::default();
        let mut service_error = None;

        for (entity_type, outcome) in passes {
            match outcome {
                Ok(batch) => {
                    // Dropped items don't consume an index, so temp ids stay dense
                    let mut index = 0;
                    for raw in batch.entities {
                        if let Some(entity) = ExtractedEntity::from_raw(entity_type, index, raw) {
                            extraction.entities.push(entity);
                            index += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "Extraction pass failed");
                    if e.is_external_service() {
                        service_error = Some(e);
                    }
                    extraction.failed_passes.push(entity_type);
                }
            }
        }

        if extraction.failed_passes.len() == EntityType::ALL.len() {
            if let Some(e) = service_error {
                return Err(e);
            }
        }

        if extraction.entities.len() < 2 {
            debug!(
                entities = extraction.entities.len(),
                "Too few entities, skipping relationship extraction"
            );
            return Ok(extraction);
        }

        match self.extract_relationships(chunk_text, &extraction.entities).await {
            Ok(relationships) => extraction.relationships = relationships,
            Err(e) => warn!(error = %e, "Relationship extraction failed"),
        }

        Ok(extraction)
    }

    async fn extract_type(
        &self,
        chunk_text: &str,
        entity_type: EntityType,
    ) -> Result<EntityBatch, LlmError> {
        let request = CompletionRequest::new(
            entity_type.extraction_task(),
            prompt::build_entity_prompt(entity_type, chunk_text),
        )
        .with_schema(prompt::entity_schema())
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        complete_json(self.llm.as_ref(), &request).await
    }

    async fn extract_relationships(
        &self,
        chunk_text: &str,
        entities: &[ExtractedEntity],
    ) -> Result<Vec<ExtractedRelationship>, LlmError> {
        let request = CompletionRequest::new(
            RELATIONSHIP_TASK,
            prompt::build_relationship_prompt(chunk_text, entities),
        )
        .with_schema(prompt::relationship_schema())
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let batch: RelationshipBatch = complete_json(self.llm.as_ref(), &request).await?;

        Ok(batch
            .relationships
            .into_iter()
            .filter_map(ExtractedRelationship::from_raw)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(llm: &ScriptedLlm) -> Extractor {
        Extractor::new(Arc::new(llm.clone()))
    }

    fn script_empty_passes(llm: &ScriptedLlm) {
        for t in EntityType::ALL {
            llm.respond_always(t.extraction_task(), r#"{"entities": []}"#);
        }
    }

    #[tokio::test]
    async fn test_collects_entities_from_all_passes() {
        let llm = ScriptedLlm::new();
        script_empty_passes(&llm);
        llm.respond(
            "extract_actor",
            r#"{"entities": [
                {"label": "Congress", "confidence": 95, "quote": "Congress passed", "aliases": []},
                {"label": "", "confidence": 10, "quote": ""},
                {"label": "White House", "confidence": 80, "quote": "the White House"}
            ]}"#,
        );
        llm.respond(
            "extract_policy",
            r#"{"entities": [{"label": "Tariff Act", "confidence": 90, "quote": "the Tariff Act"}]}"#,
        );
        llm.respond(
            RELATIONSHIP_TASK,
            r#"{"relationships": [
                {"source": "Congress", "target": "Tariff Act", "relationship": "passes", "confidence": 85},
                {"source": "Congress", "target": "", "relationship": "passes"}
            ]}"#,
        );

        let result = extractor(&llm).extract("Congress passed the Tariff Act.").await.unwrap();

        let ids: Vec<&str> = result.entities.iter().map(|e| e.temp_id.as_str()).collect();
        assert_eq!(ids, vec!["actor_0", "actor_1", "policy_0"]);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(result.relationships[0].relationship_type, "passes");
        assert!(result.failed_passes.is_empty());
    }

    #[tokio::test]
    async fn test_relationship_pass_receives_entity_listing() {
        let llm = ScriptedLlm::new();
        script_empty_passes(&llm);
        llm.respond(
            "extract_actor",
            r#"{"entities": [{"label": "EU", "confidence": 90, "quote": "EU"}]}"#,
        );
        llm.respond(
            "extract_risk",
            r#"{"entities": [{"label": "Trade war", "confidence": 60, "quote": "trade war"}]}"#,
        );
        llm.respond(RELATIONSHIP_TASK, r#"{"relationships": []}"#);

        extractor(&llm).extract("The EU fears a trade war.").await.unwrap();

        let calls = llm.calls();
        let rel_call = calls.iter().find(|c| c.task == RELATIONSHIP_TASK).unwrap();
        assert!(rel_call.prompt.contains("- EU (actor)"));
        assert!(rel_call.prompt.contains("- Trade war (risk)"));
        assert!(rel_call.prompt.contains("The EU fears a trade war."));
    }

    #[tokio::test]
    async fn test_single_entity_skips_relationship_pass() {
        let llm = ScriptedLlm::new();
        script_empty_passes(&llm);
        llm.respond(
            "extract_actor",
            r#"{"entities": [{"label": "NATO", "confidence": 90, "quote": "NATO"}]}"#,
        );

        let result = extractor(&llm).extract("NATO met.").await.unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(llm.call_count(RELATIONSHIP_TASK), 0);
    }

    #[tokio::test]
    async fn test_failed_pass_is_isolated() {
        let llm = ScriptedLlm::new();
        script_empty_passes(&llm);
        llm.fail("extract_outcome", LlmError::Communication("timeout".into()));
        llm.respond(
            "extract_actor",
            r#"{"entities": [{"label": "IMF", "confidence": 90, "quote": "IMF"}]}"#,
        );

        let result = extractor(&llm).extract("The IMF warned.").await.unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.failed_passes, vec![EntityType::Outcome]);
    }

    #[tokio::test]
    async fn test_all_passes_down_surfaces_service_error() {
        let llm = ScriptedLlm::new();
        for t in EntityType::ALL {
            llm.fail_always(t.extraction_task(), LlmError::Unauthorized("bad key".into()));
        }

        let err = extractor(&llm).extract("anything").await.unwrap_err();

        assert!(matches!(err, LlmError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_all_passes_unparseable_is_not_a_service_error() {
        let llm = ScriptedLlm::new();
        for t in EntityType::ALL {
            llm.respond_always(t.extraction_task(), "I cannot comply");
        }

        let result = extractor(&llm).extract("anything").await.unwrap();

        assert!(result.entities.is_empty());
        assert_eq!(result.failed_passes.len(), 4);
    }

    #[tokio::test]
    async fn test_relationship_failure_keeps_entities() {
        let llm = ScriptedLlm::new();
        script_empty_passes(&llm);
        llm.respond(
            "extract_actor",
            r#"{"entities": [
                {"label": "Fed", "confidence": 90, "quote": "Fed"},
                {"label": "ECB", "confidence": 90, "quote": "ECB"}
            ]}"#,
        );
        llm.fail(RELATIONSHIP_TASK, LlmError::RateLimited("quota".into()));

        let result = extractor(&llm).extract("Fed and ECB.").await.unwrap();

        assert_eq!(result.entities.len(), 2);
        assert!(result.relationships.is_empty());
    }
}
