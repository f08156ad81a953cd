use chrono::Utc;
use extract::{CompletionRequest, EntityType, LlmClient};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use store::{
    AnalysisId, AnalysisStore, Citation, CitationRole, ConnectedEntity, Entity, EntityId,
    EntitySummary,
};
use tracing::{debug, info};

use crate::PipelineError;

pub const ENTITY_SUMMARY_TASK: &str = "entity_summary";

/// Provenance quotes offered per entity
const FOCUS_EVIDENCE: usize = 3;
const CONNECTED_EVIDENCE: usize = 2;

const UNTITLED_DOCUMENT: &str = "Untitled document";

static CITATION_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Cache key for a summary. Type order and repeats do not matter.
pub fn summary_cache_key(
    analysis_id: AnalysisId,
    entity_id: EntityId,
    types: &[EntityType],
) -> String {
    let selected: BTreeSet<EntityType> = types.iter().copied().collect();
    let names: Vec<&str> = selected.iter().map(|t| t.as_str()).collect();

    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", analysis_id, entity_id, names.join(",")).as_bytes());
    hex::encode(hasher.finalize())
}

/// Numbers of the `[n]` markers in `text`.
pub fn citation_markers(text: &str) -> BTreeSet<usize> {
    CITATION_MARKER
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// Analytical summaries of one entity and its neighbourhood, grounded in
/// numbered provenance quotes.
#[derive(Clone)]
pub struct EntitySummarizer {
    llm: Arc<dyn LlmClient>,
    temperature: f32,
    max_tokens: u32,
}

impl EntitySummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            temperature: 0.3,
            max_tokens: 1500,
        }
    }

    /// Summarize an entity through its connections to entities of the
    /// selected types. Only evidence the text actually cites is returned.
    ///
    /// With no matching connections the LLM is not called and the summary
    /// says so.
    pub async fn summarize(
        &self,
        store: &dyn AnalysisStore,
        analysis_id: AnalysisId,
        entity_id: EntityId,
        types: &[EntityType],
    ) -> Result<EntitySummary, PipelineError> {
        let connections = store.connections(analysis_id, entity_id).await?;
        let focus = &connections.entity;
        let connected = connections.of_types(types);
        let selected_types: Vec<EntityType> =
            types.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();

        let summary = |text: String, citations: Vec<Citation>| EntitySummary {
            analysis_id,
            entity_id: focus.id,
            entity_label: focus.label.clone(),
            selected_types: selected_types.clone(),
            summary: text,
            citations,
            generated_at: Utc::now(),
        };

        if connected.is_empty() {
            debug!(entity = %focus.label, "No connections of the selected types");
            return Ok(summary(
                format!("No connections found for {} with the selected types.", focus.label),
                Vec::new(),
            ));
        }

        let evidence = self.gather_evidence(store, analysis_id, focus, &connected).await?;
        let request = CompletionRequest::new(
            ENTITY_SUMMARY_TASK,
            build_summary_prompt(focus, &connected, &evidence),
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens);

        let text = self.llm.complete(&request).await?.trim().to_string();
        let cited = citation_markers(&text);
        let citations: Vec<Citation> = evidence
            .into_iter()
            .filter(|c| cited.contains(&c.id))
            .collect();

        info!(
            entity = %focus.label,
            connections = connected.len(),
            citations = citations.len(),
            "Generated entity summary"
        );
        Ok(summary(text, citations))
    }

    /// Number provenance quotes: the focus entity's first, then each
    /// distinct neighbour's in connection order.
    async fn gather_evidence(
        &self,
        store: &dyn AnalysisStore,
        analysis_id: AnalysisId,
        focus: &Entity,
        connected: &[&ConnectedEntity],
    ) -> Result<Vec<Citation>, PipelineError> {
        let mut sources = vec![(focus.id, CitationRole::FocusEntity, FOCUS_EVIDENCE)];
        let mut seen = HashSet::from([focus.id]);
        for c in connected {
            if seen.insert(c.entity_id) {
                sources.push((c.entity_id, CitationRole::ConnectedEntity, CONNECTED_EVIDENCE));
            }
        }

        let mut evidence: Vec<Citation> = Vec::new();
        for (entity_id, role, limit) in sources {
            let quotes = store
                .provenance(analysis_id, entity_id)
                .await?
                .into_iter()
                .filter(|p| !p.quote.trim().is_empty())
                .take(limit);
            for p in quotes {
                let document_title = document_title(store, &p.chunk_id).await?;
                evidence.push(Citation {
                    id: evidence.len() + 1,
                    entity_id,
                    role,
                    text: p.quote,
                    chunk_id: p.chunk_id,
                    document_title,
                    confidence: p.confidence,
                });
            }
        }
        Ok(evidence)
    }
}

async fn document_title(store: &dyn AnalysisStore, chunk_id: &str) -> Result<String, PipelineError> {
    let chunk = store.chunk(chunk_id).await?;
    Ok(store
        .document(&chunk.document_id)
        .await?
        .map(|d| d.title)
        .unwrap_or_else(|| UNTITLED_DOCUMENT.to_string()))
}

fn build_summary_prompt(focus: &Entity, connected: &[&ConnectedEntity], evidence: &[Citation]) -> String {
    let mut prompt = String::from(
        "You are a policy analyst writing a briefing about one entity in a knowledge graph.\n\n",
    );

    prompt.push_str(&format!(
        "FOCUS ENTITY:\n- {} ({})\n",
        focus.label, focus.entity_type
    ));

    prompt.push_str("\nCONNECTED ENTITIES:\n");
    for c in connected {
        let (source, target) = if c.outgoing {
            (focus.label.as_str(), c.label.as_str())
        } else {
            (c.label.as_str(), focus.label.as_str())
        };
        prompt.push_str(&format!(
            "- {} [{} {} {}] ({}, confidence {})\n",
            c.label, source, c.relationship_type, target, c.entity_type, c.confidence
        ));
    }

    if !evidence.is_empty() {
        prompt.push_str("\nSOURCE EVIDENCE:\n");
        for e in evidence {
            prompt.push_str(&format!("[{}] \"{}\" - {}\n", e.id, e.text, e.document_title));
        }
    }

    prompt.push_str(
        "\nINSTRUCTIONS:\n\
        Write 2-3 paragraphs analysing the focus entity's role and how it relates to the connected entities.\n\
        Support claims with the evidence numbers in square brackets, for example [1] or [2].\n\
        Cite only the evidence listed above. Do NOT use markdown formatting.\n\n\
        SUMMARY:",
    );

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{ChunkExtraction, ExtractedEntity, ExtractedRelationship, LlmError, ScriptedLlm};
    use resolve::{Resolver, ResolverConfig};
    use store::MemoryStore;

    fn entity(entity_type: EntityType, label: &str, quote: &str) -> ExtractedEntity {
        ExtractedEntity {
            temp_id: format!("{}_0", entity_type),
            entity_type,
            label: label.to_string(),
            confidence: 80,
            quote: quote.to_string(),
            aliases: vec![],
        }
    }

    fn relationship(source: &str, target: &str, kind: &str) -> ExtractedRelationship {
        ExtractedRelationship {
            source_label: source.to_string(),
            target_label: target.to_string(),
            relationship_type: kind.to_string(),
            confidence: 75,
        }
    }

    /// One chunk per text, each yielding Tariff Act, Congress and Trade war.
    async fn seeded(texts: &[&str]) -> (MemoryStore, AnalysisId) {
        let store = MemoryStore::new();
        let job = store.create_analysis("tariffs").await.unwrap();
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| ingest::Chunk::new("doc-1", i, text.to_string(), (0, text.len())))
            .collect();
        let ids = store.insert_chunks(Some(job.id), chunks).await.unwrap();
        store.save_document("doc-1", "Trade briefing").await.unwrap();

        for (i, chunk_id) in ids.iter().enumerate() {
            let extraction = ChunkExtraction {
                entities: vec![
                    entity(EntityType::Policy, "Tariff Act", &format!("the Tariff Act ({i})")),
                    entity(EntityType::Actor, "Congress", &format!("Congress passed ({i})")),
                    entity(EntityType::Risk, "Trade war", &format!("fears of a trade war ({i})")),
                ],
                relationships: vec![
                    relationship("Congress", "Tariff Act", "passes"),
                    relationship("Tariff Act", "Trade war", "raises"),
                ],
                failed_passes: vec![],
            };
            store.commit_extraction(job.id, chunk_id, &extraction).await.unwrap();
        }
        (store, job.id)
    }

    async fn find(store: &MemoryStore, analysis_id: AnalysisId, label: &str) -> Entity {
        store
            .graph(analysis_id)
            .await
            .unwrap()
            .entities
            .into_iter()
            .find(|e| e.label == label)
            .unwrap()
    }

    fn summarizer(llm: &ScriptedLlm) -> EntitySummarizer {
        EntitySummarizer::new(Arc::new(llm.clone()))
    }

    #[tokio::test]
    async fn test_summary_keeps_only_cited_evidence() {
        let (store, analysis_id) = seeded(&["Congress passed the Tariff Act."]).await;
        let act = find(&store, analysis_id, "Tariff Act").await;
        let llm = ScriptedLlm::new();
        llm.respond(
            ENTITY_SUMMARY_TASK,
            "Congress passed the act [2], which may spark a trade war [3][3]. Unsupported [9].\n",
        );

        let summary = summarizer(&llm)
            .summarize(&store, analysis_id, act.id, &[EntityType::Risk, EntityType::Actor])
            .await
            .unwrap();

        assert_eq!(summary.entity_label, "Tariff Act");
        assert_eq!(summary.selected_types, vec![EntityType::Actor, EntityType::Risk]);
        assert!(summary.summary.ends_with("Unsupported [9]."));
        let ids: Vec<usize> = summary.citations.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(summary.citations[0].text, "Congress passed (0)");
        assert_eq!(summary.citations[0].role, CitationRole::ConnectedEntity);
        assert_eq!(summary.citations[0].document_title, "Trade briefing");

        let request = &llm.calls()[0];
        assert_eq!(request.temperature, 0.3);
        assert_eq!(request.max_tokens, 1500);
        assert!(request.prompt.contains("FOCUS ENTITY:\n- Tariff Act (policy)"));
        assert!(request.prompt.contains("[1] \"the Tariff Act (0)\" - Trade briefing"));
        assert!(request.prompt.contains("Congress [Congress passes Tariff Act]"));
        assert!(request.prompt.contains("Trade war [Tariff Act raises Trade war]"));
    }

    #[tokio::test]
    async fn test_type_filter_limits_connections_and_evidence() {
        let (store, analysis_id) = seeded(&["Congress passed the Tariff Act."]).await;
        let act = find(&store, analysis_id, "Tariff Act").await;
        let llm = ScriptedLlm::new();
        llm.respond(ENTITY_SUMMARY_TASK, "A trade war looms [2].");

        let summary = summarizer(&llm)
            .summarize(&store, analysis_id, act.id, &[EntityType::Risk])
            .await
            .unwrap();

        assert_eq!(summary.citations.len(), 1);
        assert_eq!(summary.citations[0].text, "fears of a trade war (0)");
        let prompt = &llm.calls()[0].prompt;
        assert!(!prompt.contains("Congress"));
    }

    #[tokio::test]
    async fn test_no_matching_connections_skips_llm() {
        let (store, analysis_id) = seeded(&["Congress passed the Tariff Act."]).await;
        let act = find(&store, analysis_id, "Tariff Act").await;
        let llm = ScriptedLlm::new();

        let summary = summarizer(&llm)
            .summarize(&store, analysis_id, act.id, &[EntityType::Outcome])
            .await
            .unwrap();

        assert_eq!(
            summary.summary,
            "No connections found for Tariff Act with the selected types."
        );
        assert!(summary.citations.is_empty());
        assert_eq!(llm.call_count(ENTITY_SUMMARY_TASK), 0);
    }

    #[tokio::test]
    async fn test_evidence_is_capped_per_entity() {
        let (store, analysis_id) = seeded(&["one", "two", "three", "four"]).await;
        let resolver = Resolver::new(Arc::new(ScriptedLlm::new())).with_config(ResolverConfig {
            use_llm: false,
            ..Default::default()
        });
        resolver.resolve(&store, analysis_id).await.unwrap();
        let act = find(&store, analysis_id, "Tariff Act").await;
        let llm = ScriptedLlm::new();
        llm.respond(ENTITY_SUMMARY_TASK, "Cited [1] [2] [3] [4] [5] [6] [7].");

        let summary = summarizer(&llm)
            .summarize(&store, analysis_id, act.id, &[EntityType::Actor])
            .await
            .unwrap();

        // Three focus quotes, then two for Congress
        let roles: Vec<CitationRole> = summary.citations.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![
                CitationRole::FocusEntity,
                CitationRole::FocusEntity,
                CitationRole::FocusEntity,
                CitationRole::ConnectedEntity,
                CitationRole::ConnectedEntity,
            ]
        );
        assert_eq!(llm.calls()[0].prompt.matches("Congress [").count(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_is_external_service() {
        let (store, analysis_id) = seeded(&["Congress passed the Tariff Act."]).await;
        let act = find(&store, analysis_id, "Tariff Act").await;
        let llm = ScriptedLlm::new();
        llm.fail(ENTITY_SUMMARY_TASK, LlmError::RateLimited("quota".into()));

        let err = summarizer(&llm)
            .summarize(&store, analysis_id, act.id, &[EntityType::Actor])
            .await
            .unwrap_err();

        assert!(err.is_external_service());
    }

    #[test]
    fn test_cache_key_ignores_type_order() {
        let analysis_id = uuid::Uuid::new_v4();
        let entity_id = uuid::Uuid::new_v4();

        let a = summary_cache_key(analysis_id, entity_id, &[EntityType::Risk, EntityType::Actor]);
        let b = summary_cache_key(
            analysis_id,
            entity_id,
            &[EntityType::Actor, EntityType::Risk, EntityType::Actor],
        );
        let c = summary_cache_key(analysis_id, entity_id, &[EntityType::Actor]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_citation_markers() {
        let markers = citation_markers("See [3], [1] and [3]; not [x] or [ 2 ].");
        assert_eq!(markers.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }
}
