pub mod aliases;
pub mod grouping;
pub mod normalizer;
pub mod prompt;
pub mod remap;

pub use grouping::{CandidateGroup, find_candidates};
pub use normalizer::normalize;
pub use remap::{RemapOutcome, remap_relationships};

use chrono::Utc;
use extract::schema::clamp_score;
use extract::{CompletionRequest, EntityType, LlmClient, complete_json};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use store::{
    AnalysisId, AnalysisStore, Entity, MergeCommit, MergeLogEntry, MergeMethod, Relationship,
    StoreResult,
};
use tracing::{debug, info, warn};

use crate::prompt::{CONFIRM_MERGE_TASK, GroupView, MergeDecisionBatch};

/// How many canonical labels `MergeStats::top_merged` reports.
const TOP_MERGED_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Ask the LLM to confirm low-confidence groups
    pub use_llm: bool,
    /// Groups below this confidence go to the LLM
    pub llm_confirm_threshold: u8,
    pub llm_batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            use_llm: true,
            llm_confirm_threshold: 60,
            llm_batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TopMerged {
    pub label: String,
    /// Entities folded into this label, the primary included
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeStats {
    pub total_entities: usize,
    pub unique_entities: usize,
    /// Entities tombstoned, per method
    pub merges_by_method: BTreeMap<MergeMethod, usize>,
    pub relationships_before: usize,
    pub relationships_after: usize,
    pub relationships_removed: usize,
    pub top_merged: Vec<TopMerged>,
}

impl MergeStats {
    pub fn total_merged(&self) -> usize {
        self.merges_by_method.values().sum()
    }
}

/// A candidate group after LLM confirmation, ready to execute.
struct Decision<'a> {
    members: Vec<&'a Entity>,
    method: MergeMethod,
    confidence: u8,
    canonical_label: Option<String>,
}

/// Deduplicates the entities of one analysis.
///
/// Runs once, after extraction has finished: proposes groups per entity
/// type, optionally confirms weak ones with the LLM, then executes each
/// accepted group as one atomic store mutation.
pub struct Resolver {
    llm: Arc<dyn LlmClient>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn resolve(
        &self,
        store: &dyn AnalysisStore,
        analysis_id: AnalysisId,
    ) -> StoreResult<MergeStats> {
        let entities: Vec<Entity> = store
            .entities(analysis_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_merged())
            .collect();
        let mut relationships = store.relationships(analysis_id).await?;

        let mut stats = MergeStats {
            total_entities: entities.len(),
            relationships_before: relationships.len(),
            ..Default::default()
        };

        let mut decisions = Vec::new();
        for entity_type in EntityType::ALL {
            let of_type: Vec<&Entity> = entities
                .iter()
                .filter(|e| e.entity_type == entity_type)
                .collect();
            for group in find_candidates(&of_type) {
                decisions.push(Decision {
                    members: group.members.iter().map(|&i| of_type[i]).collect(),
                    method: group.method,
                    confidence: group.confidence,
                    canonical_label: group.canonical_label,
                });
            }
        }
        debug!(analysis_id = %analysis_id, groups = decisions.len(), "Candidate merge groups");

        if self.config.use_llm {
            self.confirm_weak_groups(&mut decisions).await;
        }

        let mut top: BTreeMap<String, usize> = BTreeMap::new();
        for decision in decisions.iter().filter(|d| d.members.len() >= 2) {
            let Some(commit) = build_commit(analysis_id, decision, &relationships) else {
                continue;
            };
            let remap = RemapOutcome {
                updates: commit.relationship_updates.clone(),
                deletions: commit.relationship_deletions.clone(),
            };

            match store.apply_merge(&commit).await {
                Ok(()) => {
                    remap.apply_to(&mut relationships);
                    *stats.merges_by_method.entry(decision.method).or_default() +=
                        commit.merged_ids.len();
                    *top.entry(commit.log.canonical_label.clone()).or_default() +=
                        decision.members.len();
                    info!(
                        analysis_id = %analysis_id,
                        canonical = %commit.log.canonical_label,
                        method = %decision.method,
                        merged = commit.merged_ids.len(),
                        "Merged entities"
                    );
                }
                Err(e) => warn!(
                    analysis_id = %analysis_id,
                    canonical = %commit.log.canonical_label,
                    error = %e,
                    "Merge group failed, skipping"
                ),
            }
        }

        store.finalize_resolution(analysis_id).await?;

        stats.unique_entities = stats.total_entities - stats.total_merged();
        stats.relationships_after = store.relationships(analysis_id).await?.len();
        stats.relationships_removed = stats
            .relationships_before
            .saturating_sub(stats.relationships_after);
        stats.top_merged = top_merged(top);

        info!(
            analysis_id = %analysis_id,
            total = stats.total_entities,
            unique = stats.unique_entities,
            relationships_removed = stats.relationships_removed,
            "Resolution complete"
        );
        Ok(stats)
    }

    /// Send groups under the confidence threshold to the LLM in batches and
    /// apply its verdicts by group index. A failed batch keeps the verdicts
    /// the earlier tiers reached.
    async fn confirm_weak_groups(&self, decisions: &mut [Decision<'_>]) {
        let weak: Vec<usize> = decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.confidence < self.config.llm_confirm_threshold)
            .map(|(i, _)| i)
            .collect();

        for batch in weak.chunks(self.config.llm_batch_size.max(1)) {
            let views: Vec<GroupView<'_>> = batch
                .iter()
                .map(|&i| GroupView {
                    members: decisions[i].members.clone(),
                })
                .collect();
            let request =
                CompletionRequest::new(CONFIRM_MERGE_TASK, prompt::build_confirm_prompt(&views))
                    .with_schema(prompt::confirm_schema())
                    .with_temperature(0.0);

            let verdicts: MergeDecisionBatch = match complete_json(self.llm.as_ref(), &request).await
            {
                Ok(verdicts) => verdicts,
                Err(e) => {
                    warn!(groups = batch.len(), error = %e, "Merge confirmation failed");
                    continue;
                }
            };

            for verdict in verdicts.decisions {
                let Some(&index) = batch.get(verdict.group) else {
                    debug!(group = verdict.group, "Verdict for unknown group ignored");
                    continue;
                };
                let decision = &mut decisions[index];
                if !verdict.should_merge {
                    decision.members.truncate(1);
                    continue;
                }
                decision.method = MergeMethod::Llm;
                if let Some(confidence) = verdict.confidence {
                    decision.confidence = clamp_score(confidence);
                }
                if let Some(label) = verdict.canonical_label.filter(|l| !l.trim().is_empty()) {
                    decision.canonical_label = Some(label.trim().to_string());
                }
            }
        }
    }
}

/// The member to keep: longest label, then highest confidence, then the
/// earliest member.
fn select_primary<'a>(members: &[&'a Entity]) -> Option<&'a Entity> {
    let mut best: Option<&'a Entity> = None;
    for &candidate in members {
        let better = match best {
            None => true,
            Some(current) => {
                let (c_len, b_len) = (
                    candidate.label.chars().count(),
                    current.label.chars().count(),
                );
                c_len > b_len || (c_len == b_len && candidate.confidence > current.confidence)
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

fn build_commit(
    analysis_id: AnalysisId,
    decision: &Decision<'_>,
    relationships: &[Relationship],
) -> Option<MergeCommit> {
    let members = &decision.members;
    let primary = select_primary(members)?;

    let canonical = decision
        .canonical_label
        .clone()
        .unwrap_or_else(|| primary.label.clone());

    let mut aliases: BTreeSet<String> = BTreeSet::new();
    for member in members.iter() {
        aliases.insert(member.label.clone());
        aliases.extend(member.aliases.iter().cloned());
    }
    aliases.remove(&canonical);

    let merged_ids: Vec<_> = members
        .iter()
        .filter(|m| m.id != primary.id)
        .map(|m| m.id)
        .collect();

    let mut merged_primary = (*primary).clone();
    merged_primary.label = canonical.clone();
    merged_primary.aliases = aliases;
    merged_primary.confidence = members
        .iter()
        .map(|m| m.confidence)
        .max()
        .unwrap_or(primary.confidence);
    merged_primary.is_resolved = true;

    let mapping: HashMap<_, _> = merged_ids.iter().map(|&id| (id, primary.id)).collect();
    let remap = remap_relationships(relationships, &mapping);

    Some(MergeCommit {
        analysis_id,
        primary: merged_primary,
        merged_ids: merged_ids.clone(),
        relationship_updates: remap.updates,
        relationship_deletions: remap.deletions,
        log: MergeLogEntry {
            analysis_id,
            primary_entity_id: primary.id,
            merged_entity_ids: merged_ids.into_iter().collect(),
            method: decision.method,
            confidence: decision.confidence,
            canonical_label: canonical,
            created_at: Utc::now(),
        },
    })
}

fn top_merged(counts: BTreeMap<String, usize>) -> Vec<TopMerged> {
    let mut ranked: Vec<TopMerged> = counts
        .into_iter()
        .map(|(label, count)| TopMerged { label, count })
        .collect();
    // BTreeMap order makes equal counts alphabetical
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(TOP_MERGED_LIMIT);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{ChunkExtraction, ExtractedEntity, ExtractedRelationship, LlmError, ScriptedLlm};
    use store::MemoryStore;

    fn extracted(entity_type: EntityType, label: &str, confidence: u8) -> ExtractedEntity {
        ExtractedEntity {
            temp_id: format!("{}_{}", entity_type, label),
            entity_type,
            label: label.to_string(),
            confidence,
            quote: label.to_string(),
            aliases: vec![],
        }
    }

    fn link(source: &str, target: &str, kind: &str, confidence: u8) -> ExtractedRelationship {
        ExtractedRelationship {
            source_label: source.to_string(),
            target_label: target.to_string(),
            relationship_type: kind.to_string(),
            confidence,
        }
    }

    /// Commit each extraction as its own chunk of a fresh analysis.
    async fn seeded(store: &MemoryStore, extractions: Vec<ChunkExtraction>) -> AnalysisId {
        let job = store.create_analysis("test").await.unwrap();
        let chunks = (0..extractions.len())
            .map(|i| ingest::Chunk::new("doc", i, format!("chunk {i}"), (0, 7)))
            .collect();
        let ids = store.insert_chunks(Some(job.id), chunks).await.unwrap();
        for (chunk_id, extraction) in ids.iter().zip(&extractions) {
            store.commit_extraction(job.id, chunk_id, extraction).await.unwrap();
        }
        job.id
    }

    fn only_entities(entities: Vec<ExtractedEntity>) -> ChunkExtraction {
        ChunkExtraction {
            entities,
            ..Default::default()
        }
    }

    fn resolver(llm: &ScriptedLlm) -> Resolver {
        Resolver::new(Arc::new(llm.clone()))
    }

    async fn assert_invariants(store: &MemoryStore, analysis_id: AnalysisId) {
        let entities = store.entities(analysis_id).await.unwrap();
        for e in &entities {
            assert!(e.is_resolved != e.is_merged(), "entity {} in both or neither state", e.label);
        }
        let tombstones: BTreeSet<_> = entities.iter().filter(|e| e.is_merged()).map(|e| e.id).collect();
        let relationships = store.relationships(analysis_id).await.unwrap();
        let mut keys = BTreeSet::new();
        for r in &relationships {
            assert!(!tombstones.contains(&r.source_entity_id));
            assert!(!tombstones.contains(&r.target_entity_id));
            assert!(keys.insert((r.source_entity_id, r.target_entity_id, r.relationship_type.clone())));
        }
    }

    #[tokio::test]
    async fn test_alias_dictionary_merge() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Actor, "US", 70),
                extracted(EntityType::Actor, "United States", 90),
            ])],
        )
        .await;

        let stats = resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(stats.merges_by_method.get(&MergeMethod::AliasDict), Some(&1));
        assert_eq!(stats.unique_entities, 1);

        let log = store.merge_log(analysis_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].method, MergeMethod::AliasDict);
        assert_eq!(log[0].confidence, 100);
        assert_eq!(log[0].canonical_label, "United States");

        let graph = store.graph(analysis_id).await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].label, "United States");
        assert!(graph.entities[0].aliases.contains("US"));
        assert_invariants(&store, analysis_id).await;
    }

    #[tokio::test]
    async fn test_fuzzy_merge_keeps_longer_label() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![
                only_entities(vec![extracted(EntityType::Actor, "NATO", 95)]),
                only_entities(vec![extracted(EntityType::Actor, "the NATO alliance", 60)]),
            ],
        )
        .await;

        let stats = resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(stats.merges_by_method.get(&MergeMethod::Fuzzy), Some(&1));
        let graph = store.graph(analysis_id).await.unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.entities[0].label, "the NATO alliance");
        assert_eq!(graph.entities[0].confidence, 95);
        assert_eq!(stats.top_merged, vec![TopMerged { label: "the NATO alliance".into(), count: 2 }]);
        assert_invariants(&store, analysis_id).await;
    }

    #[tokio::test]
    async fn test_distinct_entities_are_resolved_unmerged() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Actor, "Congress", 80),
                extracted(EntityType::Actor, "Parliament", 80),
            ])],
        )
        .await;

        let stats = resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(stats.total_merged(), 0);
        assert_eq!(stats.unique_entities, 2);
        let entities = store.entities(analysis_id).await.unwrap();
        assert!(entities.iter().all(|e| e.is_resolved && !e.is_merged()));
        assert!(store.merge_log(analysis_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_label_across_types_never_merges() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Policy, "Sanctions", 80),
                extracted(EntityType::Risk, "Sanctions", 80),
            ])],
        )
        .await;

        let stats = resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(stats.total_merged(), 0);
    }

    #[tokio::test]
    async fn test_converging_edges_collapse_after_merge() {
        let store = MemoryStore::new();
        // "Alpha Corp" and "alpha corp" both point at Delta with the same type
        let analysis_id = seeded(
            &store,
            vec![
                ChunkExtraction {
                    entities: vec![
                        extracted(EntityType::Actor, "Alpha Corp", 90),
                        extracted(EntityType::Actor, "Delta", 90),
                    ],
                    relationships: vec![link("Alpha Corp", "Delta", "supplies", 60)],
                    failed_passes: vec![],
                },
                ChunkExtraction {
                    entities: vec![extracted(EntityType::Actor, "alpha corp", 70)],
                    relationships: vec![],
                    failed_passes: vec![],
                },
            ],
        )
        .await;
        // Second edge from the lower-case duplicate, added by a third chunk
        let entities = store.entities(analysis_id).await.unwrap();
        let delta = entities.iter().find(|e| e.label == "Delta").unwrap().id;
        let chunk = ingest::Chunk::new("doc", 9, "chunk 9".to_string(), (0, 7));
        let ids = store.insert_chunks(Some(analysis_id), vec![chunk]).await.unwrap();
        store
            .commit_extraction(
                analysis_id,
                &ids[0],
                &ChunkExtraction {
                    entities: vec![],
                    relationships: vec![link("alpha corp", "Delta", "supplies", 85)],
                    failed_passes: vec![],
                },
            )
            .await
            .unwrap();

        let stats = resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(stats.relationships_before, 2);
        assert_eq!(stats.relationships_after, 1);
        assert_eq!(stats.relationships_removed, 1);

        let graph = store.graph(analysis_id).await.unwrap();
        let alpha = graph.entities.iter().find(|e| e.label == "Alpha Corp").unwrap();
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].source_entity_id, alpha.id);
        assert_eq!(graph.relationships[0].target_entity_id, delta);
        assert_eq!(graph.relationships[0].confidence, 85);
        assert_invariants(&store, analysis_id).await;
    }

    #[tokio::test]
    async fn test_provenance_follows_primary() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![
                only_entities(vec![extracted(EntityType::Actor, "EU", 80)]),
                only_entities(vec![extracted(EntityType::Actor, "European Union", 80)]),
            ],
        )
        .await;

        resolver(&ScriptedLlm::new()).resolve(&store, analysis_id).await.unwrap();

        let graph = store.graph(analysis_id).await.unwrap();
        let provenance = store.provenance(analysis_id, graph.entities[0].id).await.unwrap();
        assert_eq!(provenance.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_rejects_weak_group() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Outcome, "Inflation", 80),
                extracted(EntityType::Outcome, "Inflation spike", 80),
            ])],
        )
        .await;
        let llm = ScriptedLlm::new();
        llm.respond(CONFIRM_MERGE_TASK, r#"{"decisions": [{"group": 0, "should_merge": false}]}"#);

        let stats = resolver(&llm)
            .with_config(ResolverConfig {
                llm_confirm_threshold: 80,
                ..Default::default()
            })
            .resolve(&store, analysis_id)
            .await
            .unwrap();

        assert_eq!(llm.call_count(CONFIRM_MERGE_TASK), 1);
        assert_eq!(stats.total_merged(), 0);
        assert_invariants(&store, analysis_id).await;
    }

    #[tokio::test]
    async fn test_llm_confirms_with_canonical_label() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Outcome, "Inflation", 80),
                extracted(EntityType::Outcome, "Inflation spike", 80),
            ])],
        )
        .await;
        let llm = ScriptedLlm::new();
        llm.respond(
            CONFIRM_MERGE_TASK,
            r#"{"decisions": [{"group": 0, "should_merge": true, "canonical_label": "Rising inflation", "confidence": 88}]}"#,
        );

        let stats = resolver(&llm)
            .with_config(ResolverConfig {
                llm_confirm_threshold: 80,
                ..Default::default()
            })
            .resolve(&store, analysis_id)
            .await
            .unwrap();

        assert_eq!(stats.merges_by_method.get(&MergeMethod::Llm), Some(&1));
        let log = store.merge_log(analysis_id).await.unwrap();
        assert_eq!(log[0].canonical_label, "Rising inflation");
        assert_eq!(log[0].confidence, 88);
        let graph = store.graph(analysis_id).await.unwrap();
        assert_eq!(graph.entities[0].label, "Rising inflation");
        assert!(graph.entities[0].aliases.contains("Inflation"));
        assert!(graph.entities[0].aliases.contains("Inflation spike"));
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_prior_decision() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Outcome, "Inflation", 80),
                extracted(EntityType::Outcome, "Inflation spike", 80),
            ])],
        )
        .await;
        let llm = ScriptedLlm::new();
        llm.fail(CONFIRM_MERGE_TASK, LlmError::Communication("down".into()));

        let stats = resolver(&llm)
            .with_config(ResolverConfig {
                llm_confirm_threshold: 80,
                ..Default::default()
            })
            .resolve(&store, analysis_id)
            .await
            .unwrap();

        assert_eq!(stats.merges_by_method.get(&MergeMethod::Fuzzy), Some(&1));
    }

    /// Three weak fuzzy groups: recession, drought, layoffs (in that order).
    async fn three_weak_groups(store: &MemoryStore) -> AnalysisId {
        seeded(
            store,
            vec![only_entities(vec![
                extracted(EntityType::Risk, "Recession", 70),
                extracted(EntityType::Risk, "Recession risk", 70),
                extracted(EntityType::Risk, "Drought", 70),
                extracted(EntityType::Risk, "Drought impact", 70),
                extracted(EntityType::Risk, "Layoffs", 70),
                extracted(EntityType::Risk, "Layoffs wave", 70),
            ])],
        )
        .await
    }

    fn small_batches(llm: &ScriptedLlm) -> Resolver {
        resolver(llm).with_config(ResolverConfig {
            llm_confirm_threshold: 80,
            llm_batch_size: 2,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_verdicts_index_into_their_own_batch() {
        let store = MemoryStore::new();
        let analysis_id = three_weak_groups(&store).await;
        let llm = ScriptedLlm::new();
        llm.respond(
            CONFIRM_MERGE_TASK,
            r#"{"decisions": [
                {"group": 0, "should_merge": false},
                {"group": 1, "should_merge": true, "confidence": 85}
            ]}"#,
        );
        llm.respond(
            CONFIRM_MERGE_TASK,
            r#"{"decisions": [{"group": 0, "should_merge": true, "canonical_label": "Mass layoffs", "confidence": 90}]}"#,
        );

        let stats = small_batches(&llm).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(llm.call_count(CONFIRM_MERGE_TASK), 2);
        let prompts: Vec<String> = llm.calls().into_iter().map(|c| c.prompt).collect();
        assert!(prompts[0].contains("Recession") && prompts[0].contains("Drought"));
        assert!(prompts[1].contains("Layoffs") && !prompts[1].contains("Recession"));

        assert_eq!(stats.merges_by_method.get(&MergeMethod::Llm), Some(&2));
        let labels: Vec<String> = store
            .merge_log(analysis_id)
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.canonical_label)
            .collect();
        assert_eq!(labels, vec!["Drought impact", "Mass layoffs"]);

        let graph = store.graph(analysis_id).await.unwrap();
        let live: BTreeSet<&str> = graph.entities.iter().map(|e| e.label.as_str()).collect();
        assert!(live.contains("Recession") && live.contains("Recession risk"));
        assert_invariants(&store, analysis_id).await;
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_batch_verdicts() {
        let store = MemoryStore::new();
        let analysis_id = three_weak_groups(&store).await;
        let llm = ScriptedLlm::new();
        llm.respond(
            CONFIRM_MERGE_TASK,
            r#"{"decisions": [
                {"group": 0, "should_merge": false},
                {"group": 1, "should_merge": false}
            ]}"#,
        );
        llm.fail(CONFIRM_MERGE_TASK, LlmError::RateLimited("quota".into()));

        let stats = small_batches(&llm).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(llm.call_count(CONFIRM_MERGE_TASK), 2);
        assert_eq!(stats.merges_by_method.get(&MergeMethod::Llm), None);
        assert_eq!(stats.merges_by_method.get(&MergeMethod::Fuzzy), Some(&1));
        let log = store.merge_log(analysis_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].canonical_label, "Layoffs wave");
        assert_eq!(stats.unique_entities, 5);
    }

    #[tokio::test]
    async fn test_strong_groups_skip_llm() {
        let store = MemoryStore::new();
        let analysis_id = seeded(
            &store,
            vec![only_entities(vec![
                extracted(EntityType::Actor, "US", 80),
                extracted(EntityType::Actor, "USA", 80),
            ])],
        )
        .await;
        let llm = ScriptedLlm::new();

        resolver(&llm).resolve(&store, analysis_id).await.unwrap();

        assert_eq!(llm.call_count(CONFIRM_MERGE_TASK), 0);
    }

    #[test]
    fn test_primary_prefers_longer_label_then_confidence() {
        let make = |label: &str, confidence: u8| Entity {
            id: uuid::Uuid::new_v4(),
            analysis_id: uuid::Uuid::nil(),
            entity_type: EntityType::Actor,
            label: label.to_string(),
            aliases: BTreeSet::new(),
            confidence,
            impact_score: 50,
            is_resolved: false,
            merged_into: None,
        };
        let (a, b, c) = (make("IMF", 99), make("Fund", 40), make("Bank", 70));

        assert_eq!(select_primary(&[&a, &b, &c]).unwrap().label, "Bank");
        let (d, e) = (make("WTO", 50), make("wto", 50));
        assert_eq!(select_primary(&[&d, &e]).unwrap().id, d.id);
    }
}
