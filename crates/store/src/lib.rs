pub mod embeddings;
pub mod error;
pub mod memory;
pub mod model;
pub mod neo4j;
pub mod qdrant;

pub use embeddings::{Embedder, EmbeddingClient, EmbeddingError, embed_checked, validate_embeddings};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::*;
pub use neo4j::{ExportStats, GraphExporter};
pub use qdrant::{ChunkRetriever, QdrantChunkIndex};

use async_trait::async_trait;
use extract::{ChunkExtraction, EntityType};
use std::collections::{BTreeMap, HashMap};

/// Transactional persistence for everything an analysis produces.
///
/// Every mutating call is atomic: it either applies completely or leaves
/// the analysis untouched. All state is scoped by analysis id.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create_analysis(&self, query: &str) -> StoreResult<AnalysisJob>;

    async fn get_analysis(&self, analysis_id: AnalysisId) -> StoreResult<AnalysisJob>;

    /// Move a job to `stage`. Reaching `Complete` stamps `completed_at`.
    async fn update_stage(
        &self,
        analysis_id: AnalysisId,
        stage: Stage,
        error_message: Option<String>,
    ) -> StoreResult<()>;

    async fn set_entity_counts(
        &self,
        analysis_id: AnalysisId,
        counts: EntityCounts,
    ) -> StoreResult<()>;

    /// Persist chunks, optionally already associated with an analysis.
    /// Chunks whose id is already stored are skipped.
    async fn insert_chunks(
        &self,
        analysis_id: Option<AnalysisId>,
        chunks: Vec<ingest::Chunk>,
    ) -> StoreResult<Vec<ChunkId>>;

    /// Attach existing chunks to an analysis and reset them to pending.
    /// Unknown ids are skipped; returns how many were attached.
    async fn associate_chunks(
        &self,
        analysis_id: AnalysisId,
        chunk_ids: &[ChunkId],
    ) -> StoreResult<usize>;

    /// Chunks of an analysis ordered by `(sequence, insertion order)`.
    ///
    /// Across several documents this interleaves them: every document's
    /// chunk 0 comes before any chunk 1.
    async fn chunks(&self, analysis_id: AnalysisId) -> StoreResult<Vec<ChunkRecord>>;

    async fn chunk(&self, chunk_id: &str) -> StoreResult<ChunkRecord>;

    async fn set_chunk_status(
        &self,
        chunk_id: &str,
        status: ExtractionStatus,
    ) -> StoreResult<()>;

    /// Flag chunks whose vectors reached the search index. Unknown ids are
    /// skipped; returns how many were flagged.
    async fn mark_indexed(&self, chunk_ids: &[ChunkId]) -> StoreResult<usize>;

    /// Record a document's display title. Saving an id again keeps the
    /// first title.
    async fn save_document(&self, document_id: &str, title: &str) -> StoreResult<()>;

    async fn document(&self, document_id: &str) -> StoreResult<Option<Document>>;

    async fn knowledge_stats(&self) -> StoreResult<KnowledgeStats>;

    /// Persist one chunk's entities, provenance and relationships and mark
    /// the chunk complete. Relationship endpoints are resolved by exact label
    /// against the analysis' live entities, first match wins; unmatched
    /// relationships are dropped.
    async fn commit_extraction(
        &self,
        analysis_id: AnalysisId,
        chunk_id: &str,
        extraction: &ChunkExtraction,
    ) -> StoreResult<CommitSummary>;

    /// Every entity of the analysis, tombstones included, in creation order.
    async fn entities(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Entity>>;

    async fn relationships(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Relationship>>;

    async fn provenance(
        &self,
        analysis_id: AnalysisId,
        entity_id: EntityId,
    ) -> StoreResult<Vec<EntityProvenance>>;

    /// Apply one merge group: update the primary, tombstone the rest, repoint
    /// provenance, rewrite relationships and append the audit entry.
    async fn apply_merge(&self, merge: &MergeCommit) -> StoreResult<()>;

    /// Mark every live, unresolved entity resolved. Returns how many changed.
    async fn finalize_resolution(&self, analysis_id: AnalysisId) -> StoreResult<usize>;

    async fn merge_log(&self, analysis_id: AnalysisId) -> StoreResult<Vec<MergeLogEntry>>;

    async fn append_event(
        &self,
        analysis_id: AnalysisId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> StoreResult<u64>;

    /// Events with id greater than `last_id`, oldest first.
    async fn events_since(
        &self,
        analysis_id: AnalysisId,
        last_id: u64,
    ) -> StoreResult<Vec<ProgressEvent>>;

    /// Snapshot live entity counts under the next version number.
    async fn save_checkpoint(&self, analysis_id: AnalysisId, stage: Stage)
    -> StoreResult<Checkpoint>;

    async fn checkpoints(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Checkpoint>>;

    /// Search variations cached under a normalized query hash.
    async fn cached_expansion(&self, query_hash: &str) -> StoreResult<Option<Vec<String>>>;

    async fn save_expansion(&self, query_hash: &str, variations: &[String]) -> StoreResult<()>;

    async fn cached_summary(&self, key: &str) -> StoreResult<Option<EntitySummary>>;

    async fn save_summary(&self, key: &str, summary: &EntitySummary) -> StoreResult<()>;

    /// Live neighbours of an entity, grouped by type. A tombstone id is
    /// answered for the entity it was merged into.
    async fn connections(
        &self,
        analysis_id: AnalysisId,
        entity_id: EntityId,
    ) -> StoreResult<EntityConnections> {
        let entities = self.entities(analysis_id).await?;
        let relationships = self.relationships(analysis_id).await?;

        let requested = entities
            .iter()
            .find(|e| e.id == entity_id)
            .ok_or(StoreError::EntityNotFound(entity_id))?;
        let focus_id = requested.merged_into.unwrap_or(entity_id);
        let focus = entities
            .iter()
            .find(|e| e.id == focus_id)
            .ok_or(StoreError::EntityNotFound(focus_id))?
            .clone();

        let live: HashMap<EntityId, &Entity> = entities
            .iter()
            .filter(|e| !e.is_merged())
            .map(|e| (e.id, e))
            .collect();
        let mut groups: BTreeMap<EntityType, Vec<ConnectedEntity>> =
            EntityType::ALL.iter().map(|t| (*t, Vec::new())).collect();

        for rel in &relationships {
            let (other, outgoing) = if rel.source_entity_id == focus.id {
                (rel.target_entity_id, true)
            } else if rel.target_entity_id == focus.id {
                (rel.source_entity_id, false)
            } else {
                continue;
            };
            let Some(other) = live.get(&other) else {
                continue;
            };
            groups.entry(other.entity_type).or_default().push(ConnectedEntity {
                entity_id: other.id,
                label: other.label.clone(),
                entity_type: other.entity_type,
                relationship_type: rel.relationship_type.clone(),
                confidence: rel.confidence,
                outgoing,
            });
        }

        Ok(EntityConnections {
            entity: focus,
            groups,
        })
    }

    /// Live entities and their relationships.
    async fn graph(&self, analysis_id: AnalysisId) -> StoreResult<KnowledgeGraph> {
        let entities = self
            .entities(analysis_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_merged())
            .collect();
        let relationships = self.relationships(analysis_id).await?;

        Ok(KnowledgeGraph {
            analysis_id,
            entities,
            relationships,
        })
    }
}
