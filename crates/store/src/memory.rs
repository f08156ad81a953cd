use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::one::{Ref, RefMut};
use extract::ChunkExtraction;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::AnalysisStore;
use crate::error::{StoreError, StoreResult};
use crate::model::*;

struct StoredChunk {
    /// Insertion order, used to keep equal sequence numbers stable
    order: u64,
    record: ChunkRecord,
}

struct AnalysisState {
    job: AnalysisJob,
    entities: Vec<Entity>,
    provenance: Vec<EntityProvenance>,
    relationships: Vec<Relationship>,
    merge_log: Vec<MergeLogEntry>,
    events: Vec<ProgressEvent>,
    checkpoints: Vec<Checkpoint>,
}

impl AnalysisState {
    fn new(job: AnalysisJob) -> Self {
        Self {
            job,
            entities: Vec::new(),
            provenance: Vec::new(),
            relationships: Vec::new(),
            merge_log: Vec::new(),
            events: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    fn find_live_by_label(&self, label: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|e| !e.is_merged() && e.label == label)
            .map(|e| e.id)
    }

    /// Insert a relationship, or raise the confidence of the existing row
    /// with the same key. Returns true when a row was created.
    fn upsert_relationship(
        &mut self,
        source: EntityId,
        target: EntityId,
        relationship_type: &str,
        confidence: u8,
    ) -> bool {
        if let Some(existing) = self
            .relationships
            .iter_mut()
            .find(|r| r.key() == (source, target, relationship_type))
        {
            existing.confidence = existing.confidence.max(confidence);
            return false;
        }

        self.relationships.push(Relationship {
            id: Uuid::new_v4(),
            analysis_id: self.job.id,
            source_entity_id: source,
            target_entity_id: target,
            relationship_type: relationship_type.to_string(),
            confidence,
        });
        true
    }

    fn live_counts(&self) -> EntityCounts {
        let mut counts = EntityCounts::default();
        for entity in self.entities.iter().filter(|e| !e.is_merged()) {
            counts.increment(entity.entity_type);
        }
        counts
    }

    fn validate_merge(&self, merge: &MergeCommit) -> StoreResult<()> {
        let primary = self
            .entities
            .iter()
            .find(|e| e.id == merge.primary.id)
            .ok_or(StoreError::EntityNotFound(merge.primary.id))?;
        if primary.is_merged() {
            return Err(StoreError::AlreadyMerged(primary.id));
        }

        for id in &merge.merged_ids {
            let entity = self
                .entities
                .iter()
                .find(|e| e.id == *id)
                .ok_or(StoreError::EntityNotFound(*id))?;
            if entity.is_merged() || entity.id == primary.id {
                return Err(StoreError::AlreadyMerged(*id));
            }
            if entity.entity_type != primary.entity_type {
                return Err(StoreError::TypeMismatch {
                    primary: primary.id,
                    merged: *id,
                });
            }
        }

        let known: HashSet<RelationshipId> = self.relationships.iter().map(|r| r.id).collect();
        for id in merge
            .relationship_updates
            .iter()
            .map(|r| r.id)
            .chain(merge.relationship_deletions.iter().copied())
        {
            if !known.contains(&id) {
                return Err(StoreError::RelationshipNotFound(id));
            }
        }

        Ok(())
    }
}

/// In-process store backed by concurrent maps, one entry per analysis.
///
/// Each analysis is guarded by its own map entry, so jobs never contend
/// with one another. Mutations validate before touching state.
#[derive(Default)]
pub struct MemoryStore {
    analyses: DashMap<AnalysisId, AnalysisState>,
    chunks: DashMap<ChunkId, StoredChunk>,
    documents: DashMap<String, Document>,
    expansions: DashMap<String, Vec<String>>,
    summaries: DashMap<String, EntitySummary>,
    next_event_id: AtomicU64,
    next_chunk_order: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self, analysis_id: AnalysisId) -> StoreResult<Ref<'_, AnalysisId, AnalysisState>> {
        self.analyses
            .get(&analysis_id)
            .ok_or(StoreError::AnalysisNotFound(analysis_id))
    }

    fn state_mut(
        &self,
        analysis_id: AnalysisId,
    ) -> StoreResult<RefMut<'_, AnalysisId, AnalysisState>> {
        self.analyses
            .get_mut(&analysis_id)
            .ok_or(StoreError::AnalysisNotFound(analysis_id))
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_analysis(&self, query: &str) -> StoreResult<AnalysisJob> {
        let job = AnalysisJob::new(query);
        self.analyses.insert(job.id, AnalysisState::new(job.clone()));
        Ok(job)
    }

    async fn get_analysis(&self, analysis_id: AnalysisId) -> StoreResult<AnalysisJob> {
        Ok(self.state(analysis_id)?.job.clone())
    }

    async fn update_stage(
        &self,
        analysis_id: AnalysisId,
        stage: Stage,
        error_message: Option<String>,
    ) -> StoreResult<()> {
        let mut state = self.state_mut(analysis_id)?;
        let now = Utc::now();

        state.job.current_stage = stage;
        state.job.status = stage.status();
        state.job.updated_at = now;
        if error_message.is_some() {
            state.job.error_message = error_message;
        }
        if stage == Stage::Complete {
            state.job.completed_at = Some(now);
        }
        Ok(())
    }

    async fn set_entity_counts(
        &self,
        analysis_id: AnalysisId,
        counts: EntityCounts,
    ) -> StoreResult<()> {
        let mut state = self.state_mut(analysis_id)?;
        state.job.entity_counts = counts;
        state.job.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_chunks(
        &self,
        analysis_id: Option<AnalysisId>,
        chunks: Vec<ingest::Chunk>,
    ) -> StoreResult<Vec<ChunkId>> {
        if let Some(id) = analysis_id {
            self.state(id)?;
        }

        let mut inserted = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if self.chunks.contains_key(&chunk.chunk_id) {
                debug!(chunk_id = %chunk.chunk_id, "Chunk already stored, skipping");
                continue;
            }
            let record = ChunkRecord::from_chunk(chunk, analysis_id);
            let order = self.next_chunk_order.fetch_add(1, Ordering::SeqCst);
            inserted.push(record.id.clone());
            self.chunks.insert(record.id.clone(), StoredChunk { order, record });
        }
        Ok(inserted)
    }

    async fn associate_chunks(
        &self,
        analysis_id: AnalysisId,
        chunk_ids: &[ChunkId],
    ) -> StoreResult<usize> {
        self.state(analysis_id)?;

        let mut attached = 0;
        for chunk_id in chunk_ids {
            match self.chunks.get_mut(chunk_id) {
                Some(mut stored) => {
                    stored.record.analysis_id = Some(analysis_id);
                    stored.record.extraction_status = ExtractionStatus::Pending;
                    attached += 1;
                }
                None => debug!(chunk_id = %chunk_id, "Search returned unknown chunk"),
            }
        }
        Ok(attached)
    }

    async fn chunks(&self, analysis_id: AnalysisId) -> StoreResult<Vec<ChunkRecord>> {
        self.state(analysis_id)?;

        let mut found: Vec<(usize, u64, ChunkRecord)> = self
            .chunks
            .iter()
            .filter(|c| c.record.analysis_id == Some(analysis_id))
            .map(|c| (c.record.sequence, c.order, c.record.clone()))
            .collect();
        found.sort_by_key(|(sequence, order, _)| (*sequence, *order));

        Ok(found.into_iter().map(|(_, _, record)| record).collect())
    }

    async fn chunk(&self, chunk_id: &str) -> StoreResult<ChunkRecord> {
        self.chunks
            .get(chunk_id)
            .map(|stored| stored.record.clone())
            .ok_or_else(|| StoreError::ChunkNotFound(chunk_id.to_string()))
    }

    async fn mark_indexed(&self, chunk_ids: &[ChunkId]) -> StoreResult<usize> {
        let mut flagged = 0;
        for chunk_id in chunk_ids {
            if let Some(mut stored) = self.chunks.get_mut(chunk_id) {
                stored.record.is_indexed = true;
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    async fn save_document(&self, document_id: &str, title: &str) -> StoreResult<()> {
        self.documents
            .entry(document_id.to_string())
            .or_insert_with(|| Document {
                id: document_id.to_string(),
                title: title.to_string(),
                created_at: Utc::now(),
            });
        Ok(())
    }

    async fn document(&self, document_id: &str) -> StoreResult<Option<Document>> {
        Ok(self.documents.get(document_id).map(|d| d.clone()))
    }

    async fn knowledge_stats(&self) -> StoreResult<KnowledgeStats> {
        let mut documents = HashSet::new();
        let mut indexed_chunks = 0;
        for stored in self.chunks.iter() {
            documents.insert(stored.record.document_id.clone());
            if stored.record.is_indexed {
                indexed_chunks += 1;
            }
        }

        Ok(KnowledgeStats {
            total_documents: documents.len(),
            total_chunks: self.chunks.len(),
            indexed_chunks,
            total_analyses: self.analyses.len(),
        })
    }

    async fn set_chunk_status(&self, chunk_id: &str, status: ExtractionStatus) -> StoreResult<()> {
        let mut stored = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::ChunkNotFound(chunk_id.to_string()))?;
        stored.record.extraction_status = status;
        Ok(())
    }

    async fn commit_extraction(
        &self,
        analysis_id: AnalysisId,
        chunk_id: &str,
        extraction: &ChunkExtraction,
    ) -> StoreResult<CommitSummary> {
        // Lock order: analysis entry, then chunk entry
        let mut state = self.state_mut(analysis_id)?;
        let mut stored = self
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| StoreError::ChunkNotFound(chunk_id.to_string()))?;
        if stored.record.analysis_id != Some(analysis_id) {
            return Err(StoreError::ChunkNotInAnalysis {
                chunk_id: chunk_id.to_string(),
                analysis_id,
            });
        }

        let mut summary = CommitSummary::default();

        for extracted in &extraction.entities {
            let entity = Entity {
                id: Uuid::new_v4(),
                analysis_id,
                entity_type: extracted.entity_type,
                label: extracted.label.clone(),
                aliases: extracted.aliases.iter().cloned().collect(),
                confidence: extracted.confidence,
                impact_score: DEFAULT_IMPACT_SCORE,
                is_resolved: false,
                merged_into: None,
            };
            state.provenance.push(EntityProvenance {
                entity_id: entity.id,
                chunk_id: chunk_id.to_string(),
                quote: extracted.quote.clone(),
                confidence: extracted.confidence,
            });
            summary.entities_created.increment(entity.entity_type);
            state.entities.push(entity);
        }

        for rel in &extraction.relationships {
            let source = state.find_live_by_label(&rel.source_label);
            let target = state.find_live_by_label(&rel.target_label);

            match (source, target) {
                (Some(source), Some(target)) if source != target => {
                    if state.upsert_relationship(
                        source,
                        target,
                        &rel.relationship_type,
                        rel.confidence,
                    ) {
                        summary.relationships_created += 1;
                    }
                }
                _ => {
                    debug!(
                        source = %rel.source_label,
                        target = %rel.target_label,
                        "Dropping relationship with unmatched endpoint"
                    );
                    summary.relationships_dropped += 1;
                }
            }
        }

        stored.record.extraction_status = ExtractionStatus::Complete;
        state.job.updated_at = Utc::now();

        Ok(summary)
    }

    async fn entities(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Entity>> {
        Ok(self.state(analysis_id)?.entities.clone())
    }

    async fn relationships(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Relationship>> {
        Ok(self.state(analysis_id)?.relationships.clone())
    }

    async fn provenance(
        &self,
        analysis_id: AnalysisId,
        entity_id: EntityId,
    ) -> StoreResult<Vec<EntityProvenance>> {
        Ok(self
            .state(analysis_id)?
            .provenance
            .iter()
            .filter(|p| p.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn apply_merge(&self, merge: &MergeCommit) -> StoreResult<()> {
        let mut guard = self.state_mut(merge.analysis_id)?;
        guard.validate_merge(merge)?;

        let state = &mut *guard;
        let primary_id = merge.primary.id;
        let merged: HashSet<EntityId> = merge.merged_ids.iter().copied().collect();

        for entity in state.entities.iter_mut() {
            if entity.id == primary_id {
                entity.label = merge.primary.label.clone();
                entity.aliases = merge.primary.aliases.clone();
                entity.confidence = merge.primary.confidence;
                entity.impact_score = merge.primary.impact_score;
                entity.is_resolved = true;
            } else if merged.contains(&entity.id) {
                entity.merged_into = Some(primary_id);
                entity.is_resolved = false;
            } else if entity.merged_into.is_some_and(|target| merged.contains(&target)) {
                // Older tombstone: point it at the new primary, never at another tombstone
                entity.merged_into = Some(primary_id);
            }
        }

        for provenance in state.provenance.iter_mut() {
            if merged.contains(&provenance.entity_id) {
                provenance.entity_id = primary_id;
            }
        }

        let deletions: HashSet<RelationshipId> =
            merge.relationship_deletions.iter().copied().collect();
        state.relationships.retain(|r| !deletions.contains(&r.id));
        for update in &merge.relationship_updates {
            if let Some(existing) = state.relationships.iter_mut().find(|r| r.id == update.id) {
                *existing = update.clone();
            }
        }

        state.merge_log.push(merge.log.clone());
        state.job.updated_at = Utc::now();

        Ok(())
    }

    async fn finalize_resolution(&self, analysis_id: AnalysisId) -> StoreResult<usize> {
        let mut state = self.state_mut(analysis_id)?;
        let mut changed = 0;
        for entity in state.entities.iter_mut() {
            if !entity.is_merged() && !entity.is_resolved {
                entity.is_resolved = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn merge_log(&self, analysis_id: AnalysisId) -> StoreResult<Vec<MergeLogEntry>> {
        Ok(self.state(analysis_id)?.merge_log.clone())
    }

    async fn append_event(
        &self,
        analysis_id: AnalysisId,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> StoreResult<u64> {
        let mut state = self.state_mut(analysis_id)?;
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        state.events.push(ProgressEvent {
            id,
            analysis_id,
            kind,
            payload,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn events_since(
        &self,
        analysis_id: AnalysisId,
        last_id: u64,
    ) -> StoreResult<Vec<ProgressEvent>> {
        Ok(self
            .state(analysis_id)?
            .events
            .iter()
            .filter(|e| e.id > last_id)
            .cloned()
            .collect())
    }

    async fn save_checkpoint(
        &self,
        analysis_id: AnalysisId,
        stage: Stage,
    ) -> StoreResult<Checkpoint> {
        let mut state = self.state_mut(analysis_id)?;
        let checkpoint = Checkpoint {
            analysis_id,
            stage,
            version: state.checkpoints.len() as u32 + 1,
            stats: state.live_counts(),
            created_at: Utc::now(),
        };
        state.checkpoints.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn checkpoints(&self, analysis_id: AnalysisId) -> StoreResult<Vec<Checkpoint>> {
        Ok(self.state(analysis_id)?.checkpoints.clone())
    }

    async fn cached_expansion(&self, query_hash: &str) -> StoreResult<Option<Vec<String>>> {
        Ok(self.expansions.get(query_hash).map(|v| v.clone()))
    }

    async fn save_expansion(&self, query_hash: &str, variations: &[String]) -> StoreResult<()> {
        self.expansions
            .insert(query_hash.to_string(), variations.to_vec());
        Ok(())
    }

    async fn cached_summary(&self, key: &str) -> StoreResult<Option<EntitySummary>> {
        Ok(self.summaries.get(key).map(|s| s.clone()))
    }

    async fn save_summary(&self, key: &str, summary: &EntitySummary) -> StoreResult<()> {
        self.summaries.insert(key.to_string(), summary.clone());
        Ok(())
    }
}
