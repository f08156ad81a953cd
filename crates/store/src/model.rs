use chrono::{DateTime, Utc};
use extract::EntityType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

pub type AnalysisId = Uuid;
pub type EntityId = Uuid;
pub type RelationshipId = Uuid;
/// Stable content-derived chunk id (see `ingest::Chunk`)
pub type ChunkId = String;

/// Neutral impact score assigned at extraction time.
pub const DEFAULT_IMPACT_SCORE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Processing,
    Complete,
    Failed,
}

/// Pipeline stages, in execution order, plus the failure exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    Searching,
    Ingesting,
    Extracting,
    Resolving,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Created => "created",
            Stage::Searching => "searching",
            Stage::Ingesting => "ingesting",
            Stage::Extracting => "extracting",
            Stage::Resolving => "resolving",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    /// Status a job reports while sitting in this stage.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Created => JobStatus::Created,
            Stage::Complete => JobStatus::Complete,
            Stage::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type entity counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub actors: usize,
    pub policies: usize,
    pub outcomes: usize,
    pub risks: usize,
}

impl EntityCounts {
    fn slot(&mut self, entity_type: EntityType) -> &mut usize {
        match entity_type {
            EntityType::Actor => &mut self.actors,
            EntityType::Policy => &mut self.policies,
            EntityType::Outcome => &mut self.outcomes,
            EntityType::Risk => &mut self.risks,
        }
    }

    pub fn get(&self, entity_type: EntityType) -> usize {
        match entity_type {
            EntityType::Actor => self.actors,
            EntityType::Policy => self.policies,
            EntityType::Outcome => self.outcomes,
            EntityType::Risk => self.risks,
        }
    }

    pub fn increment(&mut self, entity_type: EntityType) {
        *self.slot(entity_type) += 1;
    }

    pub fn add(&mut self, other: &EntityCounts) {
        for t in EntityType::ALL {
            *self.slot(t) += other.get(t);
        }
    }

    pub fn total(&self) -> usize {
        self.actors + self.policies + self.outcomes + self.risks
    }

    pub fn by_key(&self) -> BTreeMap<&'static str, usize> {
        EntityType::ALL
            .iter()
            .map(|t| (t.count_key(), self.get(*t)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: AnalysisId,
    pub query: String,
    pub status: JobStatus,
    pub current_stage: Stage,
    pub entity_counts: EntityCounts,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            status: JobStatus::Created,
            current_stage: Stage::Created,
            entity_counts: EntityCounts::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub document_id: String,
    pub analysis_id: Option<AnalysisId>,
    pub sequence: usize,
    pub content: String,
    pub token_estimate: usize,
    pub extraction_status: ExtractionStatus,
    /// Set once the chunk's vector is in the search index
    pub is_indexed: bool,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: ingest::Chunk, analysis_id: Option<AnalysisId>) -> Self {
        Self {
            id: chunk.chunk_id,
            document_id: chunk.document_id,
            analysis_id,
            sequence: chunk.sequence,
            content: chunk.content,
            token_estimate: chunk.token_estimate,
            extraction_status: ExtractionStatus::Pending,
            is_indexed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub analysis_id: AnalysisId,
    /// Fixed at extraction; never changes
    pub entity_type: EntityType,
    pub label: String,
    pub aliases: BTreeSet<String>,
    pub confidence: u8,
    pub impact_score: u8,
    pub is_resolved: bool,
    /// Set when this entity is a tombstone for a merged duplicate
    pub merged_into: Option<EntityId>,
}

impl Entity {
    pub fn is_merged(&self) -> bool {
        self.merged_into.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProvenance {
    pub entity_id: EntityId,
    pub chunk_id: ChunkId,
    pub quote: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub analysis_id: AnalysisId,
    pub source_entity_id: EntityId,
    pub target_entity_id: EntityId,
    pub relationship_type: String,
    pub confidence: u8,
}

impl Relationship {
    /// Uniqueness key within an analysis.
    pub fn key(&self) -> (EntityId, EntityId, &str) {
        (
            self.source_entity_id,
            self.target_entity_id,
            self.relationship_type.as_str(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    AliasDict,
    Exact,
    Fuzzy,
    Llm,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::AliasDict => "alias_dict",
            MergeMethod::Exact => "exact",
            MergeMethod::Fuzzy => "fuzzy",
            MergeMethod::Llm => "llm",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit row, one per executed merge group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeLogEntry {
    pub analysis_id: AnalysisId,
    pub primary_entity_id: EntityId,
    pub merged_entity_ids: BTreeSet<EntityId>,
    pub method: MergeMethod,
    pub confidence: u8,
    pub canonical_label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StageChange,
    StatsUpdate,
    ChunkFailed,
    Warning,
    ResolutionComplete,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Monotonically increasing across the store
    pub id: u64,
    pub analysis_id: AnalysisId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub analysis_id: AnalysisId,
    pub stage: Stage,
    pub version: u32,
    pub stats: EntityCounts,
    pub created_at: DateTime<Utc>,
}

/// Result of persisting one chunk's extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitSummary {
    pub entities_created: EntityCounts,
    pub relationships_created: usize,
    /// Relationships whose endpoint labels matched no entity
    pub relationships_dropped: usize,
}

/// One merge group, fully decided, ready to be applied atomically.
#[derive(Debug, Clone)]
pub struct MergeCommit {
    pub analysis_id: AnalysisId,
    /// The primary entity with its post-merge label, aliases and confidence
    pub primary: Entity,
    pub merged_ids: Vec<EntityId>,
    /// Rewritten relationships, replaced by id
    pub relationship_updates: Vec<Relationship>,
    pub relationship_deletions: Vec<RelationshipId>,
    pub log: MergeLogEntry,
}

/// One live neighbour of an entity, seen through a single relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedEntity {
    pub entity_id: EntityId,
    pub label: String,
    pub entity_type: EntityType,
    pub relationship_type: String,
    pub confidence: u8,
    /// True when the focus entity is the relationship's source
    pub outgoing: bool,
}

/// Neighbours of an entity grouped by their type. Every type has a group,
/// possibly empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConnections {
    pub entity: Entity,
    pub groups: BTreeMap<EntityType, Vec<ConnectedEntity>>,
}

impl EntityConnections {
    pub fn count(&self, entity_type: EntityType) -> usize {
        self.groups.get(&entity_type).map_or(0, Vec::len)
    }

    pub fn total(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Connections whose neighbour has one of `types`, in type order.
    pub fn of_types(&self, types: &[EntityType]) -> Vec<&ConnectedEntity> {
        self.groups
            .iter()
            .filter(|(t, _)| types.contains(t))
            .flat_map(|(_, group)| group.iter())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationRole {
    FocusEntity,
    ConnectedEntity,
}

/// Evidence behind a `[n]` marker in a generated summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub id: usize,
    pub entity_id: EntityId,
    pub role: CitationRole,
    pub text: String,
    pub chunk_id: ChunkId,
    pub document_title: String,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub analysis_id: AnalysisId,
    pub entity_id: EntityId,
    pub entity_label: String,
    pub selected_types: Vec<EntityType>,
    pub summary: String,
    pub citations: Vec<Citation>,
    pub generated_at: DateTime<Utc>,
}

/// Corpus-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub indexed_chunks: usize,
    pub total_analyses: usize,
}

/// The queryable graph: live entities and the edges between them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub analysis_id: AnalysisId,
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}
