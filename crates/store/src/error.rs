use thiserror::Error;

use crate::model::{AnalysisId, ChunkId, EntityId, RelationshipId};

/// Errors from the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Analysis not found: {0}")]
    AnalysisNotFound(AnalysisId),

    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    #[error("Chunk {chunk_id} does not belong to analysis {analysis_id}")]
    ChunkNotInAnalysis {
        chunk_id: ChunkId,
        analysis_id: AnalysisId,
    },

    #[error("Entity {0} has already been merged")]
    AlreadyMerged(EntityId),

    #[error("Cannot merge entity {merged} into {primary}: entity types differ")]
    TypeMismatch { primary: EntityId, merged: EntityId },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True when a referenced row is missing or in an impossible state.
    pub fn is_data_integrity(&self) -> bool {
        !matches!(self, StoreError::Backend(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
