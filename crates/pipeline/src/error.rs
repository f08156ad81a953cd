use extract::LlmError;
use store::{EmbeddingError, StoreError};
use thiserror::Error;

/// Failure taxonomy surfaced by the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Empty or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// LLM or embedding service unreachable, out of quota, or refusing auth
    #[error("External service error: {0}")]
    ExternalService(String),

    /// A referenced row is missing or in an impossible state
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn is_external_service(&self) -> bool {
        matches!(self, PipelineError::ExternalService(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::ExternalService(_) => "external_service",
            PipelineError::DataIntegrity(_) => "data_integrity",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }

    /// Message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            PipelineError::Validation(m)
            | PipelineError::ExternalService(m)
            | PipelineError::DataIntegrity(m)
            | PipelineError::Unexpected(m) => m,
        }
    }

    /// Place an arbitrary error in the taxonomy by the first typed error
    /// found in its source chain. Anything unrecognised is unexpected.
    pub fn classify(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<PipelineError>() {
                return e.clone();
            }
            if let Some(e) = cause.downcast_ref::<LlmError>() {
                return Self::from(e.clone()).with_message(message);
            }
            if let Some(e) = cause.downcast_ref::<EmbeddingError>() {
                return Self::from(e.clone()).with_message(message);
            }
            if let Some(e) = cause.downcast_ref::<StoreError>() {
                return Self::from(e.clone()).with_message(message);
            }
        }
        PipelineError::Unexpected(message)
    }

    fn with_message(self, message: String) -> Self {
        match self {
            PipelineError::Validation(_) => PipelineError::Validation(message),
            PipelineError::ExternalService(_) => PipelineError::ExternalService(message),
            PipelineError::DataIntegrity(_) => PipelineError::DataIntegrity(message),
            PipelineError::Unexpected(_) => PipelineError::Unexpected(message),
        }
    }
}

impl From<LlmError> for PipelineError {
    fn from(e: LlmError) -> Self {
        if e.is_external_service() {
            PipelineError::ExternalService(e.to_string())
        } else {
            PipelineError::Unexpected(e.to_string())
        }
    }
}

impl From<EmbeddingError> for PipelineError {
    fn from(e: EmbeddingError) -> Self {
        if e.is_external_service() {
            PipelineError::ExternalService(e.to_string())
        } else {
            PipelineError::Unexpected(e.to_string())
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        if e.is_data_integrity() {
            PipelineError::DataIntegrity(e.to_string())
        } else {
            PipelineError::Unexpected(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use uuid::Uuid;

    #[test]
    fn test_llm_errors_split_by_cause() {
        let quota = PipelineError::from(LlmError::RateLimited("quota".into()));
        assert!(quota.is_external_service());

        let garbage = PipelineError::from(LlmError::InvalidResponse("not json".into()));
        assert_eq!(garbage.kind(), "unexpected");
    }

    #[test]
    fn test_classify_walks_context_chain() {
        let result: anyhow::Result<()> = Err(LlmError::Unauthorized("bad key".into()))
            .context("Extracting chunk 3");
        let err = PipelineError::classify(&result.unwrap_err());

        assert!(err.is_external_service());
        assert!(err.message().starts_with("Extracting chunk 3"));
    }

    #[test]
    fn test_classify_store_errors() {
        let err = anyhow::Error::new(StoreError::AnalysisNotFound(Uuid::nil()));
        assert_eq!(PipelineError::classify(&err).kind(), "data_integrity");

        let err = anyhow::Error::new(StoreError::Backend("disk full".into()));
        assert_eq!(PipelineError::classify(&err).kind(), "unexpected");
    }

    #[test]
    fn test_classify_unknown_is_unexpected() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(
            PipelineError::classify(&err),
            PipelineError::Unexpected("something odd".into())
        );
    }

    #[test]
    fn test_classify_keeps_pipeline_errors() {
        let err = anyhow::Error::new(PipelineError::Validation("empty query".into()));
        assert_eq!(
            PipelineError::classify(&err),
            PipelineError::Validation("empty query".into())
        );
    }
}
