//! Error taxonomy shared by the core and the application crate.

use thiserror::Error;

use crate::models::DocumentStatus;

/// Every failure the QA engine can surface to a caller.
///
/// Provider and storage errors are carried as strings so that the enum
/// stays `Clone`-free of foreign error types and can cross the HTTP
/// boundary unchanged.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index write failed: {0}")]
    IndexWrite(String),

    #[error("index read failed: {0}")]
    IndexRead(String),

    #[error("language model call failed: {0}")]
    ModelCall(String),

    #[error("invalid status transition for document {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: DocumentStatus,
        to: DocumentStatus,
    },

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RagError {
    /// Stable machine-readable code used in the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::NotFound(_) => "not_found",
            RagError::UnsupportedContentType(_) => "unsupported_content_type",
            RagError::Extraction(_) => "extraction_failed",
            RagError::Embedding(_) => "embedding_failed",
            RagError::IndexWrite(_) => "index_write_failed",
            RagError::IndexRead(_) => "index_read_failed",
            RagError::ModelCall(_) => "model_call_failed",
            RagError::InvalidTransition { .. } => "invalid_transition",
            RagError::Persistence(_) => "persistence_failed",
            RagError::InvalidRequest(_) => "bad_request",
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_error_names_both_states() {
        let err = RagError::InvalidTransition {
            id: "d1".into(),
            from: DocumentStatus::Ready,
            to: DocumentStatus::Error,
        };
        assert_eq!(
            err.to_string(),
            "invalid status transition for document d1: ready -> error"
        );
        assert_eq!(err.code(), "invalid_transition");
    }
}
