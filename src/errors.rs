//! Typed error hierarchy for the clonewright pipeline.
//!
//! - `PipelineError`: run-fatal conditions that end a run before deploy
//! - `GenerationError`: a single model call that produced nothing usable

use clonewright_common::CollaboratorError;
use thiserror::Error;

/// Errors that stop a run. Everything else degrades it instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Page extraction failed: {0}")]
    Extraction(#[source] CollaboratorError),

    #[error("Failed to provision execution environment: {0}")]
    Provisioning(#[source] CollaboratorError),

    #[error("Upload to {resource} failed: {source}")]
    Upload {
        resource: String,
        #[source]
        source: CollaboratorError,
    },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("Stage {stage} exceeded its {secs}s timeout")]
    StageTimeout { stage: String, secs: u64 },

    #[error("Extraction contained no sections")]
    NoSections,

    #[error("All {total} sections failed to generate")]
    NothingGenerated { total: usize },

    #[error("Illegal stage transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short machine-friendly reason recorded on the terminal event.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction_failed",
            Self::Provisioning(_) => "provisioning_failed",
            Self::Upload { .. } => "upload_failed",
            Self::Cancelled { .. } => "cancelled",
            Self::StageTimeout { .. } => "stage_timeout",
            Self::NoSections => "no_sections",
            Self::NothingGenerated { .. } => "nothing_generated",
            Self::IllegalTransition { .. } => "internal",
            Self::Other(_) => "internal",
        }
    }
}

/// A model call that failed or returned output we could not use.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Completion call failed: {0}")]
    Call(#[from] CollaboratorError),

    #[error("Completion timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Malformed model output: {0}")]
    Malformed(String),

    #[error("Model output failed validation: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::StageTimeout {
            stage: "generating".into(),
            secs: 420,
        };
        assert_eq!(err.to_string(), "Stage generating exceeded its 420s timeout");
        assert_eq!(err.reason(), "stage_timeout");
    }

    #[test]
    fn test_extraction_error_keeps_source() {
        use std::error::Error as _;
        let err = PipelineError::Extraction(CollaboratorError::Transport("dns".into()));
        assert!(err.to_string().contains("dns"));
        assert!(err.source().is_some());
        assert_eq!(err.reason(), "extraction_failed");
    }

    #[test]
    fn test_generation_error_from_collaborator() {
        let err: GenerationError = CollaboratorError::Malformed("x".into()).into();
        assert!(matches!(err, GenerationError::Call(_)));
    }

    #[test]
    fn test_pipeline_error_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PipelineError::Other(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
