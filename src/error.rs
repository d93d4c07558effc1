//! Error types for submitting and processing documents.
//!
//! Submission errors are returned to the caller synchronously. Pipeline errors
//! never leave the background task: they are logged and collapsed into
//! [`JobStatus::Failed`](crate::registry::JobStatus::Failed).

use thiserror::Error;

/// Errors returned synchronously by [`ExtractionService::submit`].
///
/// [`ExtractionService::submit`]: crate::service::ExtractionService::submit
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The upload's filename is not acceptable: it is not a PDF, or it has
    /// directory components.
    #[error("{reason} (got {filename:?})")]
    InvalidInput {
        filename: String,
        reason: &'static str,
    },

    /// We could not save the payload before handing it to the pipeline.
    #[error("failed to save uploaded {filename:?} to temporary storage: {source}")]
    TempStorage {
        filename: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised inside the document pipeline, one variant per stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The payload is not a parseable PDF, or the rasterizer is missing.
    #[error("unsupported document: {detail}")]
    UnsupportedDocument { detail: String },

    /// Text recognition failed for one page, which fails the whole document.
    #[error("recognition failed on page {page}: {detail}")]
    RecognitionFailure { page: usize, detail: String },

    /// The durable write of the result failed.
    #[error("could not store result under {key:?}: {detail}")]
    StorageUnavailable { key: String, detail: String },

    /// Something went wrong that none of the stages anticipated, such as a
    /// panic in a worker.
    #[error("unexpected pipeline failure: {detail}")]
    Unexpected { detail: String },
}

impl PipelineError {
    /// Build an [`PipelineError::UnsupportedDocument`] from any error,
    /// keeping the whole context chain.
    pub fn unsupported(err: impl Into<anyhow::Error>) -> Self {
        Self::UnsupportedDocument {
            detail: format!("{:#}", err.into()),
        }
    }

    /// Which stage failed? Used as a structured logging field.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::UnsupportedDocument { .. } => "rasterize",
            Self::RecognitionFailure { .. } => "recognize",
            Self::StorageUnavailable { .. } => "upload",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}
