//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{ExamError, ExamId, SessionError};
use storage::repository::StorageError;

/// Errors emitted by the exam services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamServiceError {
    #[error("exam {exam_id} is unavailable: {reason}")]
    ContentUnavailable { exam_id: ExamId, reason: String },
    #[error("failed to persist exam result: {0}")]
    Persistence(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Content(#[from] ExamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
