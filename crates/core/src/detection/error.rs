use thiserror::Error;

use super::types::CheckStatus;
use crate::repository::RepositoryError;

/// Errors that fail a whole detection request.
///
/// Per-model gateway failures never appear here; they become error-tagged
/// model results.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Invalid detection request: {0}")]
    Validation(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] RepositoryError),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: CheckStatus, to: CheckStatus },
}
