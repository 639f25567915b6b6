//! Error types for the StudyHub engine.

use crate::DatasetKey;
use thiserror::Error;

/// All possible errors from the StudyHub engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown dataset: {0}")]
    UnknownDataset(DatasetKey),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid entry '{id}' in {dataset}: {reason}")]
    InvalidEntry {
        dataset: DatasetKey,
        id: String,
        reason: String,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
