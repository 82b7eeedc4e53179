use common::{CorrelationId, SagaId};
use thiserror::Error;

use crate::model::StepName;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The saga was not found.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// A saga with this correlation id already exists.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),

    /// The saga row changed underneath the caller.
    #[error("Revision conflict for saga {saga_id}: expected {expected}, found {actual}")]
    Conflict {
        saga_id: SagaId,
        expected: i64,
        actual: i64,
    },

    /// A step-log mutation targeted a record that does not exist.
    #[error("Step log not found for saga {saga_id}, step {step_name}, attempt {attempt}")]
    StepLogNotFound {
        saga_id: SagaId,
        step_name: StepName,
        attempt: u32,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;
