//! Orchestrator error types.

use common::SagaId;
use messaging::ChannelError;
use saga_store::{SagaStoreError, StepName};
use thiserror::Error;

/// Errors that can occur while orchestrating sagas.
///
/// Everything here is infrastructure-shaped: step failures, timeouts, and
/// compensation problems never surface as errors, only as saga state. An
/// `Err` from an engine entry point means the delivery should be retried.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] SagaStoreError),

    /// Message channel error.
    #[error("Message channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The saga disappeared between lookup and processing.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A compensating command was requested but the frozen compensation
    /// data holds nothing to undo for that step.
    #[error("No compensation data for saga {saga_id}, step {step}")]
    MissingCompensationData { saga_id: SagaId, step: StepName },

    /// The engine's run loop was started twice.
    #[error("Engine run loop is already running")]
    AlreadyRunning,
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
