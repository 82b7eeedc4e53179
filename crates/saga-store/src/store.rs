use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};

use crate::error::Result;
use crate::model::{Saga, SagaStep, StepName};
use crate::query::{SagaMetrics, SagaQuery, StepPerformance};

/// A write against the step log, applied atomically with a saga update.
#[derive(Debug, Clone)]
pub enum StepLogMutation {
    /// Append a fresh attempt record.
    Append(SagaStep),

    /// Finalize an attempt with its outcome.
    ///
    /// Updates the matching `Attempted` record in place, computing the
    /// duration from the record's real start time. If the attempt record is
    /// missing (its best-effort write never landed), a complete finalized
    /// record is inserted instead so the audit trail stays whole.
    Finalize {
        saga_id: SagaId,
        step_name: StepName,
        attempt: u32,
        success: bool,
        error_message: Option<String>,
        /// Response payload to store; the request payload is kept when `None`.
        step_data: Option<serde_json::Value>,
    },

    /// Mark the latest succeeded record of a forward step as compensated.
    ///
    /// A no-op when no succeeded record exists.
    MarkCompensated { saga_id: SagaId, step_name: StepName },
}

/// Core contract for durable saga storage.
///
/// The saga row and its step logs must update atomically in
/// [`update_transactionally`](SagaStore::update_transactionally); everything
/// under "query surface" is read-only and never drives orchestration.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads a saga by id.
    async fn load(&self, saga_id: SagaId) -> Result<Option<Saga>>;

    /// Loads a saga by its externally-visible correlation id.
    async fn load_by_correlation(&self, correlation_id: CorrelationId) -> Result<Option<Saga>>;

    /// Persists a new saga.
    ///
    /// Fails with `DuplicateCorrelation` if a saga already exists for the
    /// request's correlation id.
    async fn save_new(&self, saga: Saga) -> Result<Saga>;

    /// Applies the saga update and the step-log mutations atomically.
    ///
    /// The stored row must still be at `saga.revision`; on a mismatch the
    /// operation fails with `Conflict` and nothing is written. Returns the
    /// updated saga with its revision bumped.
    async fn update_transactionally(
        &self,
        saga: &Saga,
        step_logs: &[StepLogMutation],
    ) -> Result<Saga>;

    /// Applies a single step-log mutation outside any saga update.
    ///
    /// This is the recorder's additive path; callers treat failures as
    /// non-fatal.
    async fn record_step_log(&self, mutation: StepLogMutation) -> Result<()>;

    /// Returns all step logs for a saga, in insertion order.
    async fn step_logs(&self, saga_id: SagaId) -> Result<Vec<SagaStep>>;

    /// Returns sagas matching the query, oldest first.
    async fn query(&self, query: SagaQuery) -> Result<Vec<Saga>>;

    /// Returns sagas stuck in `FAILED` with unresolved compensation,
    /// awaiting operator intervention.
    async fn find_failed(&self) -> Result<Vec<Saga>>;

    /// Returns aggregate saga metrics.
    async fn metrics(&self) -> Result<SagaMetrics>;

    /// Returns per-step execution statistics.
    async fn step_performance(&self) -> Result<Vec<StepPerformance>>;

    /// Deletes terminal sagas that completed before the cutoff, along with
    /// their step logs. Non-terminal sagas are never touched.
    ///
    /// Returns the number of sagas deleted.
    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64>;
}
