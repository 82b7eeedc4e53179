//! Durable storage for saga aggregates and their step logs.
//!
//! This crate owns the persisted saga data model (the aggregate record, its
//! state enum, the append-only context, and the per-attempt step log) and
//! the [`SagaStore`] contract the orchestrator runs against:
//!
//! - [`InMemorySagaStore`] — lock-based in-memory twin used by tests and the
//!   worker binary.
//! - [`PostgresSagaStore`] — sqlx-backed implementation; the saga row update
//!   and step-log writes share one transaction.
//! - [`InstrumentedSagaStore`] — decorator recording a duration histogram
//!   and error counter for every store operation.
//!
//! The query surface (by state, correlation id, time range, plus aggregate
//! metrics) is read-only and exists for operators; nothing in it drives
//! orchestration decisions.

pub mod context;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod postgres;
pub mod query;
pub mod retention;
pub mod store;

pub use context::{CompensationData, SagaContext, StepResult};
pub use error::{Result, SagaStoreError};
pub use memory::InMemorySagaStore;
pub use metrics::InstrumentedSagaStore;
pub use model::{Saga, SagaState, SagaStep, StepLogState, StepName};
pub use postgres::PostgresSagaStore;
pub use query::{SagaMetrics, SagaQuery, StepPerformance};
pub use retention::{RetentionPolicy, run_sweeper};
pub use store::{SagaStore, StepLogMutation};
