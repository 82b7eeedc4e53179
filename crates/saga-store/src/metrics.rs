//! Store instrumentation decorator.

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};

use crate::error::Result;
use crate::model::{Saga, SagaStep};
use crate::query::{SagaMetrics, SagaQuery, StepPerformance};
use crate::store::{SagaStore, StepLogMutation};

/// Decorator that times every store operation through one wrapper instead of
/// hand-repeated per-method boilerplate.
///
/// Records `saga_store_operation_duration_seconds` (labelled by operation)
/// for success and failure alike, measured from the operation's real start,
/// plus `saga_store_operation_errors_total` on failure.
#[derive(Clone)]
pub struct InstrumentedSagaStore<S> {
    inner: S,
}

impl<S> InstrumentedSagaStore<S> {
    /// Wraps a store with instrumentation.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Returns a reference to the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn timed<T, F>(operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        metrics::histogram!("saga_store_operation_duration_seconds", "operation" => operation)
            .record(start.elapsed().as_secs_f64());
        if result.is_err() {
            metrics::counter!("saga_store_operation_errors_total", "operation" => operation)
                .increment(1);
        }
        result
    }
}

#[async_trait]
impl<S: SagaStore> SagaStore for InstrumentedSagaStore<S> {
    async fn load(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        Self::timed("load", self.inner.load(saga_id)).await
    }

    async fn load_by_correlation(&self, correlation_id: CorrelationId) -> Result<Option<Saga>> {
        Self::timed(
            "load_by_correlation",
            self.inner.load_by_correlation(correlation_id),
        )
        .await
    }

    async fn save_new(&self, saga: Saga) -> Result<Saga> {
        Self::timed("save_new", self.inner.save_new(saga)).await
    }

    async fn update_transactionally(
        &self,
        saga: &Saga,
        step_logs: &[StepLogMutation],
    ) -> Result<Saga> {
        Self::timed(
            "update_transactionally",
            self.inner.update_transactionally(saga, step_logs),
        )
        .await
    }

    async fn record_step_log(&self, mutation: StepLogMutation) -> Result<()> {
        Self::timed("record_step_log", self.inner.record_step_log(mutation)).await
    }

    async fn step_logs(&self, saga_id: SagaId) -> Result<Vec<SagaStep>> {
        Self::timed("step_logs", self.inner.step_logs(saga_id)).await
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<Saga>> {
        Self::timed("query", self.inner.query(query)).await
    }

    async fn find_failed(&self) -> Result<Vec<Saga>> {
        Self::timed("find_failed", self.inner.find_failed()).await
    }

    async fn metrics(&self) -> Result<SagaMetrics> {
        Self::timed("metrics", self.inner.metrics()).await
    }

    async fn step_performance(&self) -> Result<Vec<StepPerformance>> {
        Self::timed("step_performance", self.inner.step_performance()).await
    }

    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        Self::timed("sweep_terminal", self.inner.sweep_terminal(older_than)).await
    }
}
