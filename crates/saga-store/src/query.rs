//! Read-only query surface for operators and metrics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::model::{SagaState, StepName};

/// Filter for querying sagas.
///
/// All filters are optional and combined with AND.
#[derive(Debug, Clone, Default)]
pub struct SagaQuery {
    /// Filter by current state.
    pub state: Option<SagaState>,
    /// Filter by correlation id.
    pub correlation_id: Option<CorrelationId>,
    /// Only sagas created at or after this time.
    pub created_from: Option<DateTime<Utc>>,
    /// Only sagas created at or before this time.
    pub created_to: Option<DateTime<Utc>>,
    /// Maximum number of sagas to return.
    pub limit: Option<usize>,
    /// Number of sagas to skip.
    pub offset: Option<usize>,
}

impl SagaQuery {
    /// Creates an empty query matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by state.
    pub fn state(mut self, state: SagaState) -> Self {
        self.state = Some(state);
        self
    }

    /// Filters by correlation id.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Filters by creation time lower bound (inclusive).
    pub fn created_from(mut self, from: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self
    }

    /// Filters by creation time upper bound (inclusive).
    pub fn created_to(mut self, to: DateTime<Utc>) -> Self {
        self.created_to = Some(to);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Aggregate saga metrics for operator dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaMetrics {
    /// Total sagas stored.
    pub total: u64,
    /// Sagas that ended in `SALE_CONFIRMED`.
    pub confirmed: u64,
    /// Sagas that ended in `COMPENSATED`.
    pub compensated: u64,
    /// Sagas that ended in a failure state.
    pub failed: u64,
    /// Sagas still in flight.
    pub in_flight: u64,
    /// Confirmed share of terminal sagas, 0.0 when none finished yet.
    pub success_rate: f64,
    /// Mean start-to-terminal duration over finished sagas.
    pub average_duration_ms: Option<f64>,
    /// Failure counts grouped by terminal state name.
    pub failures_by_state: HashMap<String, u64>,
}

/// Per-step execution statistics derived from the step logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepPerformance {
    pub step_name: StepName,
    /// Attempts with a known outcome.
    pub executions: u64,
    /// Attempts that ended in failure.
    pub failures: u64,
    /// Successful share of executed attempts, 0.0 when none executed.
    pub success_rate: f64,
    /// Mean dispatch-to-outcome duration.
    pub average_duration_ms: Option<f64>,
}
