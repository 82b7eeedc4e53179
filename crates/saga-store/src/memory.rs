use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaStoreError};
use crate::model::{Saga, SagaStep, StepLogState, StepName};
use crate::query::{SagaMetrics, SagaQuery, StepPerformance};
use crate::store::{SagaStore, StepLogMutation};

#[derive(Default)]
struct StoreState {
    sagas: HashMap<SagaId, Saga>,
    by_correlation: HashMap<CorrelationId, SagaId>,
    steps: Vec<SagaStep>,
}

impl StoreState {
    fn apply_step_mutation(&mut self, mutation: &StepLogMutation) {
        match mutation {
            StepLogMutation::Append(step) => self.steps.push(step.clone()),
            StepLogMutation::Finalize {
                saga_id,
                step_name,
                attempt,
                success,
                error_message,
                step_data,
            } => {
                let completed_at = Utc::now();
                let state = if *success {
                    StepLogState::Succeeded
                } else {
                    StepLogState::Failed
                };
                if let Some(record) = self.steps.iter_mut().rev().find(|s| {
                    s.saga_id == *saga_id && s.step_name == *step_name && s.attempt == *attempt
                }) {
                    record.state = state;
                    record.completed_at = Some(completed_at);
                    record.duration_ms = Some((completed_at - record.started_at).num_milliseconds());
                    record.success = Some(*success);
                    record.error_message = error_message.clone();
                    if let Some(data) = step_data {
                        record.step_data = data.clone();
                    }
                } else {
                    // Attempt record missing (best-effort write lost); keep
                    // the audit trail whole with a fully-formed record.
                    let mut record = SagaStep::attempted(
                        *saga_id,
                        *step_name,
                        *attempt,
                        step_data.clone().unwrap_or(serde_json::Value::Null),
                    );
                    record.state = state;
                    record.completed_at = Some(completed_at);
                    record.duration_ms = Some(0);
                    record.success = Some(*success);
                    record.error_message = error_message.clone();
                    self.steps.push(record);
                }
            }
            StepLogMutation::MarkCompensated { saga_id, step_name } => {
                if let Some(record) = self.steps.iter_mut().rev().find(|s| {
                    s.saga_id == *saga_id
                        && s.step_name == *step_name
                        && s.state == StepLogState::Succeeded
                }) {
                    record.state = StepLogState::Compensated;
                }
            }
        }
    }
}

/// In-memory saga store for tests and single-process deployments.
///
/// Provides the same contract as the PostgreSQL implementation, including
/// revision-checked transactional updates.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of sagas stored.
    pub async fn saga_count(&self) -> usize {
        self.state.read().await.sagas.len()
    }

    /// Returns the total number of step-log records stored.
    pub async fn step_count(&self) -> usize {
        self.state.read().await.steps.len()
    }

    /// Clears all sagas and step logs.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.sagas.clear();
        state.by_correlation.clear();
        state.steps.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        Ok(self.state.read().await.sagas.get(&saga_id).cloned())
    }

    async fn load_by_correlation(&self, correlation_id: CorrelationId) -> Result<Option<Saga>> {
        let state = self.state.read().await;
        Ok(state
            .by_correlation
            .get(&correlation_id)
            .and_then(|id| state.sagas.get(id))
            .cloned())
    }

    async fn save_new(&self, saga: Saga) -> Result<Saga> {
        let mut state = self.state.write().await;
        if state.by_correlation.contains_key(&saga.correlation_id) {
            return Err(SagaStoreError::DuplicateCorrelation(saga.correlation_id));
        }
        state.by_correlation.insert(saga.correlation_id, saga.id);
        state.sagas.insert(saga.id, saga.clone());
        Ok(saga)
    }

    async fn update_transactionally(
        &self,
        saga: &Saga,
        step_logs: &[StepLogMutation],
    ) -> Result<Saga> {
        let mut state = self.state.write().await;

        let stored = state
            .sagas
            .get(&saga.id)
            .ok_or(SagaStoreError::NotFound(saga.id))?;
        if stored.revision != saga.revision {
            return Err(SagaStoreError::Conflict {
                saga_id: saga.id,
                expected: saga.revision,
                actual: stored.revision,
            });
        }

        let mut updated = saga.clone();
        updated.revision += 1;
        state.sagas.insert(updated.id, updated.clone());
        for mutation in step_logs {
            state.apply_step_mutation(mutation);
        }

        Ok(updated)
    }

    async fn record_step_log(&self, mutation: StepLogMutation) -> Result<()> {
        self.state.write().await.apply_step_mutation(&mutation);
        Ok(())
    }

    async fn step_logs(&self, saga_id: SagaId) -> Result<Vec<SagaStep>> {
        let state = self.state.read().await;
        Ok(state
            .steps
            .iter()
            .filter(|s| s.saga_id == saga_id)
            .cloned()
            .collect())
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<Saga>> {
        let state = self.state.read().await;
        let mut sagas: Vec<_> = state
            .sagas
            .values()
            .filter(|s| {
                if let Some(wanted) = query.state
                    && s.state != wanted
                {
                    return false;
                }
                if let Some(correlation) = query.correlation_id
                    && s.correlation_id != correlation
                {
                    return false;
                }
                if let Some(from) = query.created_from
                    && s.created_at < from
                {
                    return false;
                }
                if let Some(to) = query.created_to
                    && s.created_at > to
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        sagas.sort_by_key(|s| s.created_at);

        let offset = query.offset.unwrap_or(0);
        let sagas: Vec<_> = sagas.into_iter().skip(offset).collect();
        let sagas = if let Some(limit) = query.limit {
            sagas.into_iter().take(limit).collect()
        } else {
            sagas
        };

        Ok(sagas)
    }

    async fn find_failed(&self) -> Result<Vec<Saga>> {
        self.query(SagaQuery::new().state(crate::model::SagaState::Failed))
            .await
    }

    async fn metrics(&self) -> Result<SagaMetrics> {
        let state = self.state.read().await;

        let total = state.sagas.len() as u64;
        let mut confirmed = 0u64;
        let mut compensated = 0u64;
        let mut failed = 0u64;
        let mut in_flight = 0u64;
        let mut failures_by_state: HashMap<String, u64> = HashMap::new();
        let mut durations: Vec<i64> = Vec::new();

        for saga in state.sagas.values() {
            if saga.state.is_success() {
                confirmed += 1;
            } else if saga.state == crate::model::SagaState::Compensated {
                compensated += 1;
            } else if saga.state.is_failure() {
                failed += 1;
                *failures_by_state
                    .entry(saga.state.as_str().to_string())
                    .or_insert(0) += 1;
            } else {
                in_flight += 1;
            }
            if let Some(duration) = saga.duration_ms() {
                durations.push(duration);
            }
        }

        let terminal = confirmed + compensated + failed;
        let success_rate = if terminal > 0 {
            confirmed as f64 / terminal as f64
        } else {
            0.0
        };
        let average_duration_ms = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
        };

        Ok(SagaMetrics {
            total,
            confirmed,
            compensated,
            failed,
            in_flight,
            success_rate,
            average_duration_ms,
            failures_by_state,
        })
    }

    async fn step_performance(&self) -> Result<Vec<StepPerformance>> {
        let state = self.state.read().await;

        let mut performance = Vec::new();
        for step_name in StepName::ALL {
            let mut executions = 0u64;
            let mut failures = 0u64;
            let mut durations: Vec<i64> = Vec::new();
            for record in state.steps.iter().filter(|s| s.step_name == step_name) {
                let Some(success) = record.success else {
                    continue;
                };
                executions += 1;
                if !success {
                    failures += 1;
                }
                if let Some(duration) = record.duration_ms {
                    durations.push(duration);
                }
            }
            if executions == 0 {
                continue;
            }
            performance.push(StepPerformance {
                step_name,
                executions,
                failures,
                success_rate: (executions - failures) as f64 / executions as f64,
                average_duration_ms: if durations.is_empty() {
                    None
                } else {
                    Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64)
                },
            });
        }

        Ok(performance)
    }

    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;

        let doomed: Vec<SagaId> = state
            .sagas
            .values()
            .filter(|s| matches!(s.completed_at, Some(done) if done < older_than))
            .map(|s| s.id)
            .collect();

        for id in &doomed {
            if let Some(saga) = state.sagas.remove(id) {
                state.by_correlation.remove(&saga.correlation_id);
            }
        }
        state.steps.retain(|s| !doomed.contains(&s.saga_id));

        Ok(doomed.len() as u64)
    }
}
