//! Step log recording.
//!
//! Records the start and outcome of every step attempt against the saga
//! store. Purely additive: nothing here ever drives a routing decision.
//! Outcome finalization rides inside the engine's transactional update; the
//! start-of-attempt record is written best-effort so a degraded store never
//! blocks the saga's forward progress.

use std::sync::Arc;

use saga_store::{Saga, SagaStep, SagaStore, StepLogMutation, StepName};

use crate::messages::SagaCommand;

/// Records step attempts and builds the outcome mutations the engine
/// includes in its transactional updates.
pub struct StepLogRecorder<S> {
    store: Arc<S>,
}

impl<S> Clone for StepLogRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SagaStore> StepLogRecorder<S> {
    /// Creates a recorder writing to the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Records the dispatch of a command as a fresh attempt.
    ///
    /// Best-effort: a store failure is reported and counted, never
    /// propagated — the outcome finalization repairs the gap later.
    pub async fn record_attempt(&self, saga: &Saga, command: &SagaCommand) {
        let step_data = match serde_json::to_value(&command.payload) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "failed to serialize command payload for step log");
                serde_json::Value::Null
            }
        };
        let record = SagaStep::attempted(saga.id, command.step, saga.attempts, step_data);
        if let Err(error) = self.store.record_step_log(StepLogMutation::Append(record)).await {
            tracing::warn!(
                saga_id = %saga.id,
                step = %command.step,
                %error,
                "step log write failed; continuing"
            );
            metrics::counter!("saga_step_log_failures_total").increment(1);
        }
    }

    /// Builds the outcome mutation for the attempt a reply or timeout
    /// resolved.
    pub fn finalize(
        saga: &Saga,
        step: StepName,
        attempt: u32,
        success: bool,
        error_message: Option<String>,
        response: Option<serde_json::Value>,
    ) -> StepLogMutation {
        StepLogMutation::Finalize {
            saga_id: saga.id,
            step_name: step,
            attempt,
            success,
            error_message,
            step_data: response,
        }
    }

    /// Builds the mutation marking a forward step's effect as undone.
    pub fn compensated(saga: &Saga, forward_step: StepName) -> StepLogMutation {
        StepLogMutation::MarkCompensated {
            saga_id: saga.id,
            step_name: forward_step,
        }
    }
}
