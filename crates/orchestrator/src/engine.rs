//! The orchestrator engine.
//!
//! Drives the state machine: consumes replies and timeout notices, persists
//! each transition atomically with its step-log updates, and performs the
//! prescribed side effects strictly after the commit. Work for distinct
//! sagas proceeds in parallel; work for one saga is serialized through a
//! per-saga mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{CorrelationId, SagaId, SaleRequest};
use futures_util::StreamExt;
use messaging::{Message, MessageChannel, MessageStream, routing};
use saga_store::{Saga, SagaQuery, SagaState, SagaStore, SagaStoreError, StepName};
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, Result};
use crate::machine::{self, Effect, Lifecycle, RetryLimits, SagaEvent, TransitionOutcome};
use crate::messages::{
    LifecycleEvent, ReplyOutcome, SagaCommand, StepReply, build_command, command_routing_key,
};
use crate::recorder::StepLogRecorder;
use crate::retry::RetryConfig;
use crate::timeout::{TimeoutNotice, TimeoutSupervisor};

/// How many times one delivery is handed to the engine before the message
/// is dead-lettered.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for every dispatched command.
    pub step_timeout: Duration,
    /// Retry policy for forward steps (transient failures only).
    pub forward_retry: RetryConfig,
    /// Retry policy for compensating steps (every failure kind).
    pub compensation_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            forward_retry: RetryConfig::forward(),
            compensation_retry: RetryConfig::compensation(),
        }
    }
}

impl EngineConfig {
    fn limits(&self) -> RetryLimits {
        RetryLimits {
            forward_attempts: self.forward_retry.max_attempts,
            compensation_attempts: self.compensation_retry.max_attempts,
        }
    }
}

/// Orchestrates sale sagas over a saga store and a message channel.
pub struct OrchestratorEngine<S, C> {
    store: Arc<S>,
    channel: Arc<C>,
    config: EngineConfig,
    recorder: StepLogRecorder<S>,
    timeouts: TimeoutSupervisor,
    timeout_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<TimeoutNotice>>>>,
    locks: Arc<Mutex<HashMap<SagaId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<S, C> Clone for OrchestratorEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            channel: Arc::clone(&self.channel),
            config: self.config.clone(),
            recorder: self.recorder.clone(),
            timeouts: self.timeouts.clone(),
            timeout_rx: Arc::clone(&self.timeout_rx),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<S, C> OrchestratorEngine<S, C>
where
    S: SagaStore + 'static,
    C: MessageChannel + 'static,
{
    /// Creates an engine over the given store and channel.
    pub fn new(store: Arc<S>, channel: Arc<C>, config: EngineConfig) -> Self {
        let (timeouts, timeout_rx) = TimeoutSupervisor::new(config.step_timeout);
        Self {
            recorder: StepLogRecorder::new(Arc::clone(&store)),
            store,
            channel,
            config,
            timeouts,
            timeout_rx: Arc::new(Mutex::new(Some(timeout_rx))),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The deadline supervisor, exposed for inspection.
    pub fn timeouts(&self) -> &TimeoutSupervisor {
        &self.timeouts
    }

    /// Accepts a sale request: creates the saga, dispatches the first
    /// command, and returns without awaiting completion.
    ///
    /// Re-submitting a correlation id that already has a saga returns that
    /// saga's correlation id and emits nothing.
    #[tracing::instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    pub async fn submit(&self, request: SaleRequest) -> Result<CorrelationId> {
        metrics::counter!("saga_submitted_total").increment(1);

        if let Some(existing) = self.store.load_by_correlation(request.correlation_id).await? {
            tracing::info!(saga_id = %existing.id, "duplicate submission collapsed into existing saga");
            return Ok(existing.correlation_id);
        }

        let mut saga = match self.store.save_new(Saga::new(request)).await {
            Ok(saga) => saga,
            // Lost a race against a concurrent duplicate; the unique
            // constraint is the arbiter.
            Err(SagaStoreError::DuplicateCorrelation(correlation_id)) => {
                tracing::info!("duplicate submission collapsed into existing saga");
                return Ok(correlation_id);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(saga_id = %saga.id, "saga started");

        self.publish_lifecycle(&saga, Lifecycle::Started).await;
        self.dispatch_next(&mut saga).await?;
        Ok(saga.correlation_id)
    }

    /// Applies a downstream reply to its saga.
    #[tracing::instrument(skip(self, reply), fields(correlation_id = %reply.correlation_id, step = %reply.step))]
    pub async fn handle_reply(&self, reply: StepReply) -> Result<()> {
        let Some(saga) = self.store.load_by_correlation(reply.correlation_id).await? else {
            tracing::warn!("reply for unknown correlation id discarded");
            metrics::counter!("saga_events_discarded_total").increment(1);
            return Ok(());
        };
        let event = SagaEvent::Reply {
            step: reply.step,
            outcome: reply.outcome,
        };
        self.process_event(saga.id, event).await
    }

    /// Applies an elapsed step deadline to its saga, exactly like a failure
    /// reply with a timeout-tagged error message.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id, step = %step))]
    pub async fn handle_timeout(&self, saga_id: SagaId, step: StepName) -> Result<()> {
        let event = SagaEvent::TimedOut {
            step,
            after: self.config.step_timeout,
        };
        self.process_event(saga_id, event).await
    }

    /// Consumes the reply stream and timeout notices until the stream ends.
    ///
    /// Malformed payloads go straight to the dead-letter path; a delivery
    /// that keeps failing on infrastructure errors is retried a bounded
    /// number of times and then dead-lettered.
    pub async fn run(&self, mut replies: MessageStream) -> Result<()> {
        let mut timeout_rx = self
            .timeout_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(OrchestratorError::AlreadyRunning)?;

        loop {
            tokio::select! {
                maybe_message = replies.next() => {
                    match maybe_message {
                        None => break,
                        Some(message) => self.process_delivery(message).await,
                    }
                }
                Some(notice) = timeout_rx.recv() => {
                    if let Err(error) = self.handle_timeout(notice.saga_id, notice.step).await {
                        tracing::error!(
                            saga_id = %notice.saga_id,
                            step = %notice.step,
                            %error,
                            "timeout handling failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-dispatches the outstanding command for every non-terminal saga.
    ///
    /// Run at startup: heals sagas whose command was lost to a crash
    /// between commit and emission. Safe under at-least-once delivery.
    pub async fn recover_inflight(&self) -> Result<u32> {
        let mut recovered = 0;
        for state in SagaState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            for found in self.store.query(SagaQuery::new().state(state)).await? {
                let lock = self.saga_lock(found.id);
                let _guard = lock.lock().await;
                let Some(mut saga) = self.store.load(found.id).await? else {
                    continue;
                };
                if saga.is_terminal() {
                    continue;
                }
                if let Some(step) = saga.state.awaiting_step() {
                    let command = build_command(&saga, step)?;
                    self.send_command(&saga, &command).await?;
                } else {
                    self.dispatch_next(&mut saga).await?;
                }
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(recovered, "re-dispatched in-flight sagas");
        }
        Ok(recovered)
    }

    async fn process_delivery(&self, message: Message) {
        let reply: StepReply = match serde_json::from_value(message.payload.clone()) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(message_id = %message.message_id, %error, "malformed reply");
                if let Err(error) = self.channel.dead_letter(message, "malformed reply").await {
                    tracing::error!(%error, "dead-letter publish failed");
                }
                return;
            }
        };

        for attempt in 1..=DELIVERY_ATTEMPTS {
            match self.handle_reply(reply.clone()).await {
                Ok(()) => return,
                Err(error) if attempt < DELIVERY_ATTEMPTS => {
                    tracing::warn!(%error, attempt, "reply handling failed; retrying delivery");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(error) => {
                    tracing::error!(%error, "reply handling exhausted retries; dead-lettering");
                    let reason = error.to_string();
                    if let Err(error) = self.channel.dead_letter(message, &reason).await {
                        tracing::error!(%error, "dead-letter publish failed");
                    }
                    return;
                }
            }
        }
    }

    /// Runs one event through the state machine under the saga's lock:
    /// transition, transactional persist, then post-commit effects.
    async fn process_event(&self, saga_id: SagaId, event: SagaEvent) -> Result<()> {
        let lock = self.saga_lock(saga_id);
        let _guard = lock.lock().await;

        let Some(mut saga) = self.store.load(saga_id).await? else {
            tracing::warn!(%saga_id, "event for missing saga discarded");
            metrics::counter!("saga_events_discarded_total").increment(1);
            return Ok(());
        };

        let transition = match machine::transition(&saga, &event, &self.config.limits()) {
            TransitionOutcome::Discarded { reason } => {
                tracing::warn!(%saga_id, state = %saga.state, %reason, "event discarded");
                metrics::counter!("saga_events_discarded_total").increment(1);
                return Ok(());
            }
            TransitionOutcome::Applied(transition) => transition,
        };

        // The attempt this event resolves, captured before the state moves.
        let resolved_step = saga.current_step;
        let resolved_attempt = saga.attempts;

        let mut mutations = Vec::new();
        if let Some(step) = resolved_step {
            let (success, response) = match &event {
                SagaEvent::Reply { outcome, .. } => (
                    matches!(outcome, ReplyOutcome::Succeeded { .. }),
                    serde_json::to_value(outcome).ok(),
                ),
                SagaEvent::TimedOut { .. } => (false, None),
            };
            mutations.push(StepLogRecorder::<S>::finalize(
                &saga,
                step,
                resolved_attempt,
                success,
                transition.error.clone(),
                response,
            ));
            if success && let Some(forward) = step.compensates() {
                mutations.push(StepLogRecorder::<S>::compensated(&saga, forward));
            }
        }

        transition.apply_to(&mut saga);

        // Build follow-up commands up front so a build failure cannot
        // strand a half-applied transition.
        let mut dispatches: Vec<(SagaCommand, Option<Duration>)> = Vec::new();
        for effect in &transition.effects {
            match effect {
                Effect::Dispatch(step) => {
                    dispatches.push((build_command(&saga, *step)?, None));
                }
                Effect::Retry(step) => {
                    let policy = if step.is_compensating() {
                        &self.config.compensation_retry
                    } else {
                        &self.config.forward_retry
                    };
                    let delay = policy.backoff_for(saga.attempts);
                    dispatches.push((build_command(&saga, *step)?, Some(delay)));
                }
                Effect::Proceed | Effect::Publish(_) => {}
            }
        }

        let mut saga = self.store.update_transactionally(&saga, &mutations).await?;

        if let Some(step) = resolved_step {
            self.timeouts.cancel(saga.id, step);
        }

        // Side effects only after the transition is durably committed.
        for effect in &transition.effects {
            if let Effect::Publish(kind) = effect {
                self.publish_lifecycle(&saga, *kind).await;
            }
        }
        for (command, delay) in dispatches {
            match delay {
                None => {
                    self.recorder.record_attempt(&saga, &command).await;
                    self.send_command(&saga, &command).await?;
                }
                Some(delay) => self.schedule_retry(saga.clone(), command, delay),
            }
        }
        if transition.effects.contains(&Effect::Proceed) {
            self.dispatch_next(&mut saga).await?;
        }

        if saga.is_terminal() {
            self.locks.lock().unwrap().remove(&saga.id);
            self.note_terminal(&saga);
        }

        Ok(())
    }

    /// Moves a ready saga to its next awaiting state and dispatches the
    /// step's command.
    async fn dispatch_next(&self, saga: &mut Saga) -> Result<()> {
        let Some((next_state, step)) = machine::next_step(saga.state) else {
            return Ok(());
        };
        saga.transition_to(next_state);
        saga.begin_step(step);
        *saga = self.store.update_transactionally(saga, &[]).await?;

        let command = build_command(saga, step)?;
        self.recorder.record_attempt(saga, &command).await;
        self.send_command(saga, &command).await
    }

    async fn send_command(&self, saga: &Saga, command: &SagaCommand) -> Result<()> {
        let key = command_routing_key(command.step);
        let message = Message::builder()
            .correlation_id(saga.correlation_id)
            .routing_key(key)
            .payload(command)?
            .build();
        self.channel
            .publish(routing::SAGA_EXCHANGE, key, message)
            .await?;
        self.timeouts.schedule(saga.id, command.step);

        metrics::counter!("saga_commands_dispatched_total").increment(1);
        tracing::info!(
            saga_id = %saga.id,
            step = %command.step,
            attempt = saga.attempts,
            "command dispatched"
        );
        Ok(())
    }

    fn schedule_retry(&self, saga: Saga, command: SagaCommand, delay: Duration) {
        tracing::info!(
            saga_id = %saga.id,
            step = %command.step,
            attempt = saga.attempts,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.recorder.record_attempt(&saga, &command).await;
            if let Err(error) = engine.send_command(&saga, &command).await {
                tracing::error!(
                    saga_id = %saga.id,
                    step = %command.step,
                    %error,
                    "retry dispatch failed"
                );
            }
        });
    }

    async fn publish_lifecycle(&self, saga: &Saga, kind: Lifecycle) {
        let event = LifecycleEvent::from_saga(saga);
        let message = match Message::builder()
            .correlation_id(saga.correlation_id)
            .routing_key(kind.routing_key())
            .payload(&event)
        {
            Ok(builder) => builder.build(),
            Err(error) => {
                tracing::warn!(%error, "failed to serialize lifecycle event");
                return;
            }
        };
        // Commit-then-emit: the transition is already durable, so a failed
        // notification is reported, not propagated.
        if let Err(error) = self
            .channel
            .publish(routing::SAGA_EXCHANGE, kind.routing_key(), message)
            .await
        {
            tracing::warn!(saga_id = %saga.id, %error, "lifecycle publish failed");
        }
    }

    fn note_terminal(&self, saga: &Saga) {
        if let Some(duration_ms) = saga.duration_ms() {
            metrics::histogram!("saga_duration_seconds").record(duration_ms as f64 / 1000.0);
        }
        match saga.state {
            SagaState::SaleConfirmed => metrics::counter!("saga_completed").increment(1),
            SagaState::Compensated => metrics::counter!("saga_compensated").increment(1),
            _ => metrics::counter!("saga_failed").increment(1),
        }
        tracing::info!(
            saga_id = %saga.id,
            state = %saga.state,
            error = saga.error_message.as_deref().unwrap_or_default(),
            "saga finished"
        );
    }

    fn saga_lock(&self, saga_id: SagaId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(saga_id).or_default())
    }
}
