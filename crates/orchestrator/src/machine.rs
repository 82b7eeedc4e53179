//! The saga state machine.
//!
//! [`transition`] is a pure, total function: given the current saga, an
//! event, and the retry limits, it returns either the single transition to
//! apply or a discard verdict. It performs no I/O and never mutates its
//! inputs; the engine applies the result and performs the prescribed
//! effects after the state is durably committed.
//!
//! Events that match no transition from the current state — stale replies
//! after a timeout fired, duplicates of an already-applied reply, replies
//! for a finished saga — are discarded, never re-driving the machine. This
//! is what makes redelivery and reordering on the channel safe.

use std::time::Duration;

use messaging::routing;
use saga_store::{Saga, SagaState, StepName, StepResult};

use crate::compensation;
use crate::messages::ReplyOutcome;
use crate::retry::RetryConfig;

/// An event driving the state machine.
#[derive(Debug, Clone)]
pub enum SagaEvent {
    /// A downstream service replied for a step.
    Reply { step: StepName, outcome: ReplyOutcome },
    /// No reply arrived for a step within its deadline.
    TimedOut { step: StepName, after: Duration },
}

/// Saga lifecycle notifications published on the saga exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Started,
    Compensating,
    SaleConfirmed,
    Compensated,
    Failed,
}

impl Lifecycle {
    /// Routing key the notification is published under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            Lifecycle::Started => routing::EVT_SAGA_STARTED,
            Lifecycle::Compensating => routing::EVT_SAGA_COMPENSATING,
            Lifecycle::SaleConfirmed => routing::EVT_SALE_CONFIRMED,
            Lifecycle::Compensated => routing::EVT_SAGA_COMPENSATED,
            Lifecycle::Failed => routing::EVT_SAGA_FAILED,
        }
    }
}

/// A side effect the engine must perform after committing a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Dispatch the next forward step.
    Proceed,
    /// Dispatch the given (compensating) step immediately.
    Dispatch(StepName),
    /// Re-dispatch the given step after its backoff delay.
    Retry(StepName),
    /// Publish a lifecycle notification.
    Publish(Lifecycle),
}

/// Attempt ceilings the machine consults when classifying failures.
#[derive(Debug, Clone)]
pub struct RetryLimits {
    /// Maximum dispatch attempts for a forward step.
    pub forward_attempts: u32,
    /// Maximum dispatch attempts for a compensating step.
    pub compensation_attempts: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            forward_attempts: RetryConfig::forward().max_attempts,
            compensation_attempts: RetryConfig::compensation().max_attempts,
        }
    }
}

/// The single transition an event produces.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next_state: SagaState,
    /// Step result to append to the context.
    pub record: Option<StepResult>,
    /// Failure reason to store on the saga.
    pub error: Option<String>,
    /// Effects to perform after the transition is committed.
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next_state: SagaState) -> Self {
        Self {
            next_state,
            record: None,
            error: None,
            effects: Vec::new(),
        }
    }

    fn record(mut self, result: StepResult) -> Self {
        self.record = Some(result);
        self
    }

    fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Applies the transition to a saga, maintaining the aggregate
    /// invariants (context append, compensation freeze, `completed_at`,
    /// current-step bookkeeping).
    pub fn apply_to(&self, saga: &mut Saga) {
        if let Some(result) = &self.record {
            saga.record_result(result.clone());
        }
        if let Some(error) = &self.error {
            saga.error_message = Some(error.clone());
        }

        let retrying = self.effects.iter().any(|e| matches!(e, Effect::Retry(_)));
        if retrying {
            // Same step, one more attempt; current_step stays put.
            saga.attempts += 1;
            saga.transition_to(self.next_state);
            return;
        }

        saga.transition_to(self.next_state);
        match self.next_state.awaiting_step() {
            Some(step) if saga.current_step != Some(step) => saga.begin_step(step),
            Some(_) => {}
            None => saga.current_step = None,
        }
    }
}

/// What the machine decided for an event.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// Apply this transition.
    Applied(Transition),
    /// The event matches no transition from the current state; leave the
    /// saga untouched.
    Discarded { reason: String },
}

/// The forward path: maps each ready state to the awaiting state it moves
/// to and the step to dispatch.
pub fn next_step(state: SagaState) -> Option<(SagaState, StepName)> {
    match state {
        SagaState::Initiated => Some((SagaState::StockVerifying, StepName::VerifyStock)),
        SagaState::StockVerified => Some((SagaState::StockReserving, StepName::ReserveStock)),
        SagaState::StockReserved => Some((SagaState::PaymentProcessing, StepName::ProcessPayment)),
        SagaState::PaymentProcessed => Some((SagaState::OrderConfirming, StepName::ConfirmOrder)),
        _ => None,
    }
}

/// The pure transition function.
pub fn transition(saga: &Saga, event: &SagaEvent, limits: &RetryLimits) -> TransitionOutcome {
    if saga.state.is_terminal() {
        return TransitionOutcome::Discarded {
            reason: format!("saga is terminal in state {}", saga.state),
        };
    }

    let Some(awaiting) = saga.state.awaiting_step() else {
        return TransitionOutcome::Discarded {
            reason: format!("no step awaiting a reply in state {}", saga.state),
        };
    };

    let event_step = match event {
        SagaEvent::Reply { step, .. } => *step,
        SagaEvent::TimedOut { step, .. } => *step,
    };
    if event_step != awaiting {
        return TransitionOutcome::Discarded {
            reason: format!("event for step {event_step} while awaiting {awaiting}"),
        };
    }

    if let SagaEvent::Reply {
        outcome: ReplyOutcome::Succeeded { result },
        ..
    } = event
    {
        if result.step() != awaiting {
            return TransitionOutcome::Discarded {
                reason: format!(
                    "result payload for step {} does not match awaited step {awaiting}",
                    result.step()
                ),
            };
        }
        return TransitionOutcome::Applied(on_success(saga, awaiting, result.clone()));
    }

    // Failure: an explicit rejection or a timeout.
    let (error_text, retryable) = match event {
        SagaEvent::Reply {
            outcome: ReplyOutcome::Rejected { reason, retryable },
            ..
        } => (
            format!("step {awaiting} failed: {reason}"),
            *retryable,
        ),
        SagaEvent::TimedOut { after, .. } => (
            format!("step {awaiting} timed out after {}ms", after.as_millis()),
            false,
        ),
        SagaEvent::Reply {
            outcome: ReplyOutcome::Succeeded { .. },
            ..
        } => unreachable!("success handled above"),
    };

    TransitionOutcome::Applied(on_failure(saga, awaiting, error_text, retryable, limits))
}

fn on_success(saga: &Saga, step: StepName, result: StepResult) -> Transition {
    match step {
        StepName::VerifyStock => Transition::to(SagaState::StockVerified)
            .record(result)
            .effect(Effect::Proceed),
        StepName::ReserveStock => Transition::to(SagaState::StockReserved)
            .record(result)
            .effect(Effect::Proceed),
        StepName::ProcessPayment => Transition::to(SagaState::PaymentProcessed)
            .record(result)
            .effect(Effect::Proceed),
        StepName::ConfirmOrder => Transition::to(SagaState::SaleConfirmed)
            .record(result)
            .effect(Effect::Publish(Lifecycle::SaleConfirmed)),
        StepName::RefundPayment | StepName::ReleaseStock => {
            match compensation::next_compensation(saga, Some(step)) {
                Some(next) => Transition::to(compensation::compensating_state(next))
                    .record(result)
                    .effect(Effect::Dispatch(next)),
                None => Transition::to(SagaState::Compensated)
                    .record(result)
                    .effect(Effect::Publish(Lifecycle::Compensated)),
            }
        }
    }
}

fn on_failure(
    saga: &Saga,
    step: StepName,
    error_text: String,
    retryable: bool,
    limits: &RetryLimits,
) -> Transition {
    if step.is_compensating() {
        // Compensation is never skipped: every failure kind retries until
        // the ceiling, then the saga surfaces to an operator.
        if saga.attempts < limits.compensation_attempts {
            return Transition::to(saga.state)
                .error(&error_text)
                .effect(Effect::Retry(step));
        }
        return Transition::to(SagaState::Failed)
            .error(format!(
                "unresolved compensation: step {step} failed after {} attempts: {error_text}",
                saga.attempts
            ))
            .effect(Effect::Publish(Lifecycle::Failed));
    }

    if retryable && saga.attempts < limits.forward_attempts {
        return Transition::to(saga.state)
            .error(&error_text)
            .effect(Effect::Retry(step));
    }

    match step {
        StepName::VerifyStock => Transition::to(SagaState::StockVerificationFailed)
            .error(error_text)
            .effect(Effect::Publish(Lifecycle::Failed)),
        // Partial reservations are rolled back by the reservation step
        // itself; the saga has nothing to compensate here.
        StepName::ReserveStock => Transition::to(SagaState::StockReservationFailed)
            .error(error_text)
            .effect(Effect::Publish(Lifecycle::Failed)),
        StepName::ProcessPayment => match compensation::next_compensation(saga, None) {
            Some(next) => Transition::to(compensation::compensating_state(next))
                .error(error_text)
                .effect(Effect::Publish(Lifecycle::Compensating))
                .effect(Effect::Dispatch(next)),
            None => Transition::to(SagaState::PaymentFailed)
                .error(error_text)
                .effect(Effect::Publish(Lifecycle::Failed)),
        },
        StepName::ConfirmOrder => match compensation::next_compensation(saga, None) {
            Some(next) => Transition::to(compensation::compensating_state(next))
                .error(error_text)
                .effect(Effect::Publish(Lifecycle::Compensating))
                .effect(Effect::Dispatch(next)),
            None => Transition::to(SagaState::OrderConfirmationFailed)
                .error(error_text)
                .effect(Effect::Publish(Lifecycle::Failed)),
        },
        StepName::ReleaseStock | StepName::RefundPayment => {
            unreachable!("compensating steps handled above")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, CustomerId, Money, SaleItem, SaleRequest};

    fn saga_in(state: SagaState) -> Saga {
        let mut saga = Saga::new(SaleRequest::new(
            CorrelationId::new(),
            CustomerId::new(),
            vec![SaleItem::new("SKU-001", "Widget", 2, Money::from_cents(1000))],
        ));
        // Accumulate the context a saga would have on the way to `state`.
        let progress: &[StepResult] = match state {
            SagaState::Initiated | SagaState::StockVerifying => &[],
            SagaState::StockVerified | SagaState::StockReserving => {
                &[StepResult::StockVerified { items_checked: 1 }]
            }
            SagaState::StockReserved | SagaState::PaymentProcessing => &[
                StepResult::StockVerified { items_checked: 1 },
                StepResult::StockReserved {
                    reservation_id: "RES-0001".to_string(),
                },
            ],
            _ => &[
                StepResult::StockVerified { items_checked: 1 },
                StepResult::StockReserved {
                    reservation_id: "RES-0001".to_string(),
                },
                StepResult::PaymentProcessed {
                    transaction_id: "TXN-0001".to_string(),
                    amount: Money::from_cents(2000),
                },
            ],
        };
        for result in progress {
            saga.record_result(result.clone());
        }
        saga.transition_to(state);
        if let Some(step) = state.awaiting_step() {
            saga.begin_step(step);
        }
        saga
    }

    fn success(step: StepName) -> SagaEvent {
        let result = match step {
            StepName::VerifyStock => StepResult::StockVerified { items_checked: 1 },
            StepName::ReserveStock => StepResult::StockReserved {
                reservation_id: "RES-0001".to_string(),
            },
            StepName::ProcessPayment => StepResult::PaymentProcessed {
                transaction_id: "TXN-0001".to_string(),
                amount: Money::from_cents(2000),
            },
            StepName::ConfirmOrder => StepResult::OrderConfirmed {
                order_number: "ORD-0001".to_string(),
            },
            StepName::ReleaseStock => StepResult::StockReleased {
                reservation_id: "RES-0001".to_string(),
            },
            StepName::RefundPayment => StepResult::PaymentRefunded {
                transaction_id: "TXN-0001".to_string(),
            },
        };
        SagaEvent::Reply {
            step,
            outcome: ReplyOutcome::Succeeded { result },
        }
    }

    fn rejection(step: StepName, retryable: bool) -> SagaEvent {
        SagaEvent::Reply {
            step,
            outcome: ReplyOutcome::Rejected {
                reason: "downstream said no".to_string(),
                retryable,
            },
        }
    }

    fn applied(outcome: TransitionOutcome) -> Transition {
        match outcome {
            TransitionOutcome::Applied(t) => t,
            TransitionOutcome::Discarded { reason } => panic!("unexpected discard: {reason}"),
        }
    }

    fn discarded(outcome: TransitionOutcome) -> String {
        match outcome {
            TransitionOutcome::Discarded { reason } => reason,
            TransitionOutcome::Applied(t) => panic!("unexpected transition to {}", t.next_state),
        }
    }

    #[test]
    fn forward_path_advances_on_success_replies() {
        let limits = RetryLimits::default();
        let cases = [
            (SagaState::StockVerifying, StepName::VerifyStock, SagaState::StockVerified),
            (SagaState::StockReserving, StepName::ReserveStock, SagaState::StockReserved),
            (SagaState::PaymentProcessing, StepName::ProcessPayment, SagaState::PaymentProcessed),
        ];
        for (state, step, expected) in cases {
            let saga = saga_in(state);
            let t = applied(transition(&saga, &success(step), &limits));
            assert_eq!(t.next_state, expected);
            assert!(t.record.is_some());
            assert_eq!(t.effects, vec![Effect::Proceed]);
        }
    }

    #[test]
    fn confirmation_success_is_terminal() {
        let saga = saga_in(SagaState::OrderConfirming);
        let t = applied(transition(
            &saga,
            &success(StepName::ConfirmOrder),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::SaleConfirmed);
        assert_eq!(t.effects, vec![Effect::Publish(Lifecycle::SaleConfirmed)]);
    }

    #[test]
    fn next_step_walks_the_forward_path() {
        assert_eq!(
            next_step(SagaState::Initiated),
            Some((SagaState::StockVerifying, StepName::VerifyStock))
        );
        assert_eq!(
            next_step(SagaState::PaymentProcessed),
            Some((SagaState::OrderConfirming, StepName::ConfirmOrder))
        );
        assert_eq!(next_step(SagaState::StockVerifying), None);
        assert_eq!(next_step(SagaState::SaleConfirmed), None);
    }

    #[test]
    fn verification_failure_is_terminal_without_compensation() {
        let saga = saga_in(SagaState::StockVerifying);
        let t = applied(transition(
            &saga,
            &rejection(StepName::VerifyStock, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::StockVerificationFailed);
        assert!(t.error.as_deref().unwrap().contains("downstream said no"));
        assert_eq!(t.effects, vec![Effect::Publish(Lifecycle::Failed)]);
    }

    #[test]
    fn reservation_failure_is_terminal_without_compensation() {
        let saga = saga_in(SagaState::StockReserving);
        let t = applied(transition(
            &saga,
            &rejection(StepName::ReserveStock, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::StockReservationFailed);
        assert!(!t.effects.iter().any(|e| matches!(e, Effect::Dispatch(_))));
    }

    #[test]
    fn payment_failure_releases_reserved_stock() {
        let saga = saga_in(SagaState::PaymentProcessing);
        let t = applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::CompensatingStock);
        assert_eq!(
            t.effects,
            vec![
                Effect::Publish(Lifecycle::Compensating),
                Effect::Dispatch(StepName::ReleaseStock)
            ]
        );
    }

    #[test]
    fn payment_failure_without_reservation_is_terminal() {
        let mut saga = saga_in(SagaState::PaymentProcessing);
        saga.context.results.clear();
        let t = applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::PaymentFailed);
    }

    #[test]
    fn confirmation_failure_refunds_before_releasing() {
        let saga = saga_in(SagaState::OrderConfirming);
        let t = applied(transition(
            &saga,
            &rejection(StepName::ConfirmOrder, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::CompensatingPayment);
        assert_eq!(
            t.effects,
            vec![
                Effect::Publish(Lifecycle::Compensating),
                Effect::Dispatch(StepName::RefundPayment)
            ]
        );
    }

    #[test]
    fn confirmation_failure_without_payment_falls_back_to_stock() {
        let mut saga = saga_in(SagaState::OrderConfirming);
        saga.context
            .results
            .retain(|r| r.step() != StepName::ProcessPayment);
        let t = applied(transition(
            &saga,
            &rejection(StepName::ConfirmOrder, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::CompensatingStock);
        assert!(t.effects.contains(&Effect::Dispatch(StepName::ReleaseStock)));
    }

    #[test]
    fn confirmation_failure_with_nothing_to_undo_is_terminal() {
        let mut saga = saga_in(SagaState::OrderConfirming);
        saga.context.results.clear();
        let t = applied(transition(
            &saga,
            &rejection(StepName::ConfirmOrder, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::OrderConfirmationFailed);
    }

    #[test]
    fn refund_success_proceeds_to_stock_release() {
        let mut saga = saga_in(SagaState::OrderConfirming);
        let failure = applied(transition(
            &saga,
            &rejection(StepName::ConfirmOrder, false),
            &RetryLimits::default(),
        ));
        failure.apply_to(&mut saga);
        assert_eq!(saga.state, SagaState::CompensatingPayment);
        assert_eq!(saga.current_step, Some(StepName::RefundPayment));

        let t = applied(transition(
            &saga,
            &success(StepName::RefundPayment),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::CompensatingStock);
        assert_eq!(t.effects, vec![Effect::Dispatch(StepName::ReleaseStock)]);
    }

    #[test]
    fn release_success_completes_compensation() {
        let mut saga = saga_in(SagaState::PaymentProcessing);
        let failure = applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, false),
            &RetryLimits::default(),
        ));
        failure.apply_to(&mut saga);
        assert_eq!(saga.state, SagaState::CompensatingStock);

        let t = applied(transition(
            &saga,
            &success(StepName::ReleaseStock),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::Compensated);
        assert_eq!(t.effects, vec![Effect::Publish(Lifecycle::Compensated)]);
    }

    #[test]
    fn transient_forward_failure_retries_until_limit() {
        let limits = RetryLimits {
            forward_attempts: 3,
            compensation_attempts: 5,
        };
        let mut saga = saga_in(SagaState::PaymentProcessing);

        for attempt in 1..3 {
            saga.attempts = attempt;
            let t = applied(transition(
                &saga,
                &rejection(StepName::ProcessPayment, true),
                &limits,
            ));
            assert_eq!(t.next_state, SagaState::PaymentProcessing);
            assert_eq!(t.effects, vec![Effect::Retry(StepName::ProcessPayment)]);
        }

        saga.attempts = 3;
        let t = applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, true),
            &limits,
        ));
        assert_eq!(t.next_state, SagaState::CompensatingStock);
    }

    #[test]
    fn business_rejection_never_retries() {
        let mut saga = saga_in(SagaState::StockVerifying);
        saga.attempts = 1;
        let t = applied(transition(
            &saga,
            &rejection(StepName::VerifyStock, false),
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::StockVerificationFailed);
    }

    #[test]
    fn timeout_is_tagged_distinctly_and_escalates() {
        let saga = saga_in(SagaState::StockVerifying);
        let t = applied(transition(
            &saga,
            &SagaEvent::TimedOut {
                step: StepName::VerifyStock,
                after: Duration::from_millis(30_000),
            },
            &RetryLimits::default(),
        ));
        assert_eq!(t.next_state, SagaState::StockVerificationFailed);
        assert_eq!(
            t.error.as_deref(),
            Some("step verify_stock timed out after 30000ms")
        );
    }

    #[test]
    fn compensation_failure_retries_every_kind_then_escalates() {
        let limits = RetryLimits {
            forward_attempts: 3,
            compensation_attempts: 5,
        };
        let mut saga = saga_in(SagaState::PaymentProcessing);
        applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, false),
            &limits,
        ))
        .apply_to(&mut saga);
        assert_eq!(saga.state, SagaState::CompensatingStock);
        assert_eq!(saga.attempts, 1);

        // A non-retryable rejection still retries a compensating step.
        let t = applied(transition(
            &saga,
            &rejection(StepName::ReleaseStock, false),
            &limits,
        ));
        assert_eq!(t.effects, vec![Effect::Retry(StepName::ReleaseStock)]);

        // So does a timeout.
        saga.attempts = 4;
        let t = applied(transition(
            &saga,
            &SagaEvent::TimedOut {
                step: StepName::ReleaseStock,
                after: Duration::from_millis(100),
            },
            &limits,
        ));
        assert_eq!(t.effects, vec![Effect::Retry(StepName::ReleaseStock)]);

        // The ceiling escalates to FAILED with the unresolved marker.
        saga.attempts = 5;
        let t = applied(transition(
            &saga,
            &rejection(StepName::ReleaseStock, false),
            &limits,
        ));
        assert_eq!(t.next_state, SagaState::Failed);
        assert!(
            t.error
                .as_deref()
                .unwrap()
                .starts_with("unresolved compensation: step release_stock")
        );
    }

    #[test]
    fn events_on_terminal_sagas_are_discarded() {
        for state in SagaState::ALL.iter().filter(|s| s.is_terminal()) {
            let saga = saga_in(*state);
            let reason = discarded(transition(
                &saga,
                &success(StepName::VerifyStock),
                &RetryLimits::default(),
            ));
            assert!(reason.contains("terminal"), "state {state}: {reason}");
        }
    }

    #[test]
    fn events_on_ready_states_are_discarded() {
        for state in [
            SagaState::Initiated,
            SagaState::StockVerified,
            SagaState::StockReserved,
            SagaState::PaymentProcessed,
        ] {
            let saga = saga_in(state);
            let reason = discarded(transition(
                &saga,
                &success(StepName::VerifyStock),
                &RetryLimits::default(),
            ));
            assert!(reason.contains("no step awaiting"), "state {state}");
        }
    }

    #[test]
    fn reply_for_wrong_step_is_discarded() {
        let saga = saga_in(SagaState::PaymentProcessing);
        let reason = discarded(transition(
            &saga,
            &success(StepName::VerifyStock),
            &RetryLimits::default(),
        ));
        assert!(reason.contains("while awaiting process_payment"));
    }

    #[test]
    fn mismatched_result_payload_is_discarded() {
        let saga = saga_in(SagaState::PaymentProcessing);
        let event = SagaEvent::Reply {
            step: StepName::ProcessPayment,
            outcome: ReplyOutcome::Succeeded {
                result: StepResult::StockVerified { items_checked: 1 },
            },
        };
        let reason = discarded(transition(&saga, &event, &RetryLimits::default()));
        assert!(reason.contains("does not match"));
    }

    #[test]
    fn no_event_mutates_a_discarding_saga() {
        // Every (state, irrelevant event) pair must leave the saga intact.
        let limits = RetryLimits::default();
        for state in SagaState::ALL {
            let saga = saga_in(state);
            let before = serde_json::to_value(&saga).unwrap();
            for step in StepName::ALL {
                if Some(step) == state.awaiting_step() {
                    continue;
                }
                let outcome = transition(&saga, &success(step), &limits);
                assert!(
                    matches!(outcome, TransitionOutcome::Discarded { .. }),
                    "state {state}, step {step}"
                );
            }
            assert_eq!(serde_json::to_value(&saga).unwrap(), before);
        }
    }

    #[test]
    fn duplicate_success_reply_is_discarded() {
        let mut saga = saga_in(SagaState::StockVerifying);
        let event = success(StepName::VerifyStock);
        let limits = RetryLimits::default();

        applied(transition(&saga, &event, &limits)).apply_to(&mut saga);
        let state_after_first = saga.state;
        let results_after_first = saga.context.results.len();

        // The same reply again matches nothing: the saga moved on.
        let second = transition(&saga, &event, &limits);
        assert!(matches!(second, TransitionOutcome::Discarded { .. }));
        assert_eq!(saga.state, state_after_first);
        assert_eq!(saga.context.results.len(), results_after_first);
    }

    #[test]
    fn late_reply_after_timeout_transition_is_discarded() {
        let mut saga = saga_in(SagaState::StockVerifying);
        let limits = RetryLimits::default();
        applied(transition(
            &saga,
            &SagaEvent::TimedOut {
                step: StepName::VerifyStock,
                after: Duration::from_millis(100),
            },
            &limits,
        ))
        .apply_to(&mut saga);
        assert_eq!(saga.state, SagaState::StockVerificationFailed);

        let late = transition(&saga, &success(StepName::VerifyStock), &limits);
        assert!(matches!(late, TransitionOutcome::Discarded { .. }));
    }

    #[test]
    fn apply_to_maintains_step_bookkeeping() {
        let mut saga = saga_in(SagaState::PaymentProcessing);
        assert_eq!(saga.attempts, 1);

        // Retry bumps attempts, keeps the step.
        applied(transition(
            &saga,
            &rejection(StepName::ProcessPayment, true),
            &RetryLimits::default(),
        ))
        .apply_to(&mut saga);
        assert_eq!(saga.attempts, 2);
        assert_eq!(saga.current_step, Some(StepName::ProcessPayment));

        // Success clears the step on the ready state.
        applied(transition(
            &saga,
            &success(StepName::ProcessPayment),
            &RetryLimits::default(),
        ))
        .apply_to(&mut saga);
        assert_eq!(saga.state, SagaState::PaymentProcessed);
        assert!(saga.current_step.is_none());
    }
}
