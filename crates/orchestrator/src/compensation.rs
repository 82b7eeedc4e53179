//! Compensation sequencing.
//!
//! Compensating commands walk the completed forward steps in strict reverse
//! order: a captured payment is refunded before the stock reservation is
//! released. The ordered plan is derived from the saga's own record of what
//! was reserved and charged — the frozen snapshot once compensation began,
//! the live context before that. Step logs are audit-only and never
//! consulted here.

use saga_store::{Saga, SagaState, StepName};

/// Compensating steps still owed by a saga, most recent forward effect
/// first. Steps whose compensation already succeeded are excluded.
pub fn remaining_steps(saga: &Saga) -> Vec<StepName> {
    let (has_reservation, has_payment) = match &saga.compensation_data {
        Some(data) => (
            data.reservation_id.is_some(),
            data.transaction_id.is_some(),
        ),
        None => (
            saga.context.reservation_id().is_some(),
            saga.context.transaction_id().is_some(),
        ),
    };
    let refunded = saga.context.result_for(StepName::RefundPayment).is_some();
    let released = saga.context.result_for(StepName::ReleaseStock).is_some();

    let mut steps = Vec::new();
    if has_payment && !refunded {
        steps.push(StepName::RefundPayment);
    }
    if has_reservation && !released {
        steps.push(StepName::ReleaseStock);
    }
    steps
}

/// The next compensating step to dispatch, skipping the one whose success
/// is currently being applied.
pub fn next_compensation(saga: &Saga, just_finished: Option<StepName>) -> Option<StepName> {
    remaining_steps(saga)
        .into_iter()
        .find(|step| Some(*step) != just_finished)
}

/// The saga state that awaits a compensating step's reply.
pub fn compensating_state(step: StepName) -> SagaState {
    match step {
        StepName::RefundPayment => SagaState::CompensatingPayment,
        StepName::ReleaseStock => SagaState::CompensatingStock,
        _ => unreachable!("{step} is not a compensating step"),
    }
}
