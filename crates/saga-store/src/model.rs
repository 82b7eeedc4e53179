//! The persisted saga data model.

use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId, SaleRequest};
use serde::{Deserialize, Serialize};

use crate::context::{CompensationData, SagaContext, StepResult};

/// The state of a sale saga in its lifecycle.
///
/// Forward path:
/// ```text
/// INITIATED ──► STOCK_VERIFYING ──► STOCK_VERIFIED ──► STOCK_RESERVING
///   ──► STOCK_RESERVED ──► PAYMENT_PROCESSING ──► PAYMENT_PROCESSED
///   ──► ORDER_CONFIRMING ──► SALE_CONFIRMED
/// ```
///
/// A failed payment or order confirmation enters the `COMPENSATING_*`
/// states, walking completed steps backwards until `COMPENSATED`; an
/// unrecoverable compensation ends in `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    /// Saga created, first command not yet dispatched.
    #[default]
    Initiated,

    /// Awaiting the stock verification reply.
    StockVerifying,
    /// Stock verified, ready to dispatch the reservation.
    StockVerified,

    /// Awaiting the stock reservation reply.
    StockReserving,
    /// Stock reserved, ready to dispatch the payment.
    StockReserved,

    /// Awaiting the payment reply.
    PaymentProcessing,
    /// Payment processed, ready to dispatch the order confirmation.
    PaymentProcessed,

    /// Awaiting the order confirmation reply.
    OrderConfirming,
    /// Every step succeeded (terminal).
    SaleConfirmed,

    /// Awaiting the stock release reply.
    CompensatingStock,
    /// Awaiting the payment refund reply.
    CompensatingPayment,
    /// Rollback finished, prior effects undone (terminal).
    Compensated,

    /// Stock verification failed, nothing to undo (terminal).
    StockVerificationFailed,
    /// Stock reservation failed, nothing to undo (terminal).
    StockReservationFailed,
    /// Payment failed with no recorded reservation to release (terminal).
    PaymentFailed,
    /// Order confirmation failed with nothing to undo (terminal).
    OrderConfirmationFailed,
    /// Compensation exhausted its retries; operator action required (terminal).
    Failed,
}

impl SagaState {
    /// Every state, useful for exhaustive property checks.
    pub const ALL: [SagaState; 17] = [
        SagaState::Initiated,
        SagaState::StockVerifying,
        SagaState::StockVerified,
        SagaState::StockReserving,
        SagaState::StockReserved,
        SagaState::PaymentProcessing,
        SagaState::PaymentProcessed,
        SagaState::OrderConfirming,
        SagaState::SaleConfirmed,
        SagaState::CompensatingStock,
        SagaState::CompensatingPayment,
        SagaState::Compensated,
        SagaState::StockVerificationFailed,
        SagaState::StockReservationFailed,
        SagaState::PaymentFailed,
        SagaState::OrderConfirmationFailed,
        SagaState::Failed,
    ];

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::SaleConfirmed
                | SagaState::Compensated
                | SagaState::StockVerificationFailed
                | SagaState::StockReservationFailed
                | SagaState::PaymentFailed
                | SagaState::OrderConfirmationFailed
                | SagaState::Failed
        )
    }

    /// Returns true for the terminal-success state.
    pub fn is_success(&self) -> bool {
        matches!(self, SagaState::SaleConfirmed)
    }

    /// Returns true for terminal states that represent a failed sale.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success() && *self != SagaState::Compensated
    }

    /// Returns true while compensating commands are in flight.
    pub fn is_compensating(&self) -> bool {
        matches!(
            self,
            SagaState::CompensatingStock | SagaState::CompensatingPayment
        )
    }

    /// Returns the step this state is awaiting a reply for, if any.
    pub fn awaiting_step(&self) -> Option<StepName> {
        match self {
            SagaState::StockVerifying => Some(StepName::VerifyStock),
            SagaState::StockReserving => Some(StepName::ReserveStock),
            SagaState::PaymentProcessing => Some(StepName::ProcessPayment),
            SagaState::OrderConfirming => Some(StepName::ConfirmOrder),
            SagaState::CompensatingStock => Some(StepName::ReleaseStock),
            SagaState::CompensatingPayment => Some(StepName::RefundPayment),
            _ => None,
        }
    }

    /// Returns the state name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Initiated => "INITIATED",
            SagaState::StockVerifying => "STOCK_VERIFYING",
            SagaState::StockVerified => "STOCK_VERIFIED",
            SagaState::StockReserving => "STOCK_RESERVING",
            SagaState::StockReserved => "STOCK_RESERVED",
            SagaState::PaymentProcessing => "PAYMENT_PROCESSING",
            SagaState::PaymentProcessed => "PAYMENT_PROCESSED",
            SagaState::OrderConfirming => "ORDER_CONFIRMING",
            SagaState::SaleConfirmed => "SALE_CONFIRMED",
            SagaState::CompensatingStock => "COMPENSATING_STOCK",
            SagaState::CompensatingPayment => "COMPENSATING_PAYMENT",
            SagaState::Compensated => "COMPENSATED",
            SagaState::StockVerificationFailed => "STOCK_VERIFICATION_FAILED",
            SagaState::StockReservationFailed => "STOCK_RESERVATION_FAILED",
            SagaState::PaymentFailed => "PAYMENT_FAILED",
            SagaState::OrderConfirmationFailed => "ORDER_CONFIRMATION_FAILED",
            SagaState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SagaState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaState::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown saga state: {s}"))
    }
}

/// The steps a sale saga can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    VerifyStock,
    ReserveStock,
    ProcessPayment,
    ConfirmOrder,
    ReleaseStock,
    RefundPayment,
}

impl StepName {
    /// Every step name.
    pub const ALL: [StepName; 6] = [
        StepName::VerifyStock,
        StepName::ReserveStock,
        StepName::ProcessPayment,
        StepName::ConfirmOrder,
        StepName::ReleaseStock,
        StepName::RefundPayment,
    ];

    /// Returns true for compensating steps.
    pub fn is_compensating(&self) -> bool {
        matches!(self, StepName::ReleaseStock | StepName::RefundPayment)
    }

    /// Returns the forward step a compensating step undoes.
    pub fn compensates(&self) -> Option<StepName> {
        match self {
            StepName::ReleaseStock => Some(StepName::ReserveStock),
            StepName::RefundPayment => Some(StepName::ProcessPayment),
            _ => None,
        }
    }

    /// Returns the step name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::VerifyStock => "verify_stock",
            StepName::ReserveStock => "reserve_stock",
            StepName::ProcessPayment => "process_payment",
            StepName::ConfirmOrder => "confirm_order",
            StepName::ReleaseStock => "release_stock",
            StepName::RefundPayment => "refund_payment",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::ALL
            .iter()
            .find(|step| step.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown step name: {s}"))
    }
}

/// One in-flight business transaction: the saga aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    /// Process-assigned surrogate identifier.
    pub id: SagaId,
    /// Externally-visible correlation identifier; unique.
    pub correlation_id: CorrelationId,
    /// Current lifecycle state.
    pub state: SagaState,
    /// The step awaiting a reply, if a command is outstanding.
    pub current_step: Option<StepName>,
    /// Dispatch attempts made for the current step.
    pub attempts: u32,
    /// Optimistic concurrency token, incremented on every update.
    pub revision: i64,
    /// Append-only record of the request and every step's result.
    pub context: SagaContext,
    /// Snapshot of undoable effects, frozen when compensation begins.
    pub compensation_data: Option<CompensationData>,
    /// Last failure reason, set only on failure transitions.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, on entering a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Saga {
    /// Creates a new saga for the given sale request, in `Initiated` state.
    pub fn new(request: SaleRequest) -> Self {
        let now = Utc::now();
        Self {
            id: SagaId::new(),
            correlation_id: request.correlation_id,
            state: SagaState::Initiated,
            current_step: None,
            attempts: 0,
            revision: 0,
            context: SagaContext::new(request),
            compensation_data: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Moves the saga to a new state, maintaining the lifecycle invariants:
    /// compensation data is frozen on entering the first `Compensating*`
    /// state, and `completed_at` is set exactly once on entering a terminal
    /// state.
    pub fn transition_to(&mut self, state: SagaState) {
        if state.is_compensating() && self.compensation_data.is_none() {
            self.compensation_data = Some(CompensationData::capture(&self.context));
        }
        self.state = state;
        self.updated_at = Utc::now();
        if state.is_terminal() {
            self.current_step = None;
            if self.completed_at.is_none() {
                self.completed_at = Some(self.updated_at);
            }
        }
    }

    /// Marks a step as dispatched for the first time.
    pub fn begin_step(&mut self, step: StepName) {
        self.current_step = Some(step);
        self.attempts = 1;
    }

    /// Appends a step result to the context.
    pub fn record_result(&mut self, result: StepResult) {
        self.context.record(result);
    }

    /// Returns true if the saga reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns how long the saga ran, if it completed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds())
    }
}

/// The state of one step-log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepLogState {
    /// Command dispatched, outcome unknown.
    Attempted,
    /// The step replied success.
    Succeeded,
    /// The step replied failure or timed out.
    Failed,
    /// The step's effect was later undone by its compensating step.
    Compensated,
}

impl StepLogState {
    /// Returns the state name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepLogState::Attempted => "attempted",
            StepLogState::Succeeded => "succeeded",
            StepLogState::Failed => "failed",
            StepLogState::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepLogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepLogState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attempted" => Ok(StepLogState::Attempted),
            "succeeded" => Ok(StepLogState::Succeeded),
            "failed" => Ok(StepLogState::Failed),
            "compensated" => Ok(StepLogState::Compensated),
            other => Err(format!("unknown step log state: {other}")),
        }
    }
}

/// One step attempt, recorded for audit and operator visibility.
///
/// Never read back by the orchestrator to make routing decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    pub saga_id: SagaId,
    pub step_name: StepName,
    /// 1-based attempt number; retries produce further records.
    pub attempt: u32,
    pub state: StepLogState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Elapsed time from dispatch to outcome, success or failure alike.
    pub duration_ms: Option<i64>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    /// Raw request/response payload for the attempt.
    pub step_data: serde_json::Value,
}

impl SagaStep {
    /// Creates a fresh `Attempted` record for a dispatched command.
    pub fn attempted(
        saga_id: SagaId,
        step_name: StepName,
        attempt: u32,
        step_data: serde_json::Value,
    ) -> Self {
        Self {
            saga_id,
            step_name,
            attempt,
            state: StepLogState::Attempted,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            success: None,
            error_message: None,
            step_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, CustomerId, Money, SaleItem};

    fn request() -> SaleRequest {
        SaleRequest::new(
            CorrelationId::new(),
            CustomerId::new(),
            vec![SaleItem::new("SKU-001", "Widget", 2, Money::from_cents(1000))],
        )
    }

    #[test]
    fn terminal_states() {
        for state in SagaState::ALL {
            let terminal = matches!(
                state,
                SagaState::SaleConfirmed
                    | SagaState::Compensated
                    | SagaState::StockVerificationFailed
                    | SagaState::StockReservationFailed
                    | SagaState::PaymentFailed
                    | SagaState::OrderConfirmationFailed
                    | SagaState::Failed
            );
            assert_eq!(state.is_terminal(), terminal, "state {state}");
        }
    }

    #[test]
    fn awaiting_step_covers_in_flight_states_only() {
        let awaiting: Vec<_> = SagaState::ALL
            .iter()
            .filter(|s| s.awaiting_step().is_some())
            .collect();
        assert_eq!(awaiting.len(), 6);
        assert_eq!(
            SagaState::PaymentProcessing.awaiting_step(),
            Some(StepName::ProcessPayment)
        );
        assert_eq!(SagaState::StockVerified.awaiting_step(), None);
        assert_eq!(SagaState::Failed.awaiting_step(), None);
    }

    #[test]
    fn state_roundtrips_through_str() {
        for state in SagaState::ALL {
            assert_eq!(state.as_str().parse::<SagaState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<SagaState>().is_err());
    }

    #[test]
    fn step_name_roundtrips_through_str() {
        for step in StepName::ALL {
            assert_eq!(step.as_str().parse::<StepName>().unwrap(), step);
        }
    }

    #[test]
    fn compensating_steps_map_to_forward_steps() {
        assert_eq!(
            StepName::ReleaseStock.compensates(),
            Some(StepName::ReserveStock)
        );
        assert_eq!(
            StepName::RefundPayment.compensates(),
            Some(StepName::ProcessPayment)
        );
        assert_eq!(StepName::VerifyStock.compensates(), None);
        assert!(StepName::ReleaseStock.is_compensating());
        assert!(!StepName::ConfirmOrder.is_compensating());
    }

    #[test]
    fn new_saga_starts_initiated() {
        let saga = Saga::new(request());
        assert_eq!(saga.state, SagaState::Initiated);
        assert!(saga.current_step.is_none());
        assert!(saga.completed_at.is_none());
        assert_eq!(saga.revision, 0);
    }

    #[test]
    fn completed_at_set_only_on_terminal_entry() {
        let mut saga = Saga::new(request());
        saga.transition_to(SagaState::StockVerifying);
        assert!(saga.completed_at.is_none());

        saga.transition_to(SagaState::StockVerificationFailed);
        let completed = saga.completed_at.expect("terminal sets completed_at");

        // A second terminal transition must not move the timestamp.
        saga.transition_to(SagaState::Failed);
        assert_eq!(saga.completed_at, Some(completed));
    }

    #[test]
    fn completed_at_iff_terminal_for_all_states() {
        for state in SagaState::ALL {
            let mut saga = Saga::new(request());
            saga.transition_to(state);
            assert_eq!(saga.completed_at.is_some(), state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn compensation_data_frozen_on_first_compensating_state() {
        let mut saga = Saga::new(request());
        saga.record_result(StepResult::StockReserved {
            reservation_id: "RES-0001".to_string(),
        });
        saga.transition_to(SagaState::CompensatingStock);

        let frozen = saga.compensation_data.clone().unwrap();
        assert_eq!(frozen.reservation_id.as_deref(), Some("RES-0001"));

        // Later context noise must not alter the frozen snapshot.
        saga.record_result(StepResult::StockReserved {
            reservation_id: "RES-9999".to_string(),
        });
        saga.transition_to(SagaState::CompensatingPayment);
        assert_eq!(
            saga.compensation_data.unwrap().reservation_id.as_deref(),
            Some("RES-0001")
        );
    }

    #[test]
    fn terminal_transition_clears_current_step() {
        let mut saga = Saga::new(request());
        saga.transition_to(SagaState::StockVerifying);
        saga.begin_step(StepName::VerifyStock);
        assert_eq!(saga.current_step, Some(StepName::VerifyStock));

        saga.transition_to(SagaState::StockVerificationFailed);
        assert!(saga.current_step.is_none());
    }

    #[test]
    fn saga_serialization_roundtrip() {
        let mut saga = Saga::new(request());
        saga.transition_to(SagaState::PaymentProcessing);
        saga.begin_step(StepName::ProcessPayment);
        saga.error_message = Some("card declined".to_string());

        let json = serde_json::to_string(&saga).unwrap();
        let deserialized: Saga = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, saga.id);
        assert_eq!(deserialized.state, SagaState::PaymentProcessing);
        assert_eq!(deserialized.current_step, Some(StepName::ProcessPayment));
    }

    #[test]
    fn state_wire_format_is_screaming_snake_case() {
        let json = serde_json::to_string(&SagaState::CompensatingStock).unwrap();
        assert_eq!(json, "\"COMPENSATING_STOCK\"");
    }
}
