//! Saga context: the append-only record of a sale and its step results.

use chrono::{DateTime, Utc};
use common::{Money, SaleRequest};
use serde::{Deserialize, Serialize};

use crate::model::StepName;

/// What one completed step produced, tagged per step kind.
///
/// Keeping a tagged union instead of an untyped document lets the
/// compensation path pattern-match on exactly what was reserved or charged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", content = "data", rename_all = "snake_case")]
pub enum StepResult {
    /// Stock verification confirmed availability.
    StockVerified { items_checked: u32 },
    /// Stock was reserved under the given ticket.
    StockReserved { reservation_id: String },
    /// Payment was captured under the given transaction.
    PaymentProcessed { transaction_id: String, amount: Money },
    /// The order was confirmed downstream.
    OrderConfirmed { order_number: String },
    /// A reservation was released during compensation.
    StockReleased { reservation_id: String },
    /// A payment was refunded during compensation.
    PaymentRefunded { transaction_id: String },
}

impl StepResult {
    /// Returns the step this result belongs to.
    pub fn step(&self) -> StepName {
        match self {
            StepResult::StockVerified { .. } => StepName::VerifyStock,
            StepResult::StockReserved { .. } => StepName::ReserveStock,
            StepResult::PaymentProcessed { .. } => StepName::ProcessPayment,
            StepResult::OrderConfirmed { .. } => StepName::ConfirmOrder,
            StepResult::StockReleased { .. } => StepName::ReleaseStock,
            StepResult::PaymentRefunded { .. } => StepName::RefundPayment,
        }
    }
}

/// Structured document accumulating the sale request and every step result.
///
/// Append-only: results are recorded in completion order and never removed
/// or rewritten. Compensation reads the identifiers it needs from here (via
/// the frozen [`CompensationData`] snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaContext {
    /// The sale request that started the saga.
    pub request: SaleRequest,
    /// Step results, in completion order.
    pub results: Vec<StepResult>,
}

impl SagaContext {
    /// Creates a context holding just the request.
    pub fn new(request: SaleRequest) -> Self {
        Self {
            request,
            results: Vec::new(),
        }
    }

    /// Appends a step result.
    pub fn record(&mut self, result: StepResult) {
        self.results.push(result);
    }

    /// Returns the recorded result for a step, if any.
    pub fn result_for(&self, step: StepName) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step() == step)
    }

    /// Returns the stock reservation ticket, if one was recorded.
    pub fn reservation_id(&self) -> Option<&str> {
        self.results.iter().find_map(|r| match r {
            StepResult::StockReserved { reservation_id } => Some(reservation_id.as_str()),
            _ => None,
        })
    }

    /// Returns the payment transaction id, if one was recorded.
    pub fn transaction_id(&self) -> Option<&str> {
        self.results.iter().find_map(|r| match r {
            StepResult::PaymentProcessed { transaction_id, .. } => Some(transaction_id.as_str()),
            _ => None,
        })
    }

    /// Returns the confirmed order number, if one was recorded.
    pub fn order_number(&self) -> Option<&str> {
        self.results.iter().find_map(|r| match r {
            StepResult::OrderConfirmed { order_number } => Some(order_number.as_str()),
            _ => None,
        })
    }

    /// Completed forward steps in completion order.
    pub fn completed_forward_steps(&self) -> Vec<StepName> {
        self.results
            .iter()
            .map(StepResult::step)
            .filter(|step| !step.is_compensating())
            .collect()
    }
}

/// The subset of the context compensation relies on, captured at the moment
/// compensation begins so later context writes cannot corrupt rollback
/// instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    /// Reservation ticket to release, if stock was reserved.
    pub reservation_id: Option<String>,
    /// Payment transaction to refund, if payment was captured.
    pub transaction_id: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CompensationData {
    /// Freezes the undoable effects recorded in the context.
    pub fn capture(context: &SagaContext) -> Self {
        Self {
            reservation_id: context.reservation_id().map(str::to_string),
            transaction_id: context.transaction_id().map(str::to_string),
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, CustomerId, SaleItem};

    fn context() -> SagaContext {
        SagaContext::new(SaleRequest::new(
            CorrelationId::new(),
            CustomerId::new(),
            vec![SaleItem::new("SKU-001", "Widget", 1, Money::from_cents(500))],
        ))
    }

    #[test]
    fn results_accumulate_in_order() {
        let mut ctx = context();
        ctx.record(StepResult::StockVerified { items_checked: 1 });
        ctx.record(StepResult::StockReserved {
            reservation_id: "RES-0001".to_string(),
        });
        ctx.record(StepResult::PaymentProcessed {
            transaction_id: "TXN-0001".to_string(),
            amount: Money::from_cents(500),
        });

        assert_eq!(
            ctx.completed_forward_steps(),
            vec![
                StepName::VerifyStock,
                StepName::ReserveStock,
                StepName::ProcessPayment
            ]
        );
        assert_eq!(ctx.reservation_id(), Some("RES-0001"));
        assert_eq!(ctx.transaction_id(), Some("TXN-0001"));
        assert!(ctx.order_number().is_none());
    }

    #[test]
    fn result_for_finds_by_step() {
        let mut ctx = context();
        ctx.record(StepResult::OrderConfirmed {
            order_number: "ORD-42".to_string(),
        });
        assert!(ctx.result_for(StepName::ConfirmOrder).is_some());
        assert!(ctx.result_for(StepName::ReserveStock).is_none());
    }

    #[test]
    fn compensating_results_excluded_from_forward_steps() {
        let mut ctx = context();
        ctx.record(StepResult::StockReserved {
            reservation_id: "RES-0001".to_string(),
        });
        ctx.record(StepResult::StockReleased {
            reservation_id: "RES-0001".to_string(),
        });
        assert_eq!(ctx.completed_forward_steps(), vec![StepName::ReserveStock]);
    }

    #[test]
    fn capture_freezes_undoable_effects() {
        let mut ctx = context();
        ctx.record(StepResult::StockReserved {
            reservation_id: "RES-0001".to_string(),
        });
        let frozen = CompensationData::capture(&ctx);
        assert_eq!(frozen.reservation_id.as_deref(), Some("RES-0001"));
        assert!(frozen.transaction_id.is_none());
    }

    #[test]
    fn step_result_serialization_is_tagged() {
        let result = StepResult::PaymentProcessed {
            transaction_id: "TXN-7".to_string(),
            amount: Money::from_cents(100),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["step"], "process_payment");
        assert_eq!(json["data"]["transaction_id"], "TXN-7");

        let back: StepResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
