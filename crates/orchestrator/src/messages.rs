//! Command, reply, and lifecycle wire types.

use chrono::{DateTime, Utc};
use common::{CorrelationId, CustomerId, Money, SagaId, SaleItem};
use messaging::routing;
use saga_store::{Saga, SagaState, StepName, StepResult};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// A command the orchestrator publishes to a downstream service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCommand {
    pub saga_id: SagaId,
    pub correlation_id: CorrelationId,
    pub step: StepName,
    pub payload: CommandPayload,
}

/// Per-step command payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandPayload {
    VerifyStock {
        items: Vec<SaleItem>,
    },
    ReserveStock {
        items: Vec<SaleItem>,
    },
    ProcessPayment {
        customer_id: CustomerId,
        amount: Money,
    },
    ConfirmOrder {
        customer_id: CustomerId,
        items: Vec<SaleItem>,
        amount: Money,
    },
    ReleaseStock {
        reservation_id: String,
    },
    RefundPayment {
        transaction_id: String,
    },
}

/// Builds the command for a step from the saga's own data.
///
/// Forward payloads come from the sale request; compensating payloads come
/// from the frozen compensation snapshot, never the live context.
pub fn build_command(saga: &Saga, step: StepName) -> Result<SagaCommand> {
    let request = &saga.context.request;
    let payload = match step {
        StepName::VerifyStock => CommandPayload::VerifyStock {
            items: request.items.clone(),
        },
        StepName::ReserveStock => CommandPayload::ReserveStock {
            items: request.items.clone(),
        },
        StepName::ProcessPayment => CommandPayload::ProcessPayment {
            customer_id: request.customer_id,
            amount: request.total_amount(),
        },
        StepName::ConfirmOrder => CommandPayload::ConfirmOrder {
            customer_id: request.customer_id,
            items: request.items.clone(),
            amount: request.total_amount(),
        },
        StepName::ReleaseStock => {
            let reservation_id = saga
                .compensation_data
                .as_ref()
                .and_then(|data| data.reservation_id.clone())
                .or_else(|| saga.context.reservation_id().map(str::to_string))
                .ok_or(OrchestratorError::MissingCompensationData {
                    saga_id: saga.id,
                    step,
                })?;
            CommandPayload::ReleaseStock { reservation_id }
        }
        StepName::RefundPayment => {
            let transaction_id = saga
                .compensation_data
                .as_ref()
                .and_then(|data| data.transaction_id.clone())
                .or_else(|| saga.context.transaction_id().map(str::to_string))
                .ok_or(OrchestratorError::MissingCompensationData {
                    saga_id: saga.id,
                    step,
                })?;
            CommandPayload::RefundPayment { transaction_id }
        }
    };

    Ok(SagaCommand {
        saga_id: saga.id,
        correlation_id: saga.correlation_id,
        step,
        payload,
    })
}

/// Routing key a step's command is published under.
pub fn command_routing_key(step: StepName) -> &'static str {
    match step {
        StepName::VerifyStock => routing::CMD_VERIFY_STOCK,
        StepName::ReserveStock => routing::CMD_RESERVE_STOCK,
        StepName::ProcessPayment => routing::CMD_PROCESS_PAYMENT,
        StepName::ConfirmOrder => routing::CMD_CONFIRM_ORDER,
        StepName::ReleaseStock => routing::CMD_RELEASE_STOCK,
        StepName::RefundPayment => routing::CMD_REFUND_PAYMENT,
    }
}

/// Routing key a step's reply is published under.
pub fn reply_routing_key(step: StepName) -> &'static str {
    match step {
        StepName::VerifyStock => routing::REPLY_VERIFY_STOCK,
        StepName::ReserveStock => routing::REPLY_RESERVE_STOCK,
        StepName::ProcessPayment => routing::REPLY_PROCESS_PAYMENT,
        StepName::ConfirmOrder => routing::REPLY_CONFIRM_ORDER,
        StepName::ReleaseStock => routing::REPLY_RELEASE_STOCK,
        StepName::RefundPayment => routing::REPLY_REFUND_PAYMENT,
    }
}

/// A downstream service's reply to a step command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReply {
    pub correlation_id: CorrelationId,
    pub step: StepName,
    pub outcome: ReplyOutcome,
}

/// The outcome a reply carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// The step succeeded, producing its result data.
    Succeeded { result: StepResult },
    /// The step was refused or failed downstream.
    ///
    /// `retryable` distinguishes transient failures (service unavailable)
    /// from business rejections (insufficient stock, card declined).
    Rejected { reason: String, retryable: bool },
}

impl StepReply {
    /// Convenience constructor for a success reply.
    pub fn succeeded(correlation_id: CorrelationId, result: StepResult) -> Self {
        Self {
            correlation_id,
            step: result.step(),
            outcome: ReplyOutcome::Succeeded { result },
        }
    }

    /// Convenience constructor for a rejection reply.
    pub fn rejected(
        correlation_id: CorrelationId,
        step: StepName,
        reason: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            correlation_id,
            step,
            outcome: ReplyOutcome::Rejected {
                reason: reason.into(),
                retryable,
            },
        }
    }
}

/// Saga lifecycle event published on the saga exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub saga_id: SagaId,
    pub correlation_id: CorrelationId,
    pub state: SagaState,
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Snapshots a saga into a lifecycle event.
    pub fn from_saga(saga: &Saga) -> Self {
        Self {
            saga_id: saga.id,
            correlation_id: saga.correlation_id,
            state: saga.state,
            error_message: saga.error_message.clone(),
            occurred_at: Utc::now(),
        }
    }
}
