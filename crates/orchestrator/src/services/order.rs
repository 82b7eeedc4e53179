//! Order service: confirms completed sales.

use std::sync::{Arc, RwLock};

use futures_util::StreamExt;
use messaging::{MessageChannel, routing};
use saga_store::StepResult;

use crate::error::Result;
use crate::messages::{CommandPayload, ReplyOutcome, SagaCommand};
use crate::services::publish_reply;

#[derive(Debug, Default)]
struct OrderState {
    next_id: u32,
    confirmed: u32,
    fail_on_confirm: bool,
    silent: bool,
}

/// In-memory order service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderService {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderService {
    /// Creates a new in-memory order service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next confirm calls (business rejection).
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state.write().unwrap().fail_on_confirm = fail;
    }

    /// Stops replying altogether, exercising step timeouts.
    pub fn set_silent(&self, silent: bool) {
        self.state.write().unwrap().silent = silent;
    }

    /// Returns the number of confirmed orders.
    pub fn confirmed_count(&self) -> u32 {
        self.state.read().unwrap().confirmed
    }

    /// Consumes the order command queue until the channel closes.
    pub async fn run<C: MessageChannel>(self, channel: Arc<C>) -> Result<()> {
        let mut commands = channel.consume(routing::ORDER_COMMAND_QUEUE).await?;
        while let Some(message) = commands.next().await {
            let command: SagaCommand = match serde_json::from_value(message.payload.clone()) {
                Ok(command) => command,
                Err(error) => {
                    tracing::warn!(%error, "order service received malformed command");
                    let _ = channel.dead_letter(message, "malformed command").await;
                    continue;
                }
            };
            let Some(outcome) = self.handle(&command) else {
                continue;
            };
            publish_reply(&*channel, &command, outcome).await;
        }
        Ok(())
    }

    fn handle(&self, command: &SagaCommand) -> Option<ReplyOutcome> {
        let mut state = self.state.write().unwrap();
        if state.silent {
            return None;
        }
        match &command.payload {
            CommandPayload::ConfirmOrder { .. } => Some(if state.fail_on_confirm {
                ReplyOutcome::Rejected {
                    reason: "order validation failed".to_string(),
                    retryable: false,
                }
            } else {
                state.next_id += 1;
                state.confirmed += 1;
                ReplyOutcome::Succeeded {
                    result: StepResult::OrderConfirmed {
                        order_number: format!("ORD-{:04}", state.next_id),
                    },
                }
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CorrelationId, CustomerId, Money, SagaId, SaleItem};
    use saga_store::StepName;

    fn confirm() -> SagaCommand {
        SagaCommand {
            saga_id: SagaId::new(),
            correlation_id: CorrelationId::new(),
            step: StepName::ConfirmOrder,
            payload: CommandPayload::ConfirmOrder {
                customer_id: CustomerId::new(),
                items: vec![SaleItem::new("SKU-001", "Widget", 1, Money::from_cents(100))],
                amount: Money::from_cents(100),
            },
        }
    }

    #[test]
    fn confirm_assigns_order_numbers() {
        let service = InMemoryOrderService::new();
        let outcome = service.handle(&confirm()).unwrap();
        let ReplyOutcome::Succeeded {
            result: StepResult::OrderConfirmed { order_number },
        } = outcome
        else {
            panic!("expected a confirmation");
        };
        assert_eq!(order_number, "ORD-0001");
        assert_eq!(service.confirmed_count(), 1);
    }

    #[test]
    fn rejection_is_not_retryable() {
        let service = InMemoryOrderService::new();
        service.set_fail_on_confirm(true);
        let outcome = service.handle(&confirm()).unwrap();
        assert!(matches!(
            outcome,
            ReplyOutcome::Rejected {
                retryable: false,
                ..
            }
        ));
    }
}
