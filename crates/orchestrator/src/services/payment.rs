//! Payment service: charges and refunds.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use common::{CustomerId, Money};
use futures_util::StreamExt;
use messaging::{MessageChannel, routing};
use saga_store::StepResult;

use crate::error::Result;
use crate::messages::{CommandPayload, ReplyOutcome, SagaCommand};
use crate::services::publish_reply;

#[derive(Debug, Default)]
struct PaymentState {
    payments: HashMap<String, (CustomerId, Money)>,
    next_id: u32,
    refunds: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
    transient_charge_failures: u32,
    silent: bool,
}

/// In-memory payment service.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next charge calls (business rejection).
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Rejects the next refund calls, exercising compensation retries.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Fails the next `count` charges with a retryable error, then
    /// succeeds.
    pub fn set_transient_charge_failures(&self, count: u32) {
        self.state.write().unwrap().transient_charge_failures = count;
    }

    /// Stops replying altogether, exercising step timeouts.
    pub fn set_silent(&self, silent: bool) {
        self.state.write().unwrap().silent = silent;
    }

    /// Returns the number of captured payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    /// Returns true if a payment exists with the given transaction ID.
    pub fn has_payment(&self, transaction_id: &str) -> bool {
        self.state
            .read()
            .unwrap()
            .payments
            .contains_key(transaction_id)
    }

    /// Returns the number of refunds performed.
    pub fn refund_count(&self) -> u32 {
        self.state.read().unwrap().refunds
    }

    /// Consumes the payment command queue until the channel closes.
    pub async fn run<C: MessageChannel>(self, channel: Arc<C>) -> Result<()> {
        let mut commands = channel.consume(routing::PAYMENT_COMMAND_QUEUE).await?;
        while let Some(message) = commands.next().await {
            let command: SagaCommand = match serde_json::from_value(message.payload.clone()) {
                Ok(command) => command,
                Err(error) => {
                    tracing::warn!(%error, "payment service received malformed command");
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
            CommandPayload::ProcessPayment {
                customer_id,
                amount,
            } => Some(if state.transient_charge_failures > 0 {
                state.transient_charge_failures -= 1;
                ReplyOutcome::Rejected {
                    reason: "payment gateway unavailable".to_string(),
                    retryable: true,
                }
            } else if state.fail_on_charge {
                ReplyOutcome::Rejected {
                    reason: "card declined".to_string(),
                    retryable: false,
                }
            } else {
                state.next_id += 1;
                let transaction_id = format!("TXN-{:04}", state.next_id);
                state
                    .payments
                    .insert(transaction_id.clone(), (*customer_id, *amount));
                ReplyOutcome::Succeeded {
                    result: StepResult::PaymentProcessed {
                        transaction_id,
                        amount: *amount,
                    },
                }
            }),
            CommandPayload::RefundPayment { transaction_id } => Some(if state.fail_on_refund {
                ReplyOutcome::Rejected {
                    reason: "payment gateway unavailable".to_string(),
                    retryable: true,
                }
            } else {
                state.payments.remove(transaction_id);
                state.refunds += 1;
                ReplyOutcome::Succeeded {
                    result: StepResult::PaymentRefunded {
                        transaction_id: transaction_id.clone(),
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
    use common::{CorrelationId, SagaId};
    use saga_store::StepName;

    fn charge() -> SagaCommand {
        SagaCommand {
            saga_id: SagaId::new(),
            correlation_id: CorrelationId::new(),
            step: StepName::ProcessPayment,
            payload: CommandPayload::ProcessPayment {
                customer_id: CustomerId::new(),
                amount: Money::from_cents(4500),
            },
        }
    }

    #[test]
    fn charge_and_refund() {
        let service = InMemoryPaymentService::new();

        let outcome = service.handle(&charge()).unwrap();
        let ReplyOutcome::Succeeded {
            result: StepResult::PaymentProcessed { transaction_id, .. },
        } = outcome
        else {
            panic!("expected a payment");
        };
        assert_eq!(service.payment_count(), 1);
        assert!(service.has_payment(&transaction_id));

        let refund = SagaCommand {
            saga_id: SagaId::new(),
            correlation_id: CorrelationId::new(),
            step: StepName::RefundPayment,
            payload: CommandPayload::RefundPayment {
                transaction_id: transaction_id.clone(),
            },
        };
        service.handle(&refund).unwrap();
        assert_eq!(service.payment_count(), 0);
        assert_eq!(service.refund_count(), 1);
    }

    #[test]
    fn transient_failures_then_success() {
        let service = InMemoryPaymentService::new();
        service.set_transient_charge_failures(2);

        for _ in 0..2 {
            let outcome = service.handle(&charge()).unwrap();
            assert!(matches!(
                outcome,
                ReplyOutcome::Rejected {
                    retryable: true,
                    ..
                }
            ));
        }
        let outcome = service.handle(&charge()).unwrap();
        assert!(matches!(outcome, ReplyOutcome::Succeeded { .. }));
    }

    #[test]
    fn declined_charge_is_not_retryable() {
        let service = InMemoryPaymentService::new();
        service.set_fail_on_charge(true);
        let outcome = service.handle(&charge()).unwrap();
        assert!(matches!(
            outcome,
            ReplyOutcome::Rejected {
                retryable: false,
                ..
            }
        ));
        assert_eq!(service.payment_count(), 0);
    }
}
