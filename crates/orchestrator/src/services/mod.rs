//! In-memory downstream services for the saga steps.
//!
//! Each service consumes its command queue and publishes replies on the
//! matching `reply.*` key, exactly like the real autonomous services would.
//! Failure switches (`set_fail_on_*`, transient failures, silence) exist so
//! tests and the worker can exercise every path the orchestrator handles.

pub mod order;
pub mod payment;
pub mod stock;

pub use order::InMemoryOrderService;
pub use payment::InMemoryPaymentService;
pub use stock::InMemoryStockService;

use messaging::{Message, MessageChannel, routing};

use crate::messages::{ReplyOutcome, SagaCommand, StepReply, reply_routing_key};

/// Publishes a service reply on the step's reply key.
pub(crate) async fn publish_reply<C: MessageChannel + ?Sized>(
    channel: &C,
    command: &SagaCommand,
    outcome: ReplyOutcome,
) {
    let reply = StepReply {
        correlation_id: command.correlation_id,
        step: command.step,
        outcome,
    };
    let key = reply_routing_key(command.step);
    let message = match Message::builder()
        .correlation_id(command.correlation_id)
        .routing_key(key)
        .payload(&reply)
    {
        Ok(builder) => builder.build(),
        Err(error) => {
            tracing::warn!(%error, "failed to serialize reply");
            return;
        }
    };
    if let Err(error) = channel.publish(routing::SAGA_EXCHANGE, key, message).await {
        tracing::warn!(step = %command.step, %error, "reply publish failed");
    }
}
