//! Declarative broker topology, applied once before the engine starts.

use serde::{Deserialize, Serialize};

use crate::channel::MessageChannel;
use crate::error::{ChannelError, Result};
use crate::routing;

/// How an exchange routes messages to bound queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Routing-key pattern matching with `*`/`#` wildcards.
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

/// Declaration of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        }
    }
}

/// Declaration of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Exchange that receives messages this queue rejects.
    pub dead_letter_exchange: Option<String>,
}

impl QueueSpec {
    /// A durable, non-exclusive, non-auto-delete queue, so orchestration
    /// state survives broker and process restarts.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
            dead_letter_exchange: None,
        }
    }

    /// Attaches a dead-letter exchange.
    pub fn with_dead_letter(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }
}

/// One queue-to-exchange binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

impl BindingSpec {
    /// Creates a binding.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// The full declarative topology: exchanges, queues, and bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    /// The standard sale-saga topology.
    ///
    /// - `domain-events` and `saga-events` topic exchanges;
    /// - per-service command queues bound to their `command.*` keys;
    /// - the orchestrator's `saga-replies` queue bound to `reply.#`;
    /// - a `dead-letter` exchange with a durable `dead-letter` queue.
    pub fn standard() -> Self {
        let dlx = routing::DEAD_LETTER_EXCHANGE;
        Self {
            exchanges: vec![
                ExchangeSpec::topic(routing::DOMAIN_EVENTS_EXCHANGE),
                ExchangeSpec::topic(routing::SAGA_EXCHANGE),
                ExchangeSpec::topic(dlx),
            ],
            queues: vec![
                QueueSpec::durable(routing::STOCK_COMMAND_QUEUE).with_dead_letter(dlx),
                QueueSpec::durable(routing::PAYMENT_COMMAND_QUEUE).with_dead_letter(dlx),
                QueueSpec::durable(routing::ORDER_COMMAND_QUEUE).with_dead_letter(dlx),
                QueueSpec::durable(routing::SAGA_REPLY_QUEUE).with_dead_letter(dlx),
                QueueSpec::durable(routing::DEAD_LETTER_QUEUE),
            ],
            bindings: vec![
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::STOCK_COMMAND_QUEUE,
                    routing::CMD_VERIFY_STOCK,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::STOCK_COMMAND_QUEUE,
                    routing::CMD_RESERVE_STOCK,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::STOCK_COMMAND_QUEUE,
                    routing::CMD_RELEASE_STOCK,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::PAYMENT_COMMAND_QUEUE,
                    routing::CMD_PROCESS_PAYMENT,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::PAYMENT_COMMAND_QUEUE,
                    routing::CMD_REFUND_PAYMENT,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::ORDER_COMMAND_QUEUE,
                    routing::CMD_CONFIRM_ORDER,
                ),
                BindingSpec::new(
                    routing::SAGA_EXCHANGE,
                    routing::SAGA_REPLY_QUEUE,
                    routing::REPLY_PATTERN,
                ),
                BindingSpec::new(dlx, routing::DEAD_LETTER_QUEUE, "#"),
            ],
        }
    }

    /// Applies the topology to a channel.
    ///
    /// Idempotent: `AlreadyExists` from any declaration is tolerated, so the
    /// operation can run on every deployment.
    pub async fn provision<C: MessageChannel + ?Sized>(&self, channel: &C) -> Result<()> {
        for exchange in &self.exchanges {
            match channel.declare_exchange(exchange).await {
                Ok(()) => {}
                Err(ChannelError::AlreadyExists(name)) => {
                    tracing::debug!(%name, "exchange already declared");
                }
                Err(e) => return Err(e),
            }
        }
        for queue in &self.queues {
            match channel.declare_queue(queue).await {
                Ok(()) => {}
                Err(ChannelError::AlreadyExists(name)) => {
                    tracing::debug!(%name, "queue already declared");
                }
                Err(e) => return Err(e),
            }
        }
        for binding in &self.bindings {
            channel.bind_queue(binding).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_topology_is_fully_durable() {
        let topology = Topology::standard();
        assert!(topology.exchanges.iter().all(|e| e.durable));
        assert!(
            topology
                .queues
                .iter()
                .all(|q| q.durable && !q.exclusive && !q.auto_delete)
        );
    }

    #[test]
    fn every_binding_references_declared_names() {
        let topology = Topology::standard();
        for binding in &topology.bindings {
            assert!(
                topology.exchanges.iter().any(|e| e.name == binding.exchange),
                "missing exchange {}",
                binding.exchange
            );
            assert!(
                topology.queues.iter().any(|q| q.name == binding.queue),
                "missing queue {}",
                binding.queue
            );
        }
    }

    #[test]
    fn command_queues_have_dead_letter_exchange() {
        let topology = Topology::standard();
        for name in [
            routing::STOCK_COMMAND_QUEUE,
            routing::PAYMENT_COMMAND_QUEUE,
            routing::ORDER_COMMAND_QUEUE,
            routing::SAGA_REPLY_QUEUE,
        ] {
            let queue = topology.queues.iter().find(|q| q.name == name).unwrap();
            assert_eq!(
                queue.dead_letter_exchange.as_deref(),
                Some(routing::DEAD_LETTER_EXCHANGE)
            );
        }
    }
}
