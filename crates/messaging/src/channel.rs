use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::Result;
use crate::message::Message;
use crate::topology::{BindingSpec, ExchangeSpec, QueueSpec};

/// A stream of delivered messages. The stream ends when the channel closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Core trait for message channel implementations.
///
/// Provides topic-routed publishing with durable, at-least-once delivery
/// semantics, plus the declaration operations the one-shot topology
/// provisioning uses. Declarations are idempotent: redeclaring with the same
/// configuration succeeds, redeclaring with a different one fails with
/// `AlreadyExists`.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Declares an exchange.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Declares a queue.
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Binds a queue to an exchange under a routing-key pattern.
    async fn bind_queue(&self, spec: &BindingSpec) -> Result<()>;

    /// Publishes a message to an exchange under a routing key.
    ///
    /// The message is delivered to every queue whose binding pattern matches
    /// the key; publishing to a key nothing is bound to is not an error.
    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()>;

    /// Attaches the single consumer to a queue and returns its stream.
    ///
    /// Messages published before the consumer attached are buffered and
    /// delivered first.
    async fn consume(&self, queue: &str) -> Result<MessageStream>;

    /// Routes a poison message to the dead-letter exchange, tagging the
    /// reason in the message headers.
    async fn dead_letter(&self, message: Message, reason: &str) -> Result<()>;
}
