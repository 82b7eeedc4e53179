use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::{MessageChannel, MessageStream};
use crate::error::{ChannelError, Result};
use crate::message::Message;
use crate::routing::{self, topic_matches};
use crate::topology::{BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec};

struct ExchangeState {
    spec: ExchangeSpec,
    /// (routing-key pattern, queue name)
    bindings: Vec<(String, String)>,
}

struct QueueState {
    spec: QueueSpec,
    sender: mpsc::UnboundedSender<Message>,
    /// Taken by the first consumer; a queue has a single consumer.
    receiver: Option<mpsc::UnboundedReceiver<Message>>,
}

#[derive(Default)]
struct ChannelState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
}

/// In-process message channel for tests and single-node deployments.
///
/// Provides the same contract as a broker-backed implementation: topic
/// routing with wildcards, buffering until a consumer attaches, and the
/// dead-letter path. Queues are unbounded; messages published before
/// `consume` are delivered first.
#[derive(Clone, Default)]
pub struct InMemoryMessageChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl InMemoryMessageChannel {
    /// Creates a new channel with no topology declared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the declared exchange names, for inspection in tests.
    pub fn exchange_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.exchanges.keys().cloned().collect()
    }

    /// Returns the declared queue names, for inspection in tests.
    pub fn queue_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.queues.keys().cloned().collect()
    }
}

#[async_trait]
impl MessageChannel for InMemoryMessageChannel {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.exchanges.get(&spec.name) {
            if existing.spec != *spec {
                return Err(ChannelError::AlreadyExists(spec.name.clone()));
            }
            return Ok(());
        }
        state.exchanges.insert(
            spec.name.clone(),
            ExchangeState {
                spec: spec.clone(),
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.queues.get(&spec.name) {
            if existing.spec != *spec {
                return Err(ChannelError::AlreadyExists(spec.name.clone()));
            }
            return Ok(());
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.queues.insert(
            spec.name.clone(),
            QueueState {
                spec: spec.clone(),
                sender,
                receiver: Some(receiver),
            },
        );
        Ok(())
    }

    async fn bind_queue(&self, spec: &BindingSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.queues.contains_key(&spec.queue) {
            return Err(ChannelError::UnknownQueue(spec.queue.clone()));
        }
        let exchange = state
            .exchanges
            .get_mut(&spec.exchange)
            .ok_or_else(|| ChannelError::UnknownExchange(spec.exchange.clone()))?;
        let binding = (spec.routing_key.clone(), spec.queue.clone());
        if !exchange.bindings.contains(&binding) {
            exchange.bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<()> {
        let state = self.state.lock().unwrap();
        let exchange_state = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| ChannelError::UnknownExchange(exchange.to_string()))?;

        let mut message = message;
        message.routing_key = routing_key.to_string();

        for (pattern, queue_name) in &exchange_state.bindings {
            let matched = match exchange_state.spec.kind {
                ExchangeKind::Topic => topic_matches(pattern, routing_key),
                ExchangeKind::Fanout => true,
            };
            if !matched {
                continue;
            }
            if let Some(queue) = state.queues.get(queue_name) {
                // A dropped consumer only loses its own deliveries.
                let _ = queue.sender.send(message.clone());
            }
        }

        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<MessageStream> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            let queue_state = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| ChannelError::UnknownQueue(queue.to_string()))?;
            queue_state
                .receiver
                .take()
                .ok_or_else(|| ChannelError::QueueInUse(queue.to_string()))?
        };

        let stream = futures_util::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn dead_letter(&self, message: Message, reason: &str) -> Result<()> {
        tracing::warn!(
            message_id = %message.message_id,
            routing_key = %message.routing_key,
            reason,
            "dead-lettering message"
        );
        let routing_key = message.routing_key.clone();
        let mut message = message;
        message
            .headers
            .insert("x-death-reason".to_string(), reason.to_string());
        self.publish(routing::DEAD_LETTER_EXCHANGE, &routing_key, message)
            .await
    }
}
