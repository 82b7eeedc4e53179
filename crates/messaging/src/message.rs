use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message envelope: payload plus the metadata needed for routing,
/// correlation, and dead-lettering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub message_id: MessageId,

    /// The saga this message belongs to.
    pub correlation_id: CorrelationId,

    /// The routing key the message was published with.
    pub routing_key: String,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// Additional string headers (e.g. the dead-letter reason).
    pub headers: HashMap<String, String>,

    /// When the message was created.
    pub published_at: DateTime<Utc>,
}

impl Message {
    /// Creates a new message builder.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }
}

/// Builder for constructing messages.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    message_id: Option<MessageId>,
    correlation_id: Option<CorrelationId>,
    routing_key: Option<String>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
}

impl MessageBuilder {
    /// Sets the message ID. If not set, a new ID will be generated.
    pub fn message_id(mut self, id: MessageId) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the routing key.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = Some(routing_key.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a header entry.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Builds the message.
    ///
    /// # Panics
    ///
    /// Panics if required fields (correlation_id, routing_key, payload) are
    /// not set.
    pub fn build(self) -> Message {
        Message {
            message_id: self.message_id.unwrap_or_default(),
            correlation_id: self.correlation_id.expect("correlation_id is required"),
            routing_key: self.routing_key.expect("routing_key is required"),
            payload: self.payload.expect("payload is required"),
            headers: self.headers,
            published_at: Utc::now(),
        }
    }

    /// Tries to build the message, returning None if required fields are missing.
    pub fn try_build(self) -> Option<Message> {
        Some(Message {
            message_id: self.message_id.unwrap_or_default(),
            correlation_id: self.correlation_id?,
            routing_key: self.routing_key?,
            payload: self.payload?,
            headers: self.headers,
            published_at: Utc::now(),
        })
    }
}
