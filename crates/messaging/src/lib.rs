//! Topic-routed, at-least-once message transport for the saga system.
//!
//! The orchestrator and the downstream services only ever talk through this
//! channel: commands go out on `command.*` routing keys, replies come back
//! on `reply.*`, and saga lifecycle events fan out on the `saga-events`
//! exchange. Poison messages end up on the dead-letter queue.
//!
//! The broker stays behind the [`MessageChannel`] trait; the topology
//! (exchanges, queues, bindings) is a declarative list applied once at
//! deployment time by [`Topology::provision`], tolerating re-runs.

pub mod channel;
pub mod error;
pub mod memory;
pub mod message;
pub mod routing;
pub mod topology;

pub use channel::{MessageChannel, MessageStream};
pub use error::{ChannelError, Result};
pub use memory::InMemoryMessageChannel;
pub use message::{Message, MessageBuilder, MessageId};
pub use routing::topic_matches;
pub use topology::{BindingSpec, ExchangeKind, ExchangeSpec, QueueSpec, Topology};
