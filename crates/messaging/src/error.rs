use thiserror::Error;

/// Errors that can occur when interacting with the message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An exchange or queue was redeclared with a different configuration.
    #[error("Already exists with different configuration: {0}")]
    AlreadyExists(String),

    /// The target exchange has not been declared.
    #[error("Unknown exchange: {0}")]
    UnknownExchange(String),

    /// The target queue has not been declared.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The queue already has a consumer attached.
    #[error("Queue already consumed: {0}")]
    QueueInUse(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
