use std::str::Utf8Error;

use thiserror::Error;

/// Result type alias for RocketMesh operations
pub type Result<T> = std::result::Result<T, RocketMeshError>;

/// Error types surfaced by listener containers and the messaging template
#[derive(Error, Debug)]
pub enum RocketMeshError {
    /// Missing or invalid configuration detected at construction or start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid arguments passed to a send operation
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Broker failure while publishing
    #[error("Failed to send message to topic '{topic}' with tag '{tag}': {source}")]
    Messaging {
        topic: String,
        tag: String,
        #[source]
        source: BrokerError,
    },

    /// Handler failure for a single consumed message
    #[error("Consume of message {message_id} failed (reconsumed {reconsume_count} times): {source}")]
    Consume {
        message_id: String,
        reconsume_count: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Broker client errors outside of a send
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Payload encoding/decoding errors
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Settings loading errors
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),
}

impl RocketMeshError {
    /// Create a new configuration error
    pub fn config_error<T: ToString>(message: T) -> Self {
        Self::Configuration(message.to_string())
    }

    /// Create a new argument error
    pub fn argument_error<T: ToString>(message: T) -> Self {
        Self::Argument(message.to_string())
    }

    /// Create a new lifecycle error
    pub fn lifecycle_error<T: ToString>(message: T) -> Self {
        Self::Lifecycle(message.to_string())
    }

    /// Wrap a broker failure that happened while sending to `topic`/`tag`
    pub fn messaging_error(topic: impl Into<String>, tag: impl Into<String>, source: BrokerError) -> Self {
        Self::Messaging {
            topic: topic.into(),
            tag: tag.into(),
            source,
        }
    }

    /// Check if error is recoverable (a caller may retry the operation)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Messaging { source, .. } | Self::Broker(source) => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Errors reported by a broker client implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("client is not running")]
    NotRunning,

    #[error("client is in an invalid state: {0}")]
    InvalidState(String),

    #[error("invalid client setting: {0}")]
    InvalidSetting(String),

    #[error("queue selector returned no queue for topic '{topic}'")]
    NoQueueSelected { topic: String },

    #[error("message body of {size} bytes exceeds the maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl BrokerError {
    /// Timeouts and transient unavailability are worth retrying
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable(_))
    }
}

/// Payload conversion errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("unsupported charset '{0}'")]
    UnsupportedCharset(String),

    #[error("payload is not valid {charset} text: {source}")]
    InvalidText {
        charset: String,
        #[source]
        source: Utf8Error,
    },

    #[error("structured payload error: {0}")]
    Structured(#[from] serde_json::Error),
}
