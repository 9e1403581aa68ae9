use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RocketMeshError, Result};

/// Identifies one queue of a topic on a broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: u32,
}

impl MessageQueue {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }
}

impl fmt::Display for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// Caller-supplied metadata merged into an outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryHeader {
    /// Business keys used for lookup on the broker side
    pub keys: String,
    /// Whether the broker should confirm the store before acknowledging
    pub wait_store_confirmation: bool,
}

impl Default for DeliveryHeader {
    fn default() -> Self {
        Self {
            keys: String::new(),
            wait_store_confirmation: true,
        }
    }
}

impl DeliveryHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(mut self, keys: impl Into<String>) -> Self {
        self.keys = keys.into();
        self
    }

    pub fn with_wait_store_confirmation(mut self, wait: bool) -> Self {
        self.wait_store_confirmation = wait;
        self
    }
}

/// Outbound broker message. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    topic: String,
    tag: String,
    body: Bytes,
    keys: Option<String>,
    wait_store_confirmation: bool,
}

impl Message {
    /// Build a message, merging the optional header.
    ///
    /// The topic and the body must be non-empty. Header keys are copied only
    /// when non-empty.
    pub fn new(
        topic: impl Into<String>,
        tag: impl Into<String>,
        body: impl Into<Bytes>,
        header: Option<&DeliveryHeader>,
    ) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(RocketMeshError::argument_error("topic must not be empty"));
        }
        let body = body.into();
        if body.is_empty() {
            return Err(RocketMeshError::argument_error(format!(
                "message body for topic '{}' must not be empty",
                topic
            )));
        }

        let mut keys = None;
        let mut wait_store_confirmation = true;
        if let Some(header) = header {
            if !header.keys.is_empty() {
                keys = Some(header.keys.clone());
            }
            wait_store_confirmation = header.wait_store_confirmation;
        }

        Ok(Self {
            topic,
            tag: tag.into(),
            body,
            keys,
            wait_store_confirmation,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn keys(&self) -> Option<&str> {
        self.keys.as_deref()
    }

    pub fn wait_store_confirmation(&self) -> bool {
        self.wait_store_confirmation
    }
}

/// Broker store status reported for a successful send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Ok,
    FlushDiskTimeout,
    FlushSlaveTimeout,
    SlaveNotAvailable,
}

/// Acknowledgement returned by synchronous and asynchronous sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub status: SendStatus,
    pub message_id: String,
    pub queue: MessageQueue,
    pub queue_offset: u64,
}

/// A message as delivered to a consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedEnvelope {
    pub topic: String,
    pub tag: String,
    pub keys: Option<String>,
    pub body: Bytes,
    pub message_id: String,
    /// Number of times the broker already redelivered this message
    pub reconsume_count: u32,
    pub queue: MessageQueue,
    pub queue_offset: u64,
    pub born_timestamp: DateTime<Utc>,
}

impl ConsumedEnvelope {
    /// Envelope for a message stored at `queue_offset`, not yet redelivered
    pub fn from_message(
        message: &Message,
        message_id: impl Into<String>,
        queue: MessageQueue,
        queue_offset: u64,
    ) -> Self {
        Self {
            topic: message.topic().to_string(),
            tag: message.tag().to_string(),
            keys: message.keys().map(str::to_string),
            body: message.body().clone(),
            message_id: message_id.into(),
            reconsume_count: 0,
            queue,
            queue_offset,
            born_timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_defaults() {
        let header = DeliveryHeader::default();
        assert_eq!(header.keys, "");
        assert!(header.wait_store_confirmation);
    }

    #[test]
    fn test_message_requires_topic_and_body() {
        let err = Message::new("", "tag", "body", None).unwrap_err();
        assert!(matches!(err, RocketMeshError::Argument(_)));

        let err = Message::new("orders", "tag", Bytes::new(), None).unwrap_err();
        assert!(matches!(err, RocketMeshError::Argument(_)));
    }

    #[test]
    fn test_header_merge() {
        let header = DeliveryHeader::new()
            .with_keys("order-42")
            .with_wait_store_confirmation(false);
        let message = Message::new("orders", "created", "{}", Some(&header)).unwrap();

        assert_eq!(message.keys(), Some("order-42"));
        assert!(!message.wait_store_confirmation());

        let message = Message::new("orders", "created", "{}", Some(&DeliveryHeader::default())).unwrap();
        assert_eq!(message.keys(), None);
        assert!(message.wait_store_confirmation());
    }

    #[test]
    fn test_envelope_from_message() {
        let message = Message::new("orders", "created", "hello", None).unwrap();
        let queue = MessageQueue::new("orders", "broker-a", 2);
        let envelope = ConsumedEnvelope::from_message(&message, "id-1", queue.clone(), 7);

        assert_eq!(envelope.topic, "orders");
        assert_eq!(envelope.body, Bytes::from_static(b"hello"));
        assert_eq!(envelope.reconsume_count, 0);
        assert_eq!(envelope.queue, queue);
        assert_eq!(envelope.queue_offset, 7);
        assert_eq!(queue.to_string(), "orders@broker-a#2");
    }
}
