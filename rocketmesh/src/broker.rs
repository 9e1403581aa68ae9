//! Broker client capability consumed by containers and templates.
//!
//! The wire protocol lives behind these traits. [`crate::memory`] provides a
//! process-local implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConsumeFromWhere, ConsumeMode, MessageModel, ProducerConfig};
use crate::error::BrokerError;
use crate::message::{ConsumedEnvelope, Message, SendOutcome};
use crate::selector::QueueSelector;

/// Completion callback for asynchronous sends
pub type SendCallback = Box<dyn FnOnce(std::result::Result<SendOutcome, BrokerError>) + Send + 'static>;

/// Decision returned to the broker client for a dispatched batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeStatus {
    /// The batch is done and its offsets may advance
    Accepted,
    /// Redeliver the batch later at the given delay level
    RetryLater { delay_level: i32 },
    /// Stall the queue for `suspend`, then redeliver the same batch
    SuspendQueue { suspend: Duration },
}

impl ConsumeStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Invoked by a push consumer for every batch it delivers
#[async_trait]
pub trait DispatchCallback: Send + Sync {
    async fn dispatch(&self, batch: Vec<ConsumedEnvelope>) -> ConsumeStatus;
}

/// Settings applied to a push consumer before it starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub consumer_group: String,
    pub name_server: String,
    pub consume_mode: ConsumeMode,
    pub message_model: MessageModel,
    pub consume_from_where: ConsumeFromWhere,
    pub thread_pool_min: usize,
    pub thread_pool_max: usize,
    pub batch_max_size: usize,
}

/// Consumer half of the broker client.
///
/// In ordered mode the implementation must never dispatch two batches of the
/// same queue at once.
#[async_trait]
pub trait PushConsumer: Send + Sync {
    async fn configure(&self, settings: ConsumerSettings) -> std::result::Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str, selector_expression: &str) -> std::result::Result<(), BrokerError>;

    async fn register_dispatch(&self, callback: Arc<dyn DispatchCallback>) -> std::result::Result<(), BrokerError>;

    async fn start(&self) -> std::result::Result<(), BrokerError>;

    /// Stop delivering. Dispatches already running are allowed to finish.
    async fn shutdown(&self) -> std::result::Result<(), BrokerError>;
}

/// Producer half of the broker client
#[async_trait]
pub trait Producer: Send + Sync {
    async fn start(&self, config: ProducerConfig) -> std::result::Result<(), BrokerError>;

    async fn shutdown(&self) -> std::result::Result<(), BrokerError>;

    async fn send(&self, message: Message, timeout: Duration) -> std::result::Result<SendOutcome, BrokerError>;

    /// Send to the queue `selector` picks for `key`
    async fn send_selected(
        &self,
        message: Message,
        selector: Arc<dyn QueueSelector>,
        key: &str,
        timeout: Duration,
    ) -> std::result::Result<SendOutcome, BrokerError>;

    /// Dispatch without waiting; `callback` runs once the broker answers.
    /// An `Err` means the send was never dispatched and the callback is
    /// dropped uncalled.
    fn send_with_callback(
        &self,
        message: Message,
        callback: SendCallback,
        timeout: Duration,
    ) -> std::result::Result<(), BrokerError>;

    fn send_selected_with_callback(
        &self,
        message: Message,
        selector: Arc<dyn QueueSelector>,
        key: String,
        callback: SendCallback,
        timeout: Duration,
    ) -> std::result::Result<(), BrokerError>;

    /// Fire and forget: no acknowledgement, no retry
    async fn send_one_way(&self, message: Message) -> std::result::Result<(), BrokerError>;
}
