//! Listener container: owns one push-consumer subscription and feeds its
//! deliveries to a [`MessageListener`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::broker::{ConsumeStatus, DispatchCallback, PushConsumer};
use crate::codec::{ListenerPayload, PayloadCodec, PayloadKind, PayloadType};
use crate::config::{parse_name_servers, ConsumeMode, ListenerConfig};
use crate::error::{RocketMeshError, Result};
use crate::message::ConsumedEnvelope;

/// Application handler for consumed messages.
///
/// `T` is the payload type the listener wants; it defaults to the raw
/// [`ConsumedEnvelope`]. Returning `Err` (or panicking) marks the message as
/// failed and lets the container's retry policy decide what happens next.
#[async_trait]
pub trait MessageListener<T: Send + 'static = ConsumedEnvelope>: Send + Sync + 'static {
    async fn on_message(&self, message: T) -> anyhow::Result<()>;

    /// Listener name for logging
    fn name(&self) -> &'static str {
        "MessageListener"
    }
}

/// Closure-based listener
pub struct FunctionListener<F> {
    name: &'static str,
    handler: F,
}

impl<F> FunctionListener<F> {
    pub fn new(name: &'static str, handler: F) -> Self {
        Self { name, handler }
    }
}

#[async_trait]
impl<T, F, Fut> MessageListener<T> for FunctionListener<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn on_message(&self, message: T) -> anyhow::Result<()> {
        (self.handler)(message).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Lifecycle of a container. Each transition happens at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Started,
    Stopped,
}

/// What to tell the broker after a failed consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    mode: ConsumeMode,
    max_reconsume_attempts: u32,
    next_attempt_delay_level: i32,
    ordered_suspend: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ListenerConfig) -> Self {
        Self {
            mode: config.consume_mode(),
            max_reconsume_attempts: config.max_reconsume_attempts(),
            next_attempt_delay_level: config.next_attempt_delay_level(),
            ordered_suspend: config.ordered_suspend(),
        }
    }

    /// Status that asks the broker to deliver the batch again
    pub fn retry_status(&self) -> ConsumeStatus {
        match self.mode {
            ConsumeMode::Concurrent => ConsumeStatus::RetryLater {
                delay_level: self.next_attempt_delay_level,
            },
            ConsumeMode::Ordered => ConsumeStatus::SuspendQueue {
                suspend: self.ordered_suspend,
            },
        }
    }

    /// Retry while `reconsume_count` is within the allowed attempts, accept
    /// (and give up on the message) afterwards
    pub fn decide(&self, reconsume_count: u32) -> ConsumeStatus {
        if reconsume_count <= self.max_reconsume_attempts {
            self.retry_status()
        } else {
            ConsumeStatus::Accepted
        }
    }
}

/// Consume counters of a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    pub consumed: u64,
    pub failed: u64,
    pub retried: u64,
    /// Failures accepted after exhausting the reconsume attempts
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct ConsumeCounters {
    consumed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    discarded: AtomicU64,
}

impl ConsumeCounters {
    fn snapshot(&self) -> ContainerStats {
        ContainerStats {
            consumed: self.consumed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ContainerState,
    payload_kind: Option<PayloadKind>,
}

/// Supervises one subscription: validates configuration, wires the dispatch
/// callback into the push consumer and drives the start/stop lifecycle.
pub struct ListenerContainer {
    config: ListenerConfig,
    consumer: Arc<dyn PushConsumer>,
    lifecycle: Mutex<Lifecycle>,
    accepting: Arc<AtomicBool>,
    counters: Arc<ConsumeCounters>,
}

impl ListenerContainer {
    pub fn new(config: ListenerConfig, consumer: Arc<dyn PushConsumer>) -> Self {
        Self {
            config,
            consumer,
            lifecycle: Mutex::new(Lifecycle {
                state: ContainerState::Created,
                payload_kind: None,
            }),
            accepting: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(ConsumeCounters::default()),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub async fn state(&self) -> ContainerState {
        self.lifecycle.lock().await.state
    }

    /// Payload kind resolved at start, `None` before a successful start
    pub async fn payload_kind(&self) -> Option<PayloadKind> {
        self.lifecycle.lock().await.payload_kind
    }

    pub fn stats(&self) -> ContainerStats {
        self.counters.snapshot()
    }

    /// Start consuming with `listener`.
    ///
    /// Fails with a lifecycle error when the container was already started
    /// and with a configuration error when the group, name server or topic
    /// is missing. A failed start leaves the container startable.
    pub async fn start<T, L>(&self, listener: L) -> Result<()>
    where
        T: ListenerPayload,
        L: MessageListener<T>,
    {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != ContainerState::Created {
            return Err(RocketMeshError::lifecycle_error(format!(
                "listener container for group {} on topic {} is already {:?}",
                self.config.consumer_group(),
                self.config.topic(),
                lifecycle.state
            )));
        }

        self.validate()?;
        let payload_type = T::payload_type();
        let codec = PayloadCodec::new(self.config.charset()).map_err(|err| {
            RocketMeshError::config_error(format!(
                "listener for group {}: {}",
                self.config.consumer_group(),
                err
            ))
        })?;

        let dispatcher = ListenerDispatcher {
            group: self.config.consumer_group().to_string(),
            listener,
            payload_type,
            codec,
            policy: RetryPolicy::from_config(&self.config),
            accepting: self.accepting.clone(),
            counters: self.counters.clone(),
        };

        self.consumer.configure(self.config.consumer_settings()).await?;
        self.consumer
            .subscribe(self.config.topic(), self.config.selector_expression())
            .await?;
        self.consumer.register_dispatch(Arc::new(dispatcher)).await?;

        self.accepting.store(true, Ordering::Release);
        if let Err(err) = self.consumer.start().await {
            self.accepting.store(false, Ordering::Release);
            error!(
                "❌ Failed to start subscription {} for group {}: {}",
                self.config.topic(),
                self.config.consumer_group(),
                err
            );
            return Err(err.into());
        }

        lifecycle.state = ContainerState::Started;
        lifecycle.payload_kind = Some(payload_type.kind());
        info!(
            "✅ Subscription started: group={} topic={} selector={} mode={:?} payload={} pool={}..{}",
            self.config.consumer_group(),
            self.config.topic(),
            self.config.selector_expression(),
            self.config.consume_mode(),
            payload_type.kind(),
            self.config.thread_pool_min(),
            self.config.thread_pool_max()
        );
        Ok(())
    }

    /// Stop consuming. Dispatches already running finish; new deliveries are
    /// handed back to the broker. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            ContainerState::Created => Err(RocketMeshError::lifecycle_error(format!(
                "listener container for group {} was never started",
                self.config.consumer_group()
            ))),
            ContainerState::Stopped => Ok(()),
            ContainerState::Started => {
                self.accepting.store(false, Ordering::Release);
                let result = self.consumer.shutdown().await;
                lifecycle.state = ContainerState::Stopped;
                info!(
                    "🛑 Subscription stopped: group={} topic={}",
                    self.config.consumer_group(),
                    self.config.topic()
                );
                result.map_err(RocketMeshError::from)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.config.consumer_group().trim().is_empty() {
            return Err(RocketMeshError::config_error(format!(
                "consumer group is required for the listener on topic '{}'",
                self.config.topic()
            )));
        }
        if self.config.name_server().trim().is_empty() {
            return Err(RocketMeshError::config_error(format!(
                "name server address is required for consumer group {}",
                self.config.consumer_group()
            )));
        }
        parse_name_servers(self.config.name_server())?;
        if self.config.topic().trim().is_empty() {
            return Err(RocketMeshError::config_error(format!(
                "topic is required for consumer group {}",
                self.config.consumer_group()
            )));
        }
        Ok(())
    }
}

struct ListenerDispatcher<T, L> {
    group: String,
    listener: L,
    payload_type: PayloadType<T>,
    codec: PayloadCodec,
    policy: RetryPolicy,
    accepting: Arc<AtomicBool>,
    counters: Arc<ConsumeCounters>,
}

impl<T, L> ListenerDispatcher<T, L>
where
    T: ListenerPayload,
    L: MessageListener<T>,
{
    async fn consume(&self, envelope: &ConsumedEnvelope) -> anyhow::Result<()> {
        let payload = self.payload_type.decode(&self.codec, envelope)?;
        match AssertUnwindSafe(self.listener.on_message(payload)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(anyhow!("listener panicked: {}", panic_message(&*panic))),
        }
    }
}

#[async_trait]
impl<T, L> DispatchCallback for ListenerDispatcher<T, L>
where
    T: ListenerPayload,
    L: MessageListener<T>,
{
    async fn dispatch(&self, batch: Vec<ConsumedEnvelope>) -> ConsumeStatus {
        if !self.accepting.load(Ordering::Acquire) {
            debug!(
                "Group {} is stopping, handing {} message(s) back to the broker",
                self.group,
                batch.len()
            );
            return self.policy.retry_status();
        }

        for envelope in &batch {
            let started = Instant::now();
            let result = self.consume(envelope).await;
            let cost_ms = started.elapsed().as_millis() as u64;

            let source = match result {
                Ok(()) => {
                    self.counters.consumed.fetch_add(1, Ordering::Relaxed);
                    info!(
                        message_id = %envelope.message_id,
                        listener = self.listener.name(),
                        cost_ms,
                        "consumed message"
                    );
                    continue;
                }
                Err(source) => source,
            };

            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            let failure = RocketMeshError::Consume {
                message_id: envelope.message_id.clone(),
                reconsume_count: envelope.reconsume_count,
                source,
            };
            let status = self.policy.decide(envelope.reconsume_count);
            if status.is_accepted() {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                error!(
                    message_id = %envelope.message_id,
                    reconsume_count = envelope.reconsume_count,
                    cost_ms,
                    "giving up on message: {:#}",
                    failure
                );
            } else {
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                error!(
                    message_id = %envelope.message_id,
                    reconsume_count = envelope.reconsume_count,
                    cost_ms,
                    ?status,
                    "consume failed: {:#}",
                    failure
                );
            }
            return status;
        }

        ConsumeStatus::Accepted
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ConsumerSettings;
    use crate::codec::Json;
    use crate::error::BrokerError;
    use crate::message::{Message, MessageQueue};
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeConsumer {
        settings: StdMutex<Option<ConsumerSettings>>,
        subscription: StdMutex<Option<(String, String)>>,
        callback: StdMutex<Option<Arc<dyn DispatchCallback>>>,
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
        fail_start: AtomicBool,
    }

    impl FakeConsumer {
        fn callback(&self) -> Arc<dyn DispatchCallback> {
            self.callback.lock().unwrap().clone().expect("dispatch callback registered")
        }
    }

    #[async_trait]
    impl PushConsumer for FakeConsumer {
        async fn configure(&self, settings: ConsumerSettings) -> std::result::Result<(), BrokerError> {
            *self.settings.lock().unwrap() = Some(settings);
            Ok(())
        }

        async fn subscribe(&self, topic: &str, expression: &str) -> std::result::Result<(), BrokerError> {
            *self.subscription.lock().unwrap() = Some((topic.to_string(), expression.to_string()));
            Ok(())
        }

        async fn register_dispatch(&self, callback: Arc<dyn DispatchCallback>) -> std::result::Result<(), BrokerError> {
            *self.callback.lock().unwrap() = Some(callback);
            Ok(())
        }

        async fn start(&self) -> std::result::Result<(), BrokerError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(BrokerError::Unavailable("name server unreachable".to_string()));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> std::result::Result<(), BrokerError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct TextListener {
        seen: Arc<StdMutex<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl MessageListener<String> for TextListener {
        async fn on_message(&self, message: String) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(message.clone());
            if self.fail_on == Some(message.as_str()) {
                anyhow::bail!("cannot process {}", message);
            }
            Ok(())
        }
    }

    fn config() -> crate::config::ListenerConfigBuilder {
        ListenerConfig::builder("orders-group", "orders").name_server("127.0.0.1:9876")
    }

    fn envelope(body: &str, reconsume_count: u32) -> ConsumedEnvelope {
        let message = Message::new("orders", "created", body.to_string(), None).unwrap();
        let mut envelope =
            ConsumedEnvelope::from_message(&message, format!("id-{body}"), MessageQueue::new("orders", "broker-a", 0), 0);
        envelope.reconsume_count = reconsume_count;
        envelope
    }

    async fn started(config: ListenerConfig, listener: TextListener) -> (ListenerContainer, Arc<FakeConsumer>) {
        let consumer = Arc::new(FakeConsumer::default());
        let container = ListenerContainer::new(config, consumer.clone());
        container.start(listener).await.unwrap();
        (container, consumer)
    }

    #[tokio::test]
    async fn test_start_configures_consumer() {
        let config = config()
            .selector_expression("created || paid")
            .thread_pool_min(100)
            .thread_pool_max(64)
            .build();
        let (container, consumer) = started(config, TextListener::default()).await;

        assert_eq!(container.state().await, ContainerState::Started);
        assert_eq!(container.payload_kind().await, Some(PayloadKind::Text));
        let settings = consumer.settings.lock().unwrap().clone().unwrap();
        assert_eq!(settings.thread_pool_min, 64);
        assert_eq!(settings.thread_pool_max, 64);
        assert_eq!(settings.consumer_group, "orders-group");
        assert_eq!(
            consumer.subscription.lock().unwrap().clone(),
            Some(("orders".to_string(), "created || paid".to_string()))
        );
        assert_eq!(consumer.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (container, consumer) = started(config().build(), TextListener::default()).await;

        let err = container.start(TextListener::default()).await.unwrap_err();
        assert!(matches!(err, RocketMeshError::Lifecycle(_)));
        assert_eq!(consumer.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_configuration() {
        let cases = [
            ListenerConfig::builder("", "orders").name_server("127.0.0.1:9876").build(),
            ListenerConfig::builder("orders-group", "orders").build(),
            ListenerConfig::builder("orders-group", "").name_server("127.0.0.1:9876").build(),
            ListenerConfig::builder("orders-group", "orders").name_server("no-port").build(),
            config().charset("GBK").build(),
        ];

        for config in cases {
            let consumer = Arc::new(FakeConsumer::default());
            let container = ListenerContainer::new(config, consumer.clone());
            let err = container.start(TextListener::default()).await.unwrap_err();
            assert!(matches!(err, RocketMeshError::Configuration(_)), "unexpected {err:?}");
            assert!(consumer.settings.lock().unwrap().is_none());
            assert_eq!(container.state().await, ContainerState::Created);
        }
    }

    #[tokio::test]
    async fn test_failed_start_can_be_retried() {
        let consumer = Arc::new(FakeConsumer::default());
        consumer.fail_start.store(true, Ordering::SeqCst);
        let container = ListenerContainer::new(config().build(), consumer.clone());

        let err = container.start(TextListener::default()).await.unwrap_err();
        assert!(matches!(err, RocketMeshError::Broker(_)));
        assert_eq!(container.state().await, ContainerState::Created);

        consumer.fail_start.store(false, Ordering::SeqCst);
        container.start(TextListener::default()).await.unwrap();
        assert_eq!(container.state().await, ContainerState::Started);
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let listener = TextListener {
            fail_on: Some("B"),
            ..Default::default()
        };
        let seen = listener.seen.clone();
        let (container, consumer) = started(config().batch_max_size(3).build(), listener).await;

        let status = consumer
            .callback()
            .dispatch(vec![envelope("A", 0), envelope("B", 0), envelope("C", 0)])
            .await;

        assert_eq!(status, ConsumeStatus::RetryLater { delay_level: 0 });
        assert_eq!(*seen.lock().unwrap(), vec!["A".to_string(), "B".to_string()]);
        let stats = container.stats();
        assert_eq!(stats.consumed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 1);
    }

    #[tokio::test]
    async fn test_retry_until_attempts_exhausted() {
        let listener = TextListener {
            fail_on: Some("A"),
            ..Default::default()
        };
        let (container, consumer) = started(config().build(), listener).await;
        let callback = consumer.callback();

        assert_eq!(
            callback.dispatch(vec![envelope("A", 3)]).await,
            ConsumeStatus::RetryLater { delay_level: 0 }
        );
        assert_eq!(callback.dispatch(vec![envelope("A", 4)]).await, ConsumeStatus::Accepted);
        assert_eq!(container.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_delay_level_is_forwarded() {
        let listener = TextListener {
            fail_on: Some("A"),
            ..Default::default()
        };
        let (_container, consumer) = started(config().next_attempt_delay_level(-1).build(), listener).await;

        assert_eq!(
            consumer.callback().dispatch(vec![envelope("A", 0)]).await,
            ConsumeStatus::RetryLater { delay_level: -1 }
        );
    }

    #[tokio::test]
    async fn test_ordered_failure_suspends_queue() {
        let listener = TextListener {
            fail_on: Some("A"),
            ..Default::default()
        };
        let config = config().consume_mode(ConsumeMode::Ordered).build();
        let (_container, consumer) = started(config, listener).await;
        let callback = consumer.callback();

        assert_eq!(
            callback.dispatch(vec![envelope("A", 0)]).await,
            ConsumeStatus::SuspendQueue {
                suspend: Duration::from_millis(1000)
            }
        );
        assert_eq!(callback.dispatch(vec![envelope("A", 4)]).await, ConsumeStatus::Accepted);
        assert_eq!(callback.dispatch(vec![envelope("B", 0)]).await, ConsumeStatus::Accepted);
    }

    #[tokio::test]
    async fn test_envelope_listener_receives_full_envelope() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recorded = seen.clone();
        let listener = FunctionListener::new("audit", move |envelope: ConsumedEnvelope| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(envelope);
                Ok::<(), anyhow::Error>(())
            }
        });

        let consumer = Arc::new(FakeConsumer::default());
        let container = ListenerContainer::new(config().build(), consumer.clone());
        container.start::<ConsumedEnvelope, _>(listener).await.unwrap();
        assert_eq!(container.payload_kind().await, Some(PayloadKind::Envelope));

        let delivered = envelope("raw", 2);
        let status = consumer.callback().dispatch(vec![delivered.clone()]).await;
        assert_eq!(status, ConsumeStatus::Accepted);
        assert_eq!(*seen.lock().unwrap(), vec![delivered]);
    }

    #[tokio::test]
    async fn test_structured_payload_and_decode_failure() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Shipment {
            id: u32,
        }

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recorded = seen.clone();
        let listener = FunctionListener::new("shipments", move |shipment: Json<Shipment>| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().unwrap().push(shipment.into_inner());
                Ok::<(), anyhow::Error>(())
            }
        });

        let consumer = Arc::new(FakeConsumer::default());
        let container = ListenerContainer::new(config().build(), consumer.clone());
        container.start::<Json<Shipment>, _>(listener).await.unwrap();
        let callback = consumer.callback();

        let mut good = envelope("x", 0);
        good.body = Bytes::from_static(br#"{"id":7}"#);
        assert_eq!(callback.dispatch(vec![good]).await, ConsumeStatus::Accepted);
        assert_eq!(*seen.lock().unwrap(), vec![Shipment { id: 7 }]);

        let status = callback.dispatch(vec![envelope("not json", 0)]).await;
        assert_eq!(status, ConsumeStatus::RetryLater { delay_level: 0 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_panic_is_a_failure() {
        let listener = FunctionListener::new("panicky", |_message: String| async move {
            if true {
                panic!("listener bug");
            }
            Ok::<(), anyhow::Error>(())
        });

        let consumer = Arc::new(FakeConsumer::default());
        let container = ListenerContainer::new(config().build(), consumer.clone());
        container.start::<String, _>(listener).await.unwrap();

        let status = consumer.callback().dispatch(vec![envelope("A", 0)]).await;
        assert_eq!(status, ConsumeStatus::RetryLater { delay_level: 0 });
        assert_eq!(container.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_stop_lifecycle() {
        let listener = TextListener::default();
        let seen = listener.seen.clone();

        let consumer = Arc::new(FakeConsumer::default());
        let container = ListenerContainer::new(config().build(), consumer.clone());
        assert!(matches!(container.stop().await, Err(RocketMeshError::Lifecycle(_))));

        container.start(listener).await.unwrap();
        let callback = consumer.callback();
        container.stop().await.unwrap();
        container.stop().await.unwrap();

        assert_eq!(container.state().await, ContainerState::Stopped);
        assert_eq!(consumer.shutdowns.load(Ordering::SeqCst), 1);

        let status = callback.dispatch(vec![envelope("late", 0)]).await;
        assert_eq!(status, ConsumeStatus::RetryLater { delay_level: 0 });
        assert!(seen.lock().unwrap().is_empty());

        let err = container.start(TextListener::default()).await.unwrap_err();
        assert!(matches!(err, RocketMeshError::Lifecycle(_)));
    }

    #[test]
    fn test_retry_policy_boundaries() {
        let policy = RetryPolicy::from_config(&config().max_reconsume_attempts(0).build());
        assert_eq!(policy.decide(0), ConsumeStatus::RetryLater { delay_level: 0 });
        assert_eq!(policy.decide(1), ConsumeStatus::Accepted);
    }
}
