//! Messaging template: the publish API on top of a shared [`Producer`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::broker::{Producer, SendCallback};
use crate::codec::{OutboundPayload, PayloadCodec};
use crate::config::ProducerConfig;
use crate::error::{BrokerError, RocketMeshError, Result};
use crate::message::{DeliveryHeader, Message, SendOutcome};
use crate::selector::{QueueSelector, SelectByHash};

/// Per-call send options
#[derive(Clone, Default)]
pub struct SendOptions {
    header: Option<DeliveryHeader>,
    timeout: Option<Duration>,
    selector: Option<Arc<dyn QueueSelector>>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, header: DeliveryHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Override the producer's configured send timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Queue selector for ordered sends; ignored by unordered sends
    pub fn with_selector(mut self, selector: impl QueueSelector + 'static) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("header", &self.header)
            .field("timeout", &self.timeout)
            .field("custom_selector", &self.selector.is_some())
            .finish()
    }
}

/// Send counters of a template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateStats {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct SendCounters {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Converts payloads into broker messages and sends them through one shared
/// producer handle.
///
/// Every send validates its arguments before touching the broker: an empty
/// topic, an empty encoded body or (for ordered sends) an empty key fail with
/// [`RocketMeshError::Argument`]. Broker failures come back as
/// [`RocketMeshError::Messaging`] and are never retried here.
pub struct MessagingTemplate {
    config: ProducerConfig,
    producer: Arc<dyn Producer>,
    codec: PayloadCodec,
    default_selector: Arc<dyn QueueSelector>,
    running: AtomicBool,
    lifecycle: Mutex<()>,
    counters: Arc<SendCounters>,
}

impl MessagingTemplate {
    pub fn new(config: ProducerConfig, producer: Arc<dyn Producer>) -> Result<Self> {
        config.validate()?;
        let codec = PayloadCodec::new(&config.charset)
            .map_err(|err| RocketMeshError::config_error(format!("producer {}: {}", config.group, err)))?;
        Ok(Self {
            config,
            producer,
            codec,
            default_selector: Arc::new(SelectByHash),
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            counters: Arc::new(SendCounters::default()),
        })
    }

    /// Replace the hash selector used by ordered sends without an explicit one
    pub fn with_default_selector(mut self, selector: impl QueueSelector + 'static) -> Self {
        self.default_selector = Arc::new(selector);
        self
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TemplateStats {
        TemplateStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Start the shared producer
    pub async fn start(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            return Err(RocketMeshError::lifecycle_error(format!(
                "producer {} is already started",
                self.config.group
            )));
        }
        self.producer.start(self.config.clone()).await?;
        self.running.store(true, Ordering::Release);
        info!(
            "🚀 Producer {} started (name server {})",
            self.config.group, self.config.name_server
        );
        Ok(())
    }

    /// Stop the shared producer. Stopping a stopped template is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_running() {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);
        self.producer.shutdown().await?;
        info!("🛑 Producer {} stopped", self.config.group);
        Ok(())
    }

    /// Send and wait for the broker's acknowledgement
    pub async fn send<P>(&self, topic: &str, tag: &str, payload: &P) -> Result<SendOutcome>
    where
        P: OutboundPayload + ?Sized,
    {
        self.send_with(topic, tag, payload, SendOptions::default()).await
    }

    pub async fn send_with<P>(&self, topic: &str, tag: &str, payload: &P, options: SendOptions) -> Result<SendOutcome>
    where
        P: OutboundPayload + ?Sized,
    {
        let message = self.prepare(topic, tag, payload, options.header.as_ref())?;
        self.ensure_running()?;

        let started = Instant::now();
        match self.producer.send(message, self.timeout(&options)).await {
            Ok(outcome) => Ok(self.record_sent(topic, tag, outcome, started)),
            Err(err) => Err(self.record_failed(topic, tag, err)),
        }
    }

    /// Send to the queue chosen for `key`, so messages with equal keys are
    /// consumed in the order they were sent
    pub async fn send_ordered<P>(&self, topic: &str, tag: &str, payload: &P, key: &str) -> Result<SendOutcome>
    where
        P: OutboundPayload + ?Sized,
    {
        self.send_ordered_with(topic, tag, payload, key, SendOptions::default())
            .await
    }

    pub async fn send_ordered_with<P>(
        &self,
        topic: &str,
        tag: &str,
        payload: &P,
        key: &str,
        options: SendOptions,
    ) -> Result<SendOutcome>
    where
        P: OutboundPayload + ?Sized,
    {
        let message = self.prepare(topic, tag, payload, options.header.as_ref())?;
        require_key(topic, key)?;
        self.ensure_running()?;

        let selector = self.selector(&options);
        let started = Instant::now();
        match self
            .producer
            .send_selected(message, selector, key, self.timeout(&options))
            .await
        {
            Ok(outcome) => Ok(self.record_sent(topic, tag, outcome, started)),
            Err(err) => Err(self.record_failed(topic, tag, err)),
        }
    }

    /// Dispatch without waiting. `callback` receives the outcome on a broker
    /// task and must not block. An `Err` here means nothing was dispatched
    /// and the callback will not run.
    pub fn send_async<P, C>(&self, topic: &str, tag: &str, payload: &P, options: SendOptions, callback: C) -> Result<()>
    where
        P: OutboundPayload + ?Sized,
        C: FnOnce(Result<SendOutcome>) + Send + 'static,
    {
        let message = self.prepare(topic, tag, payload, options.header.as_ref())?;
        self.ensure_running()?;

        let completion = self.completion(topic, tag, callback);
        self.producer
            .send_with_callback(message, completion, self.timeout(&options))
            .map_err(|err| self.record_failed(topic, tag, err))
    }

    pub fn send_ordered_async<P, C>(
        &self,
        topic: &str,
        tag: &str,
        payload: &P,
        key: &str,
        options: SendOptions,
        callback: C,
    ) -> Result<()>
    where
        P: OutboundPayload + ?Sized,
        C: FnOnce(Result<SendOutcome>) + Send + 'static,
    {
        let message = self.prepare(topic, tag, payload, options.header.as_ref())?;
        require_key(topic, key)?;
        self.ensure_running()?;

        let selector = self.selector(&options);
        let completion = self.completion(topic, tag, callback);
        self.producer
            .send_selected_with_callback(message, selector, key.to_string(), completion, self.timeout(&options))
            .map_err(|err| self.record_failed(topic, tag, err))
    }

    /// Fire and forget: no acknowledgement and no retry
    pub async fn send_one_way<P>(&self, topic: &str, tag: &str, payload: &P) -> Result<()>
    where
        P: OutboundPayload + ?Sized,
    {
        let message = self.prepare(topic, tag, payload, None)?;
        self.ensure_running()?;

        match self.producer.send_one_way(message).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(topic, tag, "sent one-way message");
                Ok(())
            }
            Err(err) => Err(self.record_failed(topic, tag, err)),
        }
    }

    fn prepare<P>(&self, topic: &str, tag: &str, payload: &P, header: Option<&DeliveryHeader>) -> Result<Message>
    where
        P: OutboundPayload + ?Sized,
    {
        if topic.trim().is_empty() {
            return Err(RocketMeshError::argument_error("topic must not be empty"));
        }
        let body = payload.encode(&self.codec)?;
        if body.is_empty() {
            return Err(RocketMeshError::argument_error(format!(
                "payload for topic '{}' must not be empty",
                topic
            )));
        }
        Message::new(topic, tag, body, header)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RocketMeshError::lifecycle_error(format!(
                "producer {} is not started",
                self.config.group
            )))
        }
    }

    fn timeout(&self, options: &SendOptions) -> Duration {
        options.timeout.unwrap_or_else(|| self.config.send_timeout())
    }

    fn selector(&self, options: &SendOptions) -> Arc<dyn QueueSelector> {
        options
            .selector
            .clone()
            .unwrap_or_else(|| self.default_selector.clone())
    }

    fn completion<C>(&self, topic: &str, tag: &str, callback: C) -> SendCallback
    where
        C: FnOnce(Result<SendOutcome>) + Send + 'static,
    {
        let topic = topic.to_string();
        let tag = tag.to_string();
        let counters = self.counters.clone();
        let started = Instant::now();
        Box::new(move |result: std::result::Result<SendOutcome, BrokerError>| {
            let result = match result {
                Ok(outcome) => {
                    counters.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        topic = %topic,
                        tag = %tag,
                        message_id = %outcome.message_id,
                        cost_ms = started.elapsed().as_millis() as u64,
                        "sent message asynchronously"
                    );
                    Ok(outcome)
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(topic = %topic, tag = %tag, "async send failed: {}", err);
                    Err(RocketMeshError::messaging_error(topic, tag, err))
                }
            };
            callback(result);
        })
    }

    fn record_sent(&self, topic: &str, tag: &str, outcome: SendOutcome, started: Instant) -> SendOutcome {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            topic,
            tag,
            message_id = %outcome.message_id,
            queue = %outcome.queue,
            cost_ms = started.elapsed().as_millis() as u64,
            "sent message"
        );
        outcome
    }

    fn record_failed(&self, topic: &str, tag: &str, err: BrokerError) -> RocketMeshError {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        error!(topic, tag, "send failed: {}", err);
        RocketMeshError::messaging_error(topic, tag, err)
    }
}

fn require_key(topic: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(RocketMeshError::argument_error(format!(
            "ordered send to topic '{}' requires a non-empty key",
            topic
        )));
    }
    Ok(())
}
