//! Process-local broker client.
//!
//! `InMemoryBroker` keeps topics as append-only queue logs and implements both
//! halves of the broker capability on top of them. It is meant for tests,
//! demos and local development: nothing is persisted and there is no
//! rebalancing, consumers of a clustering group simply share one cursor per
//! queue.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{ConsumeStatus, ConsumerSettings, DispatchCallback, Producer, PushConsumer, SendCallback};
use crate::config::{ConsumeFromWhere, ConsumeMode, MessageModel, ProducerConfig};
use crate::error::BrokerError;
use crate::message::{ConsumedEnvelope, Message, MessageQueue, SendOutcome, SendStatus};
use crate::selector::QueueSelector;

type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Redeliveries after which a message is moved to the dead-letter list
pub const MAX_RECONSUME_TIMES: u32 = 16;

/// Delays for client-chosen delay levels 1..=18
const DELAY_LEVELS: [Duration; 18] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
    Duration::from_secs(60),
    Duration::from_secs(2 * 60),
    Duration::from_secs(3 * 60),
    Duration::from_secs(4 * 60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(6 * 60),
    Duration::from_secs(7 * 60),
    Duration::from_secs(8 * 60),
    Duration::from_secs(9 * 60),
    Duration::from_secs(10 * 60),
    Duration::from_secs(20 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
    Duration::from_secs(2 * 60 * 60),
];

/// Builder for [`InMemoryBroker`]
#[derive(Debug, Clone)]
pub struct InMemoryBrokerBuilder {
    broker_name: String,
    queue_count: u32,
    retry_delay: Duration,
}

impl Default for InMemoryBrokerBuilder {
    fn default() -> Self {
        Self {
            broker_name: "broker-a".to_string(),
            queue_count: 4,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl InMemoryBrokerBuilder {
    pub fn broker_name(mut self, name: impl Into<String>) -> Self {
        self.broker_name = name.into();
        self
    }

    /// Queues created for topics that are not created explicitly
    pub fn queue_count(mut self, count: u32) -> Self {
        self.queue_count = count.max(1);
        self
    }

    /// Redelivery delay when the consumer leaves the delay to the broker
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn build(self) -> InMemoryBroker {
        InMemoryBroker {
            state: Arc::new(BrokerState {
                name: self.broker_name,
                queue_count: self.queue_count,
                retry_delay: self.retry_delay,
                topics: RwLock::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
                dead_letters: Mutex::new(HashMap::new()),
                parked_retries: Mutex::new(HashMap::new()),
                send_failures: AtomicU32::new(0),
            }),
        }
    }
}

/// Shared handle to an in-memory broker
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Create `topic` with `queue_count` queues. Existing topics are left as is.
    pub async fn create_topic(&self, topic: &str, queue_count: u32) -> Vec<MessageQueue> {
        let mut topics = self.state.topics.write().await;
        let log = topics
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(&self.state.name, topic, queue_count.max(1))));
        log.queue_ids()
    }

    pub fn producer(&self) -> InMemoryProducer {
        InMemoryProducer {
            core: Arc::new(ProducerCore {
                broker: self.state.clone(),
                config: StdRwLock::new(None),
                next_queue: AtomicUsize::new(0),
            }),
        }
    }

    pub fn push_consumer(&self) -> InMemoryPushConsumer {
        InMemoryPushConsumer {
            broker: self.state.clone(),
            instance_id: Uuid::new_v4().to_string(),
            state: Mutex::new(ConsumerState::default()),
        }
    }

    /// Queues of `topic`, empty when the topic does not exist
    pub async fn topic_queues(&self, topic: &str) -> Vec<MessageQueue> {
        match self.state.topics.read().await.get(topic) {
            Some(log) => log.queue_ids(),
            None => Vec::new(),
        }
    }

    /// Every message stored for `topic`, queue by queue in offset order
    pub async fn stored_messages(&self, topic: &str) -> Vec<ConsumedEnvelope> {
        let log = match self.state.topics.read().await.get(topic) {
            Some(log) => log.clone(),
            None => return Vec::new(),
        };
        let mut messages = Vec::new();
        for queue in &log.queues {
            messages.extend(queue.entries.lock().await.iter().cloned());
        }
        messages
    }

    /// Messages that exhausted their redeliveries for `consumer_group`
    pub async fn dead_letters(&self, consumer_group: &str) -> Vec<ConsumedEnvelope> {
        self.state
            .dead_letters
            .lock()
            .await
            .get(consumer_group)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next `count` store attempts fail as if the broker were down
    pub fn inject_send_failures(&self, count: u32) {
        self.state.send_failures.store(count, Ordering::SeqCst);
    }
}

type CursorKey = (String, String, u32);

struct BrokerState {
    name: String,
    queue_count: u32,
    retry_delay: Duration,
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    cursors: Mutex<HashMap<CursorKey, Arc<Mutex<u64>>>>,
    dead_letters: Mutex<HashMap<String, Vec<ConsumedEnvelope>>>,
    /// Redeliveries a stopped consumer left behind, keyed by cursor owner
    parked_retries: Mutex<HashMap<String, Vec<RetryRequest>>>,
    send_failures: AtomicU32,
}

impl BrokerState {
    async fn topic(&self, topic: &str) -> Arc<TopicLog> {
        if let Some(log) = self.topics.read().await.get(topic) {
            return log.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!("Auto-creating topic {} with {} queues", topic, self.queue_count);
                Arc::new(TopicLog::new(&self.name, topic, self.queue_count))
            })
            .clone()
    }

    async fn cursor(&self, owner: &str, queue: &QueueLog, from: ConsumeFromWhere) -> Arc<Mutex<u64>> {
        let initial = match from {
            ConsumeFromWhere::FirstOffset => 0,
            ConsumeFromWhere::LastOffset => queue.end_offset().await,
        };
        let key = (owner.to_string(), queue.queue.topic.clone(), queue.queue.queue_id);
        self.cursors
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(initial)))
            .clone()
    }

    async fn dead_letter(&self, consumer_group: &str, envelopes: Vec<ConsumedEnvelope>) {
        for envelope in &envelopes {
            warn!(
                "Moving message {} to the dead-letter list of {} after {} redeliveries",
                envelope.message_id, consumer_group, envelope.reconsume_count
            );
        }
        self.dead_letters
            .lock()
            .await
            .entry(consumer_group.to_string())
            .or_default()
            .extend(envelopes);
    }

    async fn park_retry(&self, owner: &str, request: RetryRequest) {
        debug!(
            "Parking redelivery of {} message(s) for {} until the next start",
            request.batch.len(),
            owner
        );
        self.parked_retries
            .lock()
            .await
            .entry(owner.to_string())
            .or_default()
            .push(request);
    }

    async fn take_parked_retries(&self, owner: &str) -> Vec<RetryRequest> {
        self.parked_retries
            .lock()
            .await
            .remove(owner)
            .unwrap_or_default()
    }

    fn take_send_failure(&self) -> bool {
        self.send_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok()
    }
}

struct TopicLog {
    queues: Vec<Arc<QueueLog>>,
}

impl TopicLog {
    fn new(broker_name: &str, topic: &str, queue_count: u32) -> Self {
        let queues = (0..queue_count)
            .map(|queue_id| Arc::new(QueueLog::new(MessageQueue::new(topic, broker_name, queue_id))))
            .collect();
        Self { queues }
    }

    fn queue_ids(&self) -> Vec<MessageQueue> {
        self.queues.iter().map(|queue| queue.queue.clone()).collect()
    }
}

struct QueueLog {
    queue: MessageQueue,
    entries: Mutex<Vec<ConsumedEnvelope>>,
    appended: watch::Sender<u64>,
}

impl QueueLog {
    fn new(queue: MessageQueue) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            queue,
            entries: Mutex::new(Vec::new()),
            appended,
        }
    }

    async fn end_offset(&self) -> u64 {
        self.entries.lock().await.len() as u64
    }

    async fn append(&self, message: &Message) -> (String, u64) {
        let message_id = Uuid::new_v4().simple().to_string().to_uppercase();
        let mut entries = self.entries.lock().await;
        let offset = entries.len() as u64;
        entries.push(ConsumedEnvelope::from_message(message, message_id.clone(), self.queue.clone(), offset));
        drop(entries);

        self.appended.send_replace(offset + 1);
        (message_id, offset)
    }

    /// Up to `max` matching messages from `from`, plus the offset after the
    /// last message examined
    async fn read_batch(&self, from: u64, max: usize, filter: &TagFilter) -> (Vec<ConsumedEnvelope>, u64) {
        let entries = self.entries.lock().await;
        let mut batch = Vec::new();
        let mut next = from;
        for envelope in entries.iter().skip(from as usize) {
            next = envelope.queue_offset + 1;
            if filter.matches(&envelope.tag) {
                batch.push(envelope.clone());
                if batch.len() >= max {
                    break;
                }
            }
        }
        (batch, next)
    }
}

/// Tag filter built from a selector expression (`*` or `TagA || TagB`)
#[derive(Debug, Clone, PartialEq, Eq)]
enum TagFilter {
    All,
    Tags(HashSet<String>),
}

impl TagFilter {
    fn parse(expression: &str) -> Self {
        let expression = expression.trim();
        if expression.is_empty() || expression == "*" {
            return Self::All;
        }
        let tags = expression
            .split("||")
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();
        Self::Tags(tags)
    }

    fn matches(&self, tag: &str) -> bool {
        match self {
            Self::All => true,
            Self::Tags(tags) => tags.contains(tag),
        }
    }
}

enum Route {
    RoundRobin,
    Selected { selector: Arc<dyn QueueSelector>, key: String },
}

/// Producer half of [`InMemoryBroker`]
#[derive(Clone)]
pub struct InMemoryProducer {
    core: Arc<ProducerCore>,
}

struct ProducerCore {
    broker: Arc<BrokerState>,
    config: StdRwLock<Option<ProducerConfig>>,
    next_queue: AtomicUsize,
}

impl ProducerCore {
    fn running_config(&self) -> BrokerResult<ProducerConfig> {
        let config = self
            .config
            .read()
            .map_err(|_| BrokerError::InvalidState("producer state lock poisoned".to_string()))?;
        config.clone().ok_or(BrokerError::NotRunning)
    }

    async fn send_timed(
        &self,
        message: &Message,
        route: &Route,
        config: &ProducerConfig,
        retries: u32,
        timeout: Duration,
    ) -> BrokerResult<SendOutcome> {
        match tokio::time::timeout(timeout, self.send_with_retries(message, route, config, retries)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn send_with_retries(
        &self,
        message: &Message,
        route: &Route,
        config: &ProducerConfig,
        retries: u32,
    ) -> BrokerResult<SendOutcome> {
        let mut attempt = 0;
        loop {
            match self.store(message, route, config).await {
                Err(err) if err.is_recoverable() && attempt < retries => {
                    attempt += 1;
                    warn!("Send to {} failed ({}), retry {}/{}", message.topic(), err, attempt, retries);
                }
                result => return result,
            }
        }
    }

    async fn store(&self, message: &Message, route: &Route, config: &ProducerConfig) -> BrokerResult<SendOutcome> {
        let size = message.body().len();
        if size > config.max_message_size {
            return Err(BrokerError::MessageTooLarge {
                size,
                max: config.max_message_size,
            });
        }
        if self.broker.take_send_failure() {
            return Err(BrokerError::Unavailable(format!(
                "broker {} rejected the send",
                self.broker.name
            )));
        }

        let topic = self.broker.topic(message.topic()).await;
        let index = match route {
            Route::RoundRobin => self.next_queue.fetch_add(1, Ordering::Relaxed) % topic.queues.len(),
            Route::Selected { selector, key } => {
                let queues = topic.queue_ids();
                selector
                    .select(&queues, key)
                    .filter(|index| *index < queues.len())
                    .ok_or_else(|| BrokerError::NoQueueSelected {
                        topic: message.topic().to_string(),
                    })?
            }
        };

        let queue = &topic.queues[index];
        let (message_id, queue_offset) = queue.append(message).await;
        debug!("Stored message {} in {} at offset {}", message_id, queue.queue, queue_offset);

        Ok(SendOutcome {
            status: SendStatus::Ok,
            message_id,
            queue: queue.queue.clone(),
            queue_offset,
        })
    }

    fn spawn_send(
        core: &Arc<Self>,
        message: Message,
        route: Route,
        retries: u32,
        callback: SendCallback,
        timeout: Duration,
    ) -> BrokerResult<()> {
        let config = core.running_config()?;
        let handle = Handle::try_current()
            .map_err(|_| BrokerError::InvalidState("async send requires a tokio runtime".to_string()))?;
        let core = core.clone();
        handle.spawn(async move {
            let result = core.send_timed(&message, &route, &config, retries, timeout).await;
            callback(result);
        });
        Ok(())
    }
}

#[async_trait]
impl Producer for InMemoryProducer {
    async fn start(&self, config: ProducerConfig) -> BrokerResult<()> {
        config
            .validate()
            .map_err(|err| BrokerError::InvalidSetting(err.to_string()))?;
        let mut current = self
            .core
            .config
            .write()
            .map_err(|_| BrokerError::InvalidState("producer state lock poisoned".to_string()))?;
        if current.is_some() {
            return Err(BrokerError::InvalidState("producer already started".to_string()));
        }
        info!("In-memory producer {} started on {}", config.group, self.core.broker.name);
        *current = Some(config);
        Ok(())
    }

    async fn shutdown(&self) -> BrokerResult<()> {
        let mut current = self
            .core
            .config
            .write()
            .map_err(|_| BrokerError::InvalidState("producer state lock poisoned".to_string()))?;
        if let Some(config) = current.take() {
            info!("In-memory producer {} stopped", config.group);
        }
        Ok(())
    }

    async fn send(&self, message: Message, timeout: Duration) -> BrokerResult<SendOutcome> {
        let config = self.core.running_config()?;
        self.core
            .send_timed(&message, &Route::RoundRobin, &config, config.retry_times_when_send_failed, timeout)
            .await
    }

    async fn send_selected(
        &self,
        message: Message,
        selector: Arc<dyn QueueSelector>,
        key: &str,
        timeout: Duration,
    ) -> BrokerResult<SendOutcome> {
        let config = self.core.running_config()?;
        let route = Route::Selected {
            selector,
            key: key.to_string(),
        };
        self.core.send_timed(&message, &route, &config, 0, timeout).await
    }

    fn send_with_callback(&self, message: Message, callback: SendCallback, timeout: Duration) -> BrokerResult<()> {
        let retries = self.core.running_config()?.retry_times_when_send_async_failed;
        ProducerCore::spawn_send(&self.core, message, Route::RoundRobin, retries, callback, timeout)
    }

    fn send_selected_with_callback(
        &self,
        message: Message,
        selector: Arc<dyn QueueSelector>,
        key: String,
        callback: SendCallback,
        timeout: Duration,
    ) -> BrokerResult<()> {
        ProducerCore::spawn_send(&self.core, message, Route::Selected { selector, key }, 0, callback, timeout)
    }

    async fn send_one_way(&self, message: Message) -> BrokerResult<()> {
        let config = self.core.running_config()?;
        self.core.store(&message, &Route::RoundRobin, &config).await.map(|_| ())
    }
}

#[derive(Default)]
struct ConsumerState {
    settings: Option<ConsumerSettings>,
    subscription: Option<(String, String)>,
    callback: Option<Arc<dyn DispatchCallback>>,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Push-consumer half of [`InMemoryBroker`]
pub struct InMemoryPushConsumer {
    broker: Arc<BrokerState>,
    instance_id: String,
    state: Mutex<ConsumerState>,
}

#[async_trait]
impl PushConsumer for InMemoryPushConsumer {
    async fn configure(&self, settings: ConsumerSettings) -> BrokerResult<()> {
        if settings.thread_pool_max == 0 {
            return Err(BrokerError::InvalidSetting("thread_pool_max must be positive".to_string()));
        }
        let mut state = self.state.lock().await;
        if state.shutdown.is_some() {
            return Err(BrokerError::InvalidState("consumer already started".to_string()));
        }
        state.settings = Some(settings);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, selector_expression: &str) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        if state.shutdown.is_some() {
            return Err(BrokerError::InvalidState("consumer already started".to_string()));
        }
        state.subscription = Some((topic.to_string(), selector_expression.to_string()));
        Ok(())
    }

    async fn register_dispatch(&self, callback: Arc<dyn DispatchCallback>) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        if state.shutdown.is_some() {
            return Err(BrokerError::InvalidState("consumer already started".to_string()));
        }
        state.callback = Some(callback);
        Ok(())
    }

    async fn start(&self) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        if state.shutdown.is_some() {
            return Err(BrokerError::InvalidState("consumer already started".to_string()));
        }
        let settings = state
            .settings
            .clone()
            .ok_or_else(|| BrokerError::InvalidState("consumer is not configured".to_string()))?;
        let (topic, expression) = state
            .subscription
            .clone()
            .ok_or_else(|| BrokerError::InvalidState("consumer has no subscription".to_string()))?;
        let callback = state
            .callback
            .clone()
            .ok_or_else(|| BrokerError::InvalidState("consumer has no dispatch callback".to_string()))?;

        let log = self.broker.topic(&topic).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let cursor_owner = match settings.message_model {
            MessageModel::Clustering => settings.consumer_group.clone(),
            MessageModel::Broadcasting => format!("{}@{}", settings.consumer_group, self.instance_id),
        };

        for request in self.broker.take_parked_retries(&cursor_owner).await {
            let _ = retry_tx.send(request);
        }

        let context = Arc::new(DeliveryContext {
            broker: self.broker.clone(),
            group: settings.consumer_group.clone(),
            owner: cursor_owner.clone(),
            mode: settings.consume_mode,
            batch_max_size: settings.batch_max_size.max(1),
            filter: TagFilter::parse(&expression),
            callback,
            permits: Arc::new(Semaphore::new(settings.thread_pool_max)),
            retries: retry_tx,
        });

        let mut tasks = Vec::with_capacity(log.queues.len() + 1);
        for queue in &log.queues {
            let cursor = self
                .broker
                .cursor(&cursor_owner, queue, settings.consume_from_where)
                .await;
            tasks.push(tokio::spawn(run_queue(
                context.clone(),
                queue.clone(),
                cursor,
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_retries(context, retry_rx, shutdown_rx)));

        info!(
            "In-memory consumer {} started on {} ({:?}, {} queues, pool {}..{})",
            settings.consumer_group,
            topic,
            settings.consume_mode,
            log.queues.len(),
            settings.thread_pool_min,
            settings.thread_pool_max
        );
        state.shutdown = Some(shutdown_tx);
        state.tasks = tasks;
        Ok(())
    }

    async fn shutdown(&self) -> BrokerResult<()> {
        let mut state = self.state.lock().await;
        let Some(shutdown) = state.shutdown.as_ref() else {
            return Ok(());
        };
        if *shutdown.borrow() {
            return Ok(());
        }
        shutdown.send_replace(true);

        for task in state.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!("Delivery task ended abnormally: {}", err);
            }
        }
        if let Some(settings) = &state.settings {
            info!("In-memory consumer {} stopped", settings.consumer_group);
        }
        Ok(())
    }
}

struct RetryRequest {
    batch: Vec<ConsumedEnvelope>,
    delay: Duration,
}

struct DeliveryContext {
    broker: Arc<BrokerState>,
    group: String,
    owner: String,
    mode: ConsumeMode,
    batch_max_size: usize,
    filter: TagFilter,
    callback: Arc<dyn DispatchCallback>,
    permits: Arc<Semaphore>,
    retries: mpsc::UnboundedSender<RetryRequest>,
}

impl DeliveryContext {
    /// Send every envelope of `batch` back for a later redelivery
    async fn schedule_retry(&self, batch: Vec<ConsumedEnvelope>, delay_level: i32) {
        let mut exhausted = Vec::new();
        for mut envelope in batch {
            if delay_level < 0 || envelope.reconsume_count >= MAX_RECONSUME_TIMES {
                exhausted.push(envelope);
                continue;
            }
            envelope.reconsume_count += 1;
            let request = RetryRequest {
                batch: vec![envelope],
                delay: redelivery_delay(delay_level, self.broker.retry_delay),
            };
            if let Err(mpsc::error::SendError(request)) = self.retries.send(request) {
                self.broker.park_retry(&self.owner, request).await;
            }
        }
        if !exhausted.is_empty() {
            self.broker.dead_letter(&self.group, exhausted).await;
        }
    }

    /// Dispatch a batch read from a queue. Returns `false` when shutdown
    /// interrupted it before the batch was settled.
    async fn deliver_from_queue(&self, mut batch: Vec<ConsumedEnvelope>, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => permit,
                _ = stopped(shutdown) => return false,
            };
            let Ok(permit) = permit else {
                return false;
            };
            if *shutdown.borrow() {
                return false;
            }
            let status = self.callback.dispatch(batch.clone()).await;
            drop(permit);

            match status {
                ConsumeStatus::Accepted => return true,
                ConsumeStatus::RetryLater { delay_level } => {
                    if self.mode == ConsumeMode::Ordered {
                        debug!("Ordered consumer {} asked for a delayed retry", self.group);
                    }
                    self.schedule_retry(batch, delay_level).await;
                    return true;
                }
                ConsumeStatus::SuspendQueue { suspend } => {
                    tokio::select! {
                        _ = tokio::time::sleep(suspend) => {}
                        _ = stopped(shutdown) => return false,
                    }
                    for envelope in &mut batch {
                        envelope.reconsume_count += 1;
                    }
                    if batch.iter().any(|envelope| envelope.reconsume_count > MAX_RECONSUME_TIMES) {
                        self.broker.dead_letter(&self.group, batch).await;
                        return true;
                    }
                }
            }
        }
    }
}

/// Delay before a `RetryLater` redelivery. Level 0 (or below) leaves the
/// choice to the broker; levels past the table use its last entry.
fn redelivery_delay(delay_level: i32, broker_default: Duration) -> Duration {
    if delay_level <= 0 {
        return broker_default;
    }
    let index = (delay_level as usize).min(DELAY_LEVELS.len()) - 1;
    DELAY_LEVELS[index]
}

/// Resolves once shutdown was requested or the consumer was dropped
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn run_queue(
    context: Arc<DeliveryContext>,
    queue: Arc<QueueLog>,
    cursor: Arc<Mutex<u64>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Delivery task for {} started", queue.queue);
    loop {
        if *shutdown.borrow() {
            break;
        }
        let mut appended = queue.appended.subscribe();
        let mut position = tokio::select! {
            position = cursor.lock() => position,
            _ = stopped(&mut shutdown) => break,
        };

        let (batch, next) = queue
            .read_batch(*position, context.batch_max_size, &context.filter)
            .await;
        if batch.is_empty() {
            *position = next;
            drop(position);
            tokio::select! {
                _ = appended.changed() => {}
                _ = stopped(&mut shutdown) => break,
            }
            continue;
        }

        if context.deliver_from_queue(batch, &mut shutdown).await {
            *position = next;
        } else {
            break;
        }
    }
    debug!("Delivery task for {} stopped", queue.queue);
}

async fn run_retries(
    context: Arc<DeliveryContext>,
    mut requests: mpsc::UnboundedReceiver<RetryRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => {
                    pending.spawn(redeliver(context.clone(), request, shutdown.clone()));
                }
                None => break,
            },
            Some(_) = pending.join_next(), if !pending.is_empty() => {}
            _ = stopped(&mut shutdown) => break,
        }
    }
    requests.close();
    while let Ok(request) = requests.try_recv() {
        context.broker.park_retry(&context.owner, request).await;
    }
    while pending.join_next().await.is_some() {}
}

async fn redeliver(context: Arc<DeliveryContext>, request: RetryRequest, mut shutdown: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(request.delay) => {}
        _ = stopped(&mut shutdown) => {
            context.broker.park_retry(&context.owner, request).await;
            return;
        }
    }
    let permit = match context.permits.clone().acquire_owned().await {
        Ok(permit) if !*shutdown.borrow() => permit,
        _ => {
            context.broker.park_retry(&context.owner, request).await;
            return;
        }
    };
    let status = context.callback.dispatch(request.batch.clone()).await;
    drop(permit);

    match status {
        ConsumeStatus::Accepted => {}
        ConsumeStatus::RetryLater { delay_level } => context.schedule_retry(request.batch, delay_level).await,
        ConsumeStatus::SuspendQueue { .. } => context.schedule_retry(request.batch, 0).await,
    }
}
