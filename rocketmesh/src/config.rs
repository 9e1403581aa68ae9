//! Listener and producer configuration, plus the settings loader.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::broker::ConsumerSettings;
use crate::codec::DEFAULT_CHARSET;
use crate::error::{RocketMeshError, Result};

pub const DEFAULT_THREAD_POOL_MIN: usize = 20;
pub const DEFAULT_THREAD_POOL_MAX: usize = 64;
pub const DEFAULT_MAX_RECONSUME_ATTEMPTS: u32 = 3;
pub const DEFAULT_ORDERED_SUSPEND: Duration = Duration::from_millis(1000);
pub const MAX_BATCH_SIZE: usize = 1024;

/// How deliveries of one subscription are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeMode {
    /// Queues are consumed in parallel and failures are retried later
    #[default]
    Concurrent,
    /// Each queue is consumed strictly in order and failures stall the queue
    Ordered,
}

/// Whether consumers of a group share or duplicate deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageModel {
    /// Each message goes to one consumer of the group
    #[default]
    Clustering,
    /// Each message goes to every consumer of the group
    Broadcasting,
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumeFromWhere {
    #[default]
    LastOffset,
    FirstOffset,
}

/// A single name server endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for NameServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NameServerAddress {
    type Err = RocketMeshError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| RocketMeshError::config_error(format!("name server '{}' is missing a port", s)))?;
        if host.is_empty() {
            return Err(RocketMeshError::config_error(format!("name server '{}' is missing a host", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RocketMeshError::config_error(format!("name server '{}' has an invalid port", s)))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Parse a `host:port[;host:port...]` name server list
pub fn parse_name_servers(value: &str) -> Result<Vec<NameServerAddress>> {
    let addresses = value
        .split(';')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect::<Result<Vec<NameServerAddress>>>()?;
    if addresses.is_empty() {
        return Err(RocketMeshError::config_error("name server address is required"));
    }
    Ok(addresses)
}

/// Configuration of one listener container
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    consumer_group: String,
    topic: String,
    name_server: String,
    selector_expression: String,
    consume_mode: ConsumeMode,
    message_model: MessageModel,
    consume_from_where: ConsumeFromWhere,
    thread_pool_min: usize,
    thread_pool_max: usize,
    batch_max_size: usize,
    max_reconsume_attempts: u32,
    next_attempt_delay_level: i32,
    ordered_suspend: Duration,
    charset: String,
}

impl ListenerConfig {
    pub fn builder(consumer_group: impl Into<String>, topic: impl Into<String>) -> ListenerConfigBuilder {
        ListenerConfigBuilder::new(consumer_group, topic)
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn name_server(&self) -> &str {
        &self.name_server
    }

    pub fn selector_expression(&self) -> &str {
        &self.selector_expression
    }

    pub fn consume_mode(&self) -> ConsumeMode {
        self.consume_mode
    }

    pub fn message_model(&self) -> MessageModel {
        self.message_model
    }

    pub fn consume_from_where(&self) -> ConsumeFromWhere {
        self.consume_from_where
    }

    /// Effective minimum, never above [`ListenerConfig::thread_pool_max`]
    pub fn thread_pool_min(&self) -> usize {
        self.thread_pool_min
    }

    pub fn thread_pool_max(&self) -> usize {
        self.thread_pool_max
    }

    pub fn batch_max_size(&self) -> usize {
        self.batch_max_size
    }

    pub fn max_reconsume_attempts(&self) -> u32 {
        self.max_reconsume_attempts
    }

    /// `0` leaves the redelivery delay to the broker, `-1` dead-letters
    /// immediately, positive values choose a delay level.
    pub fn next_attempt_delay_level(&self) -> i32 {
        self.next_attempt_delay_level
    }

    pub fn ordered_suspend(&self) -> Duration {
        self.ordered_suspend
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// Settings forwarded to the push consumer before it starts
    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            consumer_group: self.consumer_group.clone(),
            name_server: self.name_server.clone(),
            consume_mode: self.consume_mode,
            message_model: self.message_model,
            consume_from_where: self.consume_from_where,
            thread_pool_min: self.thread_pool_min,
            thread_pool_max: self.thread_pool_max,
            batch_max_size: self.batch_max_size,
        }
    }
}

/// Builder for [`ListenerConfig`]
#[derive(Debug, Clone)]
pub struct ListenerConfigBuilder {
    config: ListenerConfig,
}

impl ListenerConfigBuilder {
    pub fn new(consumer_group: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            config: ListenerConfig {
                consumer_group: consumer_group.into(),
                topic: topic.into(),
                name_server: String::new(),
                selector_expression: "*".to_string(),
                consume_mode: ConsumeMode::default(),
                message_model: MessageModel::default(),
                consume_from_where: ConsumeFromWhere::default(),
                thread_pool_min: DEFAULT_THREAD_POOL_MIN,
                thread_pool_max: DEFAULT_THREAD_POOL_MAX,
                batch_max_size: 1,
                max_reconsume_attempts: DEFAULT_MAX_RECONSUME_ATTEMPTS,
                next_attempt_delay_level: 0,
                ordered_suspend: DEFAULT_ORDERED_SUSPEND,
                charset: DEFAULT_CHARSET.to_string(),
            },
        }
    }

    pub fn name_server(mut self, name_server: impl Into<String>) -> Self {
        self.config.name_server = name_server.into();
        self
    }

    /// Set the name server unless one was already configured
    pub fn default_name_server(mut self, name_server: impl Into<String>) -> Self {
        if self.config.name_server.is_empty() {
            self.config.name_server = name_server.into();
        }
        self
    }

    pub fn selector_expression(mut self, expression: impl Into<String>) -> Self {
        self.config.selector_expression = expression.into();
        self
    }

    pub fn consume_mode(mut self, mode: ConsumeMode) -> Self {
        self.config.consume_mode = mode;
        self
    }

    pub fn message_model(mut self, model: MessageModel) -> Self {
        self.config.message_model = model;
        self
    }

    pub fn consume_from_where(mut self, from: ConsumeFromWhere) -> Self {
        self.config.consume_from_where = from;
        self
    }

    pub fn thread_pool_min(mut self, min: usize) -> Self {
        self.config.thread_pool_min = min;
        self
    }

    pub fn thread_pool_max(mut self, max: usize) -> Self {
        self.config.thread_pool_max = max;
        self
    }

    pub fn batch_max_size(mut self, size: usize) -> Self {
        self.config.batch_max_size = size;
        self
    }

    pub fn max_reconsume_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconsume_attempts = attempts;
        self
    }

    pub fn next_attempt_delay_level(mut self, level: i32) -> Self {
        self.config.next_attempt_delay_level = level;
        self
    }

    pub fn ordered_suspend(mut self, suspend: Duration) -> Self {
        self.config.ordered_suspend = suspend;
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.config.charset = charset.into();
        self
    }

    /// Finish the configuration. Out-of-range pool and batch sizes are
    /// clamped rather than rejected.
    pub fn build(self) -> ListenerConfig {
        let mut config = self.config;

        if config.thread_pool_max == 0 {
            warn!("thread_pool_max of 0 for group {} raised to 1", config.consumer_group);
            config.thread_pool_max = 1;
        }
        if config.thread_pool_min > config.thread_pool_max {
            warn!(
                "thread_pool_min {} exceeds thread_pool_max {} for group {}, using {}",
                config.thread_pool_min, config.thread_pool_max, config.consumer_group, config.thread_pool_max
            );
            config.thread_pool_min = config.thread_pool_max;
        }
        config.batch_max_size = config.batch_max_size.clamp(1, MAX_BATCH_SIZE);

        config
    }
}

/// Producer-side configuration shared by every template send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub name_server: String,
    pub group: String,
    pub send_timeout_ms: u64,
    pub max_message_size: usize,
    /// Bodies above this size may be compressed by the broker client
    pub compress_threshold: usize,
    pub retry_times_when_send_failed: u32,
    pub retry_times_when_send_async_failed: u32,
    pub retry_another_broker_when_not_store_ok: bool,
    pub vip_channel_enabled: bool,
    pub charset: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            name_server: String::new(),
            group: String::new(),
            send_timeout_ms: 3000,
            max_message_size: 4 * 1024 * 1024,
            compress_threshold: 4 * 1024,
            retry_times_when_send_failed: 2,
            retry_times_when_send_async_failed: 2,
            retry_another_broker_when_not_store_ok: false,
            vip_channel_enabled: false,
            charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

impl ProducerConfig {
    pub fn new(name_server: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name_server: name_server.into(),
            group: group.into(),
            ..Self::default()
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Check the fields a producer cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.name_server.trim().is_empty() {
            return Err(RocketMeshError::config_error("producer name server address is required"));
        }
        parse_name_servers(&self.name_server)?;
        if self.group.trim().is_empty() {
            return Err(RocketMeshError::config_error("producer group is required"));
        }
        if self.max_message_size == 0 {
            return Err(RocketMeshError::config_error("producer max_message_size must be positive"));
        }
        Ok(())
    }
}

/// Application settings loaded from file and environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Shared name server for producers and listeners
    pub name_server: Option<String>,
    /// Used as the producer group when none is configured
    pub application_name: Option<String>,
    pub producer: ProducerConfig,
}

impl Settings {
    /// Producer configuration with the shared name server and the group
    /// fallback applied
    pub fn producer_config(&self) -> Result<ProducerConfig> {
        let mut producer = self.producer.clone();
        if producer.name_server.trim().is_empty() {
            if let Some(name_server) = &self.name_server {
                producer.name_server = name_server.clone();
            }
        }
        if producer.group.trim().is_empty() {
            if let Some(application_name) = &self.application_name {
                producer.group = application_name.clone();
            }
        }
        producer.validate()?;
        Ok(producer)
    }
}

/// Load settings from `config/rocketmesh.*` (optional) and `ROCKETMESH_*`
/// environment variables
pub fn load_settings() -> Result<Settings> {
    build_settings(File::with_name("config/rocketmesh").required(false))
}

/// Load settings from an explicit file, then the environment
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    build_settings(File::from(path.as_ref()).required(true))
}

fn build_settings<S>(file: S) -> Result<Settings>
where
    S: config::Source + Send + Sync + 'static,
{
    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("ROCKETMESH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_listener_defaults() {
        let config = ListenerConfig::builder("orders-group", "orders").build();
        assert_eq!(config.selector_expression(), "*");
        assert_eq!(config.consume_mode(), ConsumeMode::Concurrent);
        assert_eq!(config.message_model(), MessageModel::Clustering);
        assert_eq!(config.consume_from_where(), ConsumeFromWhere::LastOffset);
        assert_eq!(config.thread_pool_min(), 20);
        assert_eq!(config.thread_pool_max(), 64);
        assert_eq!(config.batch_max_size(), 1);
        assert_eq!(config.max_reconsume_attempts(), 3);
        assert_eq!(config.next_attempt_delay_level(), 0);
        assert_eq!(config.ordered_suspend(), Duration::from_millis(1000));
        assert_eq!(config.charset(), "UTF-8");
    }

    #[test]
    fn test_thread_pool_min_clamped_to_max() {
        let config = ListenerConfig::builder("g", "t")
            .thread_pool_min(100)
            .thread_pool_max(64)
            .build();
        assert_eq!(config.thread_pool_min(), 64);
        assert_eq!(config.thread_pool_max(), 64);

        let settings = config.consumer_settings();
        assert_eq!(settings.thread_pool_min, 64);
        assert_eq!(settings.thread_pool_max, 64);
    }

    #[test]
    fn test_zero_sizes_clamped() {
        let config = ListenerConfig::builder("g", "t")
            .thread_pool_min(0)
            .thread_pool_max(0)
            .batch_max_size(0)
            .build();
        assert_eq!(config.thread_pool_max(), 1);
        assert_eq!(config.thread_pool_min(), 0);
        assert_eq!(config.batch_max_size(), 1);

        let config = ListenerConfig::builder("g", "t").batch_max_size(5000).build();
        assert_eq!(config.batch_max_size(), MAX_BATCH_SIZE);
    }

    #[test]
    fn test_default_name_server_keeps_explicit_value() {
        let config = ListenerConfig::builder("g", "t")
            .name_server("10.0.0.1:9876")
            .default_name_server("127.0.0.1:9876")
            .build();
        assert_eq!(config.name_server(), "10.0.0.1:9876");

        let config = ListenerConfig::builder("g", "t")
            .default_name_server("127.0.0.1:9876")
            .build();
        assert_eq!(config.name_server(), "127.0.0.1:9876");
    }

    #[test]
    fn test_parse_name_servers() {
        let servers = parse_name_servers("10.0.0.1:9876;10.0.0.2:9877").unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].host, "10.0.0.2");
        assert_eq!(servers[1].port, 9877);
        assert_eq!(servers[0].to_string(), "10.0.0.1:9876");

        assert!(parse_name_servers("").is_err());
        assert!(parse_name_servers("localhost").is_err());
        assert!(parse_name_servers("localhost:http").is_err());
        assert!(parse_name_servers(":9876").is_err());
    }

    #[test]
    fn test_producer_defaults() {
        let config = ProducerConfig::default();
        assert_eq!(config.send_timeout(), Duration::from_millis(3000));
        assert_eq!(config.max_message_size, 4 * 1024 * 1024);
        assert_eq!(config.compress_threshold, 4096);
        assert_eq!(config.retry_times_when_send_failed, 2);
        assert_eq!(config.retry_times_when_send_async_failed, 2);
        assert!(!config.retry_another_broker_when_not_store_ok);
        assert!(!config.vip_channel_enabled);
    }

    #[test]
    fn test_producer_validation() {
        assert!(ProducerConfig::new("127.0.0.1:9876", "orders-producer").validate().is_ok());
        assert!(matches!(
            ProducerConfig::new("", "orders-producer").validate(),
            Err(RocketMeshError::Configuration(_))
        ));
        assert!(matches!(
            ProducerConfig::new("127.0.0.1:9876", "").validate(),
            Err(RocketMeshError::Configuration(_))
        ));
    }

    #[test]
    fn test_group_falls_back_to_application_name() {
        let settings = Settings {
            name_server: Some("127.0.0.1:9876".to_string()),
            application_name: Some("checkout".to_string()),
            producer: ProducerConfig::default(),
        };
        let producer = settings.producer_config().unwrap();
        assert_eq!(producer.group, "checkout");
        assert_eq!(producer.name_server, "127.0.0.1:9876");

        let settings = Settings::default();
        assert!(settings.producer_config().is_err());
    }

    #[test]
    #[serial]
    fn test_load_settings_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
name_server = "10.0.0.5:9876"
application_name = "billing"

[producer]
send_timeout_ms = 5000
retry_times_when_send_failed = 4
"#
        )
        .unwrap();

        let settings = load_settings_from(file.path()).unwrap();
        assert_eq!(settings.name_server.as_deref(), Some("10.0.0.5:9876"));
        assert_eq!(settings.producer.send_timeout_ms, 5000);
        assert_eq!(settings.producer.retry_times_when_send_failed, 4);
        assert_eq!(settings.producer.max_message_size, 4 * 1024 * 1024);

        let producer = settings.producer_config().unwrap();
        assert_eq!(producer.group, "billing");
    }

    #[test]
    #[serial]
    fn test_load_settings_from_env() {
        temp_env::with_vars(
            [
                ("ROCKETMESH_NAME_SERVER", Some("10.0.0.9:9876")),
                ("ROCKETMESH_PRODUCER__GROUP", Some("env-producer")),
                ("ROCKETMESH_PRODUCER__SEND_TIMEOUT_MS", Some("1500")),
            ],
            || {
                let settings = load_settings().unwrap();
                assert_eq!(settings.name_server.as_deref(), Some("10.0.0.9:9876"));
                assert_eq!(settings.producer.group, "env-producer");
                assert_eq!(settings.producer.send_timeout_ms, 1500);
            },
        );
    }
}
