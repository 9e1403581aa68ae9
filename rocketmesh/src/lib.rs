//! # RocketMesh - Declarative Messaging for Topic/Tag Brokers
//!
//! RocketMesh wraps a topic/tag message broker client with two building
//! blocks:
//!
//! - a [`ListenerContainer`] that turns a [`MessageListener`] into a running,
//!   supervised subscription with bounded consume pools, concurrent or ordered
//!   dispatch and a reconsume policy, and
//! - a [`MessagingTemplate`] that converts payloads into broker messages and
//!   sends them synchronously, asynchronously, one-way or ordered by key.
//!
//! The broker itself sits behind the [`Producer`] and [`PushConsumer`] traits.
//! [`memory::InMemoryBroker`] implements both in process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rocketmesh::memory::InMemoryBroker;
//! use rocketmesh::{FunctionListener, ListenerConfig, ListenerContainer, MessagingTemplate, ProducerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = InMemoryBroker::new();
//!
//!     let config = ListenerConfig::builder("greeter-group", "greetings")
//!         .name_server("127.0.0.1:9876")
//!         .build();
//!     let container = ListenerContainer::new(config, Arc::new(broker.push_consumer()));
//!     container
//!         .start::<String, _>(FunctionListener::new("greeter", |text: String| async move {
//!             println!("received {text}");
//!             Ok::<_, anyhow::Error>(())
//!         }))
//!         .await?;
//!
//!     let template = MessagingTemplate::new(
//!         ProducerConfig::new("127.0.0.1:9876", "greeter-producer"),
//!         Arc::new(broker.producer()),
//!     )?;
//!     template.start().await?;
//!     template.send("greetings", "hello", "Hello, world").await?;
//!
//!     container.stop().await?;
//!     template.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod codec;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod memory;
pub mod message;
pub mod registrar;
pub mod selector;
pub mod template;

pub use broker::{ConsumeStatus, ConsumerSettings, DispatchCallback, Producer, PushConsumer, SendCallback};
pub use codec::{Json, ListenerPayload, OutboundPayload, PayloadCodec, PayloadKind, PayloadType};
pub use config::{
    load_settings, load_settings_from, ConsumeFromWhere, ConsumeMode, ListenerConfig, ListenerConfigBuilder,
    MessageModel, ProducerConfig, Settings,
};
pub use container::{ContainerState, ContainerStats, FunctionListener, ListenerContainer, MessageListener, RetryPolicy};
pub use error::{BrokerError, CodecError, Result, RocketMeshError};
pub use message::{ConsumedEnvelope, DeliveryHeader, Message, MessageQueue, SendOutcome, SendStatus};
pub use registrar::{ListenerDefinition, ListenerRegistrar};
pub use selector::{QueueSelector, SelectByFn, SelectByHash};
pub use template::{MessagingTemplate, SendOptions, TemplateStats};

#[cfg(feature = "macros")]
pub use rocketmesh_macros::message_listener;

// Used by `structured_payload!` and generated listener code
pub use async_trait::async_trait;
#[doc(hidden)]
pub use bytes;
