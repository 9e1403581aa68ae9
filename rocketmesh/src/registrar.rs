//! Explicit listener registration.
//!
//! Listener types describe their subscription through [`ListenerDefinition`]
//! (usually generated by `#[message_listener]`). The registrar turns each one
//! into a [`ListenerContainer`] backed by a consumer from its factory and
//! starts or stops them together.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::broker::PushConsumer;
use crate::codec::ListenerPayload;
use crate::config::{ListenerConfig, ListenerConfigBuilder};
use crate::container::{ContainerState, ListenerContainer, MessageListener};
use crate::error::Result;

/// Static subscription metadata of a listener type
pub trait ListenerDefinition {
    /// Payload type handed to the listener
    type Payload: ListenerPayload;

    fn listener_config() -> ListenerConfigBuilder;
}

pub type ConsumerFactory = Arc<dyn Fn(&ListenerConfig) -> Arc<dyn PushConsumer> + Send + Sync>;

type Starter = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Registration {
    container: Arc<ListenerContainer>,
    starter: Option<Starter>,
}

/// Builds, starts and stops the containers of registered listeners
pub struct ListenerRegistrar {
    name_server: String,
    consumer_factory: ConsumerFactory,
    registrations: Mutex<Vec<Registration>>,
}

impl ListenerRegistrar {
    /// `name_server` applies to every listener that does not set its own
    pub fn new<F>(name_server: impl Into<String>, consumer_factory: F) -> Self
    where
        F: Fn(&ListenerConfig) -> Arc<dyn PushConsumer> + Send + Sync + 'static,
    {
        Self {
            name_server: name_server.into(),
            consumer_factory: Arc::new(consumer_factory),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Register `listener`; its container starts with [`Self::start_all`]
    pub async fn register<L>(&self, listener: L) -> Arc<ListenerContainer>
    where
        L: ListenerDefinition + MessageListener<<L as ListenerDefinition>::Payload>,
    {
        let config = L::listener_config()
            .default_name_server(self.name_server.clone())
            .build();
        let consumer = (self.consumer_factory)(&config);
        let container = Arc::new(ListenerContainer::new(config, consumer));

        let target = container.clone();
        let starter: Starter = Box::new(move || {
            Box::pin(async move { target.start::<L::Payload, L>(listener).await })
        });

        info!(
            "📝 Registered listener {} for group {} on topic {}",
            std::any::type_name::<L>(),
            container.config().consumer_group(),
            container.config().topic()
        );
        self.registrations.lock().await.push(Registration {
            container: container.clone(),
            starter: Some(starter),
        });
        container
    }

    /// Start every container that has not been started yet, in registration
    /// order. Stops at the first failure; a listener whose start failed is
    /// not started again.
    pub async fn start_all(&self) -> Result<()> {
        let mut registrations = self.registrations.lock().await;
        for registration in registrations.iter_mut() {
            let Some(starter) = registration.starter.take() else {
                continue;
            };
            if let Err(err) = starter().await {
                error!(
                    "❌ Listener for group {} failed to start: {}",
                    registration.container.config().consumer_group(),
                    err
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop every started container. All containers are stopped even when
    /// one fails; the first error is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let registrations = self.registrations.lock().await;
        let mut first_error = None;
        for registration in registrations.iter() {
            if registration.container.state().await != ContainerState::Started {
                continue;
            }
            if let Err(err) = registration.container.stop().await {
                error!(
                    "Listener for group {} failed to stop: {}",
                    registration.container.config().consumer_group(),
                    err
                );
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub async fn containers(&self) -> Vec<Arc<ListenerContainer>> {
        self.registrations
            .lock()
            .await
            .iter()
            .map(|registration| registration.container.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBroker;
    use crate::message::ConsumedEnvelope;
    use crate::error::RocketMeshError;
    use async_trait::async_trait;

    struct AuditListener;

    impl ListenerDefinition for AuditListener {
        type Payload = ConsumedEnvelope;

        fn listener_config() -> ListenerConfigBuilder {
            ListenerConfig::builder("audit-group", "audit")
        }
    }

    #[async_trait]
    impl MessageListener for AuditListener {
        async fn on_message(&self, _message: ConsumedEnvelope) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct BrokenListener;

    impl ListenerDefinition for BrokenListener {
        type Payload = String;

        fn listener_config() -> ListenerConfigBuilder {
            ListenerConfig::builder("", "broken")
        }
    }

    #[async_trait]
    impl MessageListener<String> for BrokenListener {
        async fn on_message(&self, _message: String) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registrar(broker: &InMemoryBroker) -> ListenerRegistrar {
        let broker = broker.clone();
        ListenerRegistrar::new("127.0.0.1:9876", move |_config: &ListenerConfig| {
            Arc::new(broker.push_consumer()) as Arc<dyn PushConsumer>
        })
    }

    #[tokio::test]
    async fn test_register_start_and_stop() {
        let broker = InMemoryBroker::new();
        let registrar = registrar(&broker);

        let container = registrar.register(AuditListener).await;
        assert_eq!(container.config().name_server(), "127.0.0.1:9876");
        assert_eq!(container.state().await, ContainerState::Created);

        registrar.start_all().await.unwrap();
        assert_eq!(container.state().await, ContainerState::Started);
        // already started containers are skipped
        registrar.start_all().await.unwrap();

        registrar.stop_all().await.unwrap();
        assert_eq!(container.state().await, ContainerState::Stopped);
        assert_eq!(registrar.containers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_all_reports_invalid_listener() {
        let broker = InMemoryBroker::new();
        let registrar = registrar(&broker);

        let audit = registrar.register(AuditListener).await;
        let broken = registrar.register(BrokenListener).await;

        let err = registrar.start_all().await.unwrap_err();
        assert!(matches!(err, RocketMeshError::Configuration(_)));
        assert_eq!(audit.state().await, ContainerState::Started);
        assert_eq!(broken.state().await, ContainerState::Created);

        registrar.stop_all().await.unwrap();
        assert_eq!(audit.state().await, ContainerState::Stopped);
    }
}
