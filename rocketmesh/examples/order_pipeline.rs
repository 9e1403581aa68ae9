//! Order pipeline example showing the listener macro and the messaging template
//!
//! Two listeners subscribe to the `orders` topic of an in-process broker:
//! a concurrent auditor that only wants `paid` events and an ordered
//! fulfilment listener that must see every order's events in sequence.
//! Settings come from `config/rocketmesh.*` and `ROCKETMESH_*` variables,
//! falling back to a local name server.

use std::sync::Arc;
use std::time::Duration;

use rocketmesh::memory::InMemoryBroker;
use rocketmesh::{
    async_trait, load_settings, logging, message_listener, Json, ListenerConfig, ListenerRegistrar,
    MessageListener, MessagingTemplate, PushConsumer, SendOptions,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub step: String,
    pub amount_cents: u64,
}

rocketmesh::structured_payload!(OrderEvent);

pub struct PaymentAuditor;

#[message_listener(consumer_group = "payment-audit", topic = "orders", selector_expression = "paid")]
#[async_trait]
impl MessageListener<Json<OrderEvent>> for PaymentAuditor {
    async fn on_message(&self, event: Json<OrderEvent>) -> anyhow::Result<()> {
        info!("💰 Audited payment of {} cents for {}", event.0.amount_cents, event.0.order_id);
        Ok(())
    }
}

pub struct Fulfilment;

#[message_listener(
    consumer_group = "fulfilment",
    topic = "orders",
    consume_mode = "ordered",
    thread_pool_max = 8,
    ordered_suspend_millis = 200
)]
#[async_trait]
impl MessageListener<OrderEvent> for Fulfilment {
    async fn on_message(&self, event: OrderEvent) -> anyhow::Result<()> {
        info!("📦 {} -> {}", event.order_id, event.step);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("info");

    let mut settings = load_settings()?;
    let name_server = settings
        .name_server
        .get_or_insert_with(|| "127.0.0.1:9876".to_string())
        .clone();
    settings
        .application_name
        .get_or_insert_with(|| "order-pipeline".to_string());

    let broker = InMemoryBroker::new();
    let consumers = broker.clone();
    let registrar = ListenerRegistrar::new(name_server, move |_config: &ListenerConfig| {
        Arc::new(consumers.push_consumer()) as Arc<dyn PushConsumer>
    });
    registrar.register(PaymentAuditor).await;
    registrar.register(Fulfilment).await;
    registrar.start_all().await?;

    let template = MessagingTemplate::new(settings.producer_config()?, Arc::new(broker.producer()))?;
    template.start().await?;

    for order_id in ["order-1001", "order-1002"] {
        for (step, amount_cents) in [("created", 0), ("paid", 4_990), ("shipped", 0)] {
            let event = OrderEvent {
                order_id: order_id.to_string(),
                step: step.to_string(),
                amount_cents,
            };
            template.send_ordered("orders", step, &event, order_id).await?;
        }
    }

    template.send_async(
        "orders",
        "paid",
        &Json(OrderEvent {
            order_id: "order-1003".to_string(),
            step: "paid".to_string(),
            amount_cents: 1_250,
        }),
        SendOptions::new(),
        |result| match result {
            Ok(outcome) => info!("Async send stored as {}", outcome.message_id),
            Err(err) => warn!("Async send failed: {}", err),
        },
    )?;
    template.send_one_way("audit-trail", "heartbeat", "pipeline alive").await?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    info!("📊 Template stats: {:?}", template.stats());

    registrar.stop_all().await?;
    template.shutdown().await?;
    Ok(())
}
