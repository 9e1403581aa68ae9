//! # RocketMesh Macros
//!
//! Procedural macros for declaring rocketmesh listeners.
//!
//! `#[message_listener]` goes on a `MessageListener<T>` impl and generates the
//! matching `ListenerDefinition`, so the listener can be handed straight to a
//! `ListenerRegistrar`:
//!
//! ```rust,ignore
//! use rocketmesh::{async_trait, message_listener, Json, MessageListener};
//!
//! pub struct OrderAuditor;
//!
//! #[message_listener(
//!     consumer_group = "order-audit",
//!     topic = "orders",
//!     selector_expression = "created || paid",
//!     consume_mode = "ordered",
//!     max_reconsume_attempts = 5
//! )]
//! #[async_trait]
//! impl MessageListener<Json<OrderEvent>> for OrderAuditor {
//!     async fn on_message(&self, event: Json<OrderEvent>) -> anyhow::Result<()> {
//!         println!("audit {:?}", event.0);
//!         Ok(())
//!     }
//! }
//! ```
//!
//! The payload type is read from the trait's type argument at compile time;
//! a bare `impl MessageListener for X` receives the raw `ConsumedEnvelope`.

use proc_macro::TokenStream;

mod message_listener;

/// Declares the subscription of a `MessageListener` impl.
///
/// ## Arguments
///
/// | name | value | default |
/// |------|-------|---------|
/// | `consumer_group` | string, required | |
/// | `topic` | string, required | |
/// | `name_server` | `"host:port[;host:port]"` | registrar's name server |
/// | `selector_expression` | `"*"` or `"TagA \|\| TagB"` | `"*"` |
/// | `consume_mode` | `"concurrent"` or `"ordered"` | `"concurrent"` |
/// | `message_model` | `"clustering"` or `"broadcasting"` | `"clustering"` |
/// | `consume_from_where` | `"last_offset"` or `"first_offset"` | `"last_offset"` |
/// | `thread_pool_min` / `thread_pool_max` | integer | 20 / 64 |
/// | `batch_max_size` | integer | 1 |
/// | `max_reconsume_attempts` | integer | 3 |
/// | `next_attempt_delay_level` | integer, `-1` dead-letters at once | 0 |
/// | `ordered_suspend_millis` | integer | 1000 |
/// | `charset` | string | `"UTF-8"` |
///
/// Place it above `#[async_trait]`.
#[proc_macro_attribute]
pub fn message_listener(args: TokenStream, input: TokenStream) -> TokenStream {
    message_listener::impl_message_listener(args, input)
}
