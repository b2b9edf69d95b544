//! The pluggable message bus that moves envelopes between a `csms-server`
//! front-end node and the back-end services (`session`, `device-manager`,
//! `message-manager`).
//!
//! `Bus` is transport-agnostic; `factory::build_bus` picks a backend from
//! `ocpp_conf::MqConfig` and hands back an `Arc<dyn Bus>`.

pub mod amqp;
pub mod factory;
pub mod nanomsg;
pub mod redis;

use async_trait::async_trait;
use ocpp_proto::OcppError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use factory::{build_bus, BusRole};

/// Well-known bus channels, re-exported for convenience.
pub use ocpp_proto::constants::{CHANNEL_MESSAGES_IN, CHANNEL_MESSAGES_OUT, CHANNEL_NOTIFY};

/// A handler invoked once per message delivered by [`Bus::run_topic_receiver`].
pub type TopicHandler =
    Arc<dyn Fn(Vec<u8>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Transport-agnostic message bus contract, matching every backend's
/// `MqBus` Go interface one-for-one.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Opens sockets/channels/connections for every configured direction.
    async fn connect(&self) -> Result<(), OcppError>;

    /// Tears down every open socket/channel/connection.
    async fn close(&self) -> Result<(), OcppError>;

    /// A no-op for transports without durable queues.
    async fn declare_queue(&self, name: &str) -> Result<(), OcppError>;

    /// Fire-and-forget publish.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError>;

    /// Publish with up to 3 attempts and a 2s backoff between them.
    /// Exhaustion returns a `Transport` error.
    async fn publish_with_retry(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError>;

    /// Wraps `body` in an [`ocpp_proto::Envelope`] and publishes it to
    /// `MessagesIn` with retry.
    async fn send_client_message_with_retry(
        &self,
        server_node: &str,
        client: &str,
        body: serde_json::Value,
    ) -> Result<(), OcppError>;

    /// Idempotent subscribe. `routing_key` is the hostname for per-node
    /// fan-out on transports that support keyed topics; ignored otherwise.
    async fn subscribe_topic(&self, channel: &str, routing_key: &str) -> Result<(), OcppError>;

    /// Long-lived consumer loop; delivers each message to `handler` in
    /// receipt order. Returns once the underlying transport is closed or
    /// hits a fatal receive error (receiver reconnect-on-loss is out of
    /// scope).
    async fn run_topic_receiver(&self, channel: &str, handler: TopicHandler) -> Result<(), OcppError>;
}

/// Builds a `[4]`-or-`[3]`-shaped envelope and publishes it with retry to
/// `MessagesIn`. Shared by every backend's `send_client_message_with_retry`.
pub(crate) async fn send_client_message_with_retry_via<B: Bus + ?Sized>(
    bus: &B,
    server_node: &str,
    client: &str,
    body: serde_json::Value,
) -> Result<(), OcppError> {
    let envelope = ocpp_proto::Envelope::new(server_node, client, body);
    let payload = serde_json::to_vec(&envelope)?;
    bus.publish_with_retry(CHANNEL_MESSAGES_IN, &payload).await
}
