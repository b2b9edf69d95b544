//! AMQP (RabbitMQ) backend.
//!
//! One non-durable topic exchange per channel; each subscriber gets its own
//! auto-generated exclusive queue bound to that exchange. `publish_with_retry`
//! checks out a fresh pooled connection on every attempt, matching the
//! original's full-reconnect-per-retry behavior.
//!
//! The original publishes straight to a named queue over the default
//! exchange while subscribing through a topic exchange + auto-queue — an
//! asymmetry that only worked because the publisher already knew the exact
//! destination queue name. Here both sides go through the same topic
//! exchange so a channel has one shape regardless of which side opens it
//! first.

use crate::{send_client_message_with_retry_via, Bus, TopicHandler};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use deadpool_lapin::{Manager, Pool};
use futures::StreamExt;
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, ExchangeKind,
};
use ocpp_proto::constants::{PUBLISH_MAX_RETRIES, PUBLISH_RETRY_BACKOFF_MS};
use ocpp_proto::OcppError;
use std::time::Duration;

/// Catch-all binding key; `publish` never targets a specific routing key, so
/// every consumer binds to this pattern unless it asks for a narrower one.
const BROADCAST_KEY: &str = "#";

pub struct AmqpBus {
    pool: Pool,
}

impl AmqpBus {
    pub async fn connect(server_url: &str) -> Result<Self, OcppError> {
        let manager = Manager::new(server_url.to_string(), Default::default());
        let pool = Pool::builder(manager)
            .max_size(10)
            .build()
            .map_err(|e| OcppError::transport(format!("failed to build AMQP pool: {e}")))?;
        let bus = Self { pool };
        bus.connect().await?;
        Ok(bus)
    }

    fn retry_policy(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(Duration::from_millis(PUBLISH_RETRY_BACKOFF_MS))
            .with_max_times(PUBLISH_MAX_RETRIES as usize)
    }

    async fn declare_exchange(&self, channel: &str) -> Result<lapin::Channel, OcppError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| OcppError::transport(format!("failed to get AMQP connection: {e}")))?;
        let chan = conn
            .create_channel()
            .await
            .map_err(|e| OcppError::transport(format!("failed to open AMQP channel: {e}")))?;
        chan.exchange_declare(
            channel,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: false,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| OcppError::transport(format!("failed to declare exchange {channel}: {e}")))?;
        Ok(chan)
    }

    async fn publish_once(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        let chan = self.declare_exchange(channel).await?;
        chan.basic_publish(
            channel,
            "",
            BasicPublishOptions::default(),
            payload,
            BasicProperties::default().with_content_type("application/json".into()),
        )
        .await
        .map_err(|e| OcppError::transport(format!("basic_publish to {channel} failed: {e}")))?
        .await
        .map_err(|e| OcppError::transport(format!("publish confirm for {channel} failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Bus for AmqpBus {
    async fn connect(&self) -> Result<(), OcppError> {
        self.pool
            .get()
            .await
            .map_err(|e| OcppError::transport(format!("failed to connect to AMQP: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), OcppError> {
        self.pool.close();
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), OcppError> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| OcppError::transport(format!("failed to get AMQP connection: {e}")))?;
        let chan = conn
            .create_channel()
            .await
            .map_err(|e| OcppError::transport(format!("failed to open AMQP channel: {e}")))?;
        chan.queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| OcppError::transport(format!("failed to declare queue {name}: {e}")))?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        self.publish_once(channel, payload).await
    }

    async fn publish_with_retry(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        (|| self.publish_once(channel, payload))
            .retry(self.retry_policy())
            .when(|_| true)
            .notify(|err, dur| {
                tracing::warn!("AMQP publish to {channel} failed, retrying in {dur:?}: {err}");
            })
            .await
    }

    async fn send_client_message_with_retry(
        &self,
        server_node: &str,
        client: &str,
        body: serde_json::Value,
    ) -> Result<(), OcppError> {
        send_client_message_with_retry_via(self, server_node, client, body).await
    }

    async fn subscribe_topic(&self, channel: &str, routing_key: &str) -> Result<(), OcppError> {
        self.declare_exchange(channel).await.map(|_| ())?;
        let _ = routing_key;
        Ok(())
    }

    async fn run_topic_receiver(&self, channel: &str, handler: TopicHandler) -> Result<(), OcppError> {
        let chan = self.declare_exchange(channel).await?;
        let queue = chan
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| OcppError::transport(format!("failed to declare auto queue: {e}")))?;
        let queue_name = queue.name().as_str();
        chan.queue_bind(
            queue_name,
            channel,
            BROADCAST_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| OcppError::transport(format!("failed to bind queue to {channel}: {e}")))?;

        let mut consumer = chan
            .basic_consume(
                queue_name,
                &format!("ocpp-gateway-{channel}"),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| OcppError::transport(format!("failed to consume {channel}: {e}")))?;

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => handler(delivery.data).await,
                Err(e) => {
                    tracing::error!("AMQP[{channel}] delivery error: {e}");
                    return Err(OcppError::transport(e.to_string()));
                }
            }
        }
        tracing::warn!("AMQP[{channel}] consumer stream ended");
        Ok(())
    }
}
