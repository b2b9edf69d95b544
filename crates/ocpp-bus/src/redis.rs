//! Redis backend: `PUBLISH`/`SUBSCRIBE` for every channel, no routing-key
//! filtering. The original also exposes an `LPUSH`/`BRPOP` queue-mode API,
//! but none of `Notify`/`MessagesIn`/`MessagesOut` ever uses it — it's
//! dead weight for this gateway and isn't carried over.

use ::redis as redis_client;

use crate::{send_client_message_with_retry_via, Bus, TopicHandler};
use async_trait::async_trait;
use futures::StreamExt;
use ocpp_proto::constants::{PUBLISH_MAX_RETRIES, PUBLISH_RETRY_BACKOFF_MS};
use ocpp_proto::OcppError;
use redis_client::aio::ConnectionManager;
use redis_client::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct RedisBus {
    client: redis_client::Client,
    manager: Mutex<ConnectionManager>,
}

impl RedisBus {
    pub async fn connect(host_port: &str, password: &str, db_id: i64) -> Result<Self, OcppError> {
        let url = if password.is_empty() {
            format!("redis://{host_port}/{db_id}")
        } else {
            format!("redis://:{password}@{host_port}/{db_id}")
        };
        let client = redis_client::Client::open(url)
            .map_err(|e| OcppError::transport(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| OcppError::transport(format!("failed to connect to redis: {e}")))?;
        let bus = Self {
            client,
            manager: Mutex::new(manager),
        };
        bus.connect().await?;
        Ok(bus)
    }

    async fn publish_once(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        let mut conn = self.manager.lock().await;
        conn.publish::<_, _, i64>(channel, payload)
            .await
            .map_err(|e| OcppError::transport(format!("PUBLISH to {channel} failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn connect(&self) -> Result<(), OcppError> {
        let mut conn = self.manager.lock().await;
        redis_client::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await
            .map_err(|e| OcppError::transport(format!("redis ping failed: {e}")))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), OcppError> {
        Ok(())
    }

    async fn declare_queue(&self, _name: &str) -> Result<(), OcppError> {
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        self.publish_once(channel, payload).await
    }

    async fn publish_with_retry(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        let mut attempt = 0;
        loop {
            match self.publish_once(channel, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < PUBLISH_MAX_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        "redis publish to {channel} failed (attempt {attempt}/{PUBLISH_MAX_RETRIES}): {e}"
                    );
                    sleep(std::time::Duration::from_millis(PUBLISH_RETRY_BACKOFF_MS)).await;
                }
                Err(e) => {
                    tracing::error!(
                        "redis publish to {channel} failed after {PUBLISH_MAX_RETRIES} retries: {e}"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn send_client_message_with_retry(
        &self,
        server_node: &str,
        client: &str,
        body: serde_json::Value,
    ) -> Result<(), OcppError> {
        send_client_message_with_retry_via(self, server_node, client, body).await
    }

    async fn subscribe_topic(&self, _channel: &str, _routing_key: &str) -> Result<(), OcppError> {
        // Subscription is established per-receiver in `run_topic_receiver`;
        // redis has no routing-key filtering to set up ahead of time.
        Ok(())
    }

    async fn run_topic_receiver(&self, channel: &str, handler: TopicHandler) -> Result<(), OcppError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| OcppError::transport(format!("failed to open pubsub: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| OcppError::transport(format!("SUBSCRIBE {channel} failed: {e}")))?;

        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            let payload: Vec<u8> = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("redis[{channel}] malformed payload: {e}");
                    continue;
                }
            };
            handler(payload).await;
        }
        tracing::warn!("redis[{channel}] subscription stream ended");
        Ok(())
    }
}
