//! Nanomsg (`zmq`/`tmq`) backend.
//!
//! Two independent socket pairs carry all traffic: PUB/SUB for fan-out
//! (`Notify`, `MessagesOut` broadcast to every front-end node) framed as
//! `"channel|json"` with the SUB side filtering by the `channel` prefix, and
//! REQ/REP for routed, acknowledged sends (`MessagesIn`, `MessagesOut`
//! point-to-point). A front-end node binds PUB + REP; a back-end service
//! connects SUB + REQ.

use crate::{send_client_message_with_retry_via, Bus, TopicHandler};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use ocpp_proto::constants::{PUBLISH_MAX_RETRIES, PUBLISH_RETRY_BACKOFF_MS};
use ocpp_proto::OcppError;
use std::time::Duration;
use tmq::{publish, reply, request, subscribe, Multipart};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Reconnect interval while a dial attempt keeps failing, matching the
/// original's infinite retry-every-1s loop.
const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct NanomsgConfig {
    /// Bind address for the PUB socket. Empty disables it.
    pub publisher_listen_url: String,
    /// Connect address for the SUB socket. Empty disables it.
    pub subscriber_client_url: String,
    /// Bind address for the REP socket. Empty disables it.
    pub request_listen_url: String,
    /// Connect address for the REQ socket. Empty disables it.
    pub request_client_url: String,
}

enum PubSocket {
    None,
    Bound(tmq::publish::Publish),
}

enum ReqSocket {
    None,
    Connected(tmq::request::RequestSender),
}

pub struct NanomsgBus {
    config: NanomsgConfig,
    ctx: tmq::Context,
    publisher: Mutex<PubSocket>,
    subscriber: Mutex<Option<tmq::subscribe::Subscribe>>,
    rep_listener: Mutex<Option<tmq::reply::Reply>>,
    requester: Mutex<ReqSocket>,
}

impl NanomsgBus {
    pub fn new(config: NanomsgConfig) -> Self {
        Self {
            config,
            ctx: tmq::Context::new(),
            publisher: Mutex::new(PubSocket::None),
            subscriber: Mutex::new(None),
            rep_listener: Mutex::new(None),
            requester: Mutex::new(ReqSocket::None),
        }
    }

    async fn publish_raw(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        let framed = frame(channel, payload);

        let mut sent_any = false;
        {
            let mut guard = self.publisher.lock().await;
            if let PubSocket::Bound(sock) = &mut *guard {
                sock.send(Multipart::from(vec![framed.clone().into()]))
                    .await
                    .map_err(|e| OcppError::transport(format!("pub send failed: {e}")))?;
                sent_any = true;
            }
        }

        let mut guard = self.requester.lock().await;
        if let ReqSocket::Connected(sender) = std::mem::replace(&mut *guard, ReqSocket::None) {
            let receiver = sender
                .send(Multipart::from(vec![framed.into()]))
                .await
                .map_err(|e| OcppError::transport(format!("req send failed: {e}")))?;
            let (_ack, sender_back) = receiver
                .recv()
                .await
                .map_err(|e| OcppError::transport(format!("req recv ack failed: {e}")))?;
            *guard = ReqSocket::Connected(sender_back);
            sent_any = true;
        }

        if !sent_any {
            tracing::warn!("nanomsg bus has no outbound socket configured, dropping publish");
        }
        Ok(())
    }
}

fn frame(channel: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(channel.len() + 1 + payload.len());
    out.extend_from_slice(channel.as_bytes());
    out.push(b'|');
    out.extend_from_slice(payload);
    out
}

fn unframe(buf: &[u8]) -> Option<&[u8]> {
    buf.iter()
        .position(|&b| b == b'|')
        .map(|idx| &buf[idx + 1..])
}

#[async_trait]
impl Bus for NanomsgBus {
    async fn connect(&self) -> Result<(), OcppError> {
        if !self.config.publisher_listen_url.is_empty() {
            let sock = publish(&self.ctx)
                .bind(&self.config.publisher_listen_url)
                .map_err(|e| OcppError::transport(format!("pub bind failed: {e}")))?;
            *self.publisher.lock().await = PubSocket::Bound(sock);
        }

        if !self.config.subscriber_client_url.is_empty() {
            loop {
                match subscribe(&self.ctx).connect(&self.config.subscriber_client_url) {
                    Ok(sock) => {
                        *self.subscriber.lock().await = Some(sock);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("sub dial failed: {e}, retrying in 1s");
                        sleep(DIAL_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        if !self.config.request_listen_url.is_empty() {
            let sock = reply(&self.ctx)
                .bind(&self.config.request_listen_url)
                .map_err(|e| OcppError::transport(format!("rep bind failed: {e}")))?;
            *self.rep_listener.lock().await = Some(sock);
        }

        if !self.config.request_client_url.is_empty() {
            loop {
                match request(&self.ctx).connect(&self.config.request_client_url) {
                    Ok(sock) => {
                        *self.requester.lock().await = ReqSocket::Connected(sock);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("req dial failed: {e}, retrying in 1s");
                        sleep(DIAL_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), OcppError> {
        *self.publisher.lock().await = PubSocket::None;
        *self.subscriber.lock().await = None;
        *self.rep_listener.lock().await = None;
        *self.requester.lock().await = ReqSocket::None;
        Ok(())
    }

    async fn declare_queue(&self, _name: &str) -> Result<(), OcppError> {
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        self.publish_raw(channel, payload).await
    }

    async fn publish_with_retry(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
        let mut attempt = 0;
        loop {
            match self.publish_raw(channel, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < PUBLISH_MAX_RETRIES => {
                    attempt += 1;
                    tracing::warn!(
                        "nanomsg publish to {channel} failed (attempt {attempt}/{PUBLISH_MAX_RETRIES}): {e}"
                    );
                    sleep(Duration::from_millis(PUBLISH_RETRY_BACKOFF_MS)).await;
                }
                Err(e) => {
                    tracing::error!(
                        "nanomsg publish to {channel} failed after {PUBLISH_MAX_RETRIES} retries: {e}"
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

    async fn subscribe_topic(&self, channel: &str, _routing_key: &str) -> Result<(), OcppError> {
        let mut guard = self.subscriber.lock().await;
        if let Some(sock) = guard.as_mut() {
            sock.subscribe(channel.as_bytes())
                .map_err(|e| OcppError::transport(format!("subscribe failed: {e}")))?;
        }
        Ok(())
    }

    async fn run_topic_receiver(&self, channel: &str, handler: TopicHandler) -> Result<(), OcppError> {
        loop {
            let mut sub_guard = self.subscriber.lock().await;
            let mut rep_guard = self.rep_listener.lock().await;

            if let Some(sock) = sub_guard.as_mut() {
                match sock.next().await {
                    Some(Ok(multipart)) => {
                        drop(rep_guard);
                        drop(sub_guard);
                        if let Some(frame) = multipart.into_iter().next() {
                            if let Some(body) = unframe(&frame) {
                                handler(body.to_vec()).await;
                            }
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        tracing::error!("nanomsg[{channel}] sub receive error: {e}");
                        return Err(OcppError::transport(e.to_string()));
                    }
                    None => {
                        tracing::warn!("nanomsg[{channel}] sub socket closed");
                        return Ok(());
                    }
                }
            }

            if let Some(sock) = rep_guard.take() {
                drop(sub_guard);
                match sock.recv().await {
                    Ok((multipart, sender)) => {
                        if let Some(frame) = multipart.into_iter().next() {
                            if let Some(body) = unframe(&frame) {
                                handler(body.to_vec()).await;
                            }
                        }
                        let acked = sender
                            .send(Multipart::from(vec![Vec::<u8>::new().into()]))
                            .await
                            .map_err(|e| OcppError::transport(format!("rep ack failed: {e}")))?;
                        *self.rep_listener.lock().await = Some(acked);
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("nanomsg[{channel}] rep receive error: {e}");
                        return Err(OcppError::transport(e.to_string()));
                    }
                }
            } else {
                drop(rep_guard);
                drop(sub_guard);
                tracing::warn!("nanomsg[{channel}] has no inbound socket configured");
                return Ok(());
            }
        }
    }
}
