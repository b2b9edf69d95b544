//! WebSocket upgrade and the per-connection `HandleMessage` dispatch table,
//! matching `original_source/src/csms-server/webSocket.go`.

use crate::auth::{is_authorized, network_id_from_path};
use crate::state::{AppState, ConnectionHandle};
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use ocpp_proto::message::{emit_ack, emit_result, now_iso8601};
use ocpp_proto::{Direction, NotifyMessage, OcppMessage};
use std::net::SocketAddr;

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let network_id = match network_id_from_path(uri.path()) {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(path = %uri.path(), error = %e, "rejecting connection, bad networkId");
            return axum::http::StatusCode::NOT_FOUND.into_response();
        }
    };

    if state.config.services.csms_server.enable_auth {
        let Some(cache) = state.auth_cache.as_ref() else {
            tracing::error!("auth enabled but no cache configured, rejecting connection");
            return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
        };
        let remote_addr_str = remote_addr.to_string();
        if !is_authorized(cache, &network_id).await {
            tracing::warn!(network_id, "auth failed, return 404...");
            ocpp_telemetry::track_authentication_event(&network_id, &remote_addr_str, "401");
            return axum::http::StatusCode::NOT_FOUND.into_response();
        }
        ocpp_telemetry::track_authentication_event(&network_id, &remote_addr_str, "200");
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, network_id, remote_addr))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    network_id: String,
    remote_addr: SocketAddr,
) {
    let remote_addr = remote_addr.to_string();
    tracing::debug!(network_id, remote_addr, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();

    state.connections.insert(
        network_id.clone(),
        ConnectionHandle {
            outbound: outbound_tx,
            remote_addr: remote_addr.clone(),
        },
    );

    let standalone = state.config.services.csms_server.standalone_mode;
    if !standalone {
        if let Err(e) = state
            .bus
            .publish(
                ocpp_bus::CHANNEL_NOTIFY,
                &serde_json::to_vec(&NotifyMessage::client_connected(
                    state.host_name.as_ref(),
                    remote_addr.clone(),
                    network_id.clone(),
                ))
                .expect("NotifyMessage always serializes"),
            )
            .await
        {
            tracing::error!(network_id, error = %e, "problem sending MQ notify connected");
        }
    }

    let writer_network_id = network_id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            tracing::debug!(network_id = %writer_network_id, frame = %String::from_utf8_lossy(&frame), "<-SendClient");
            if sink.send(Message::Text(String::from_utf8_lossy(&frame).into_owned())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes.to_vec(),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        if let Err(e) = handle_message(&state, &network_id, &remote_addr, &msg).await {
            tracing::warn!(network_id, remote_addr, error = %e, "closing connection");
            break;
        }
    }

    writer_task.abort();
    state.connections.remove(&network_id);
    if !standalone {
        if let Err(e) = state
            .bus
            .publish(
                ocpp_bus::CHANNEL_NOTIFY,
                &serde_json::to_vec(&NotifyMessage::client_disconnected(
                    state.host_name.as_ref(),
                    remote_addr.clone(),
                    network_id.clone(),
                ))
                .expect("NotifyMessage always serializes"),
            )
            .await
        {
            tracing::error!(network_id, error = %e, "problem sending MQ notify disconnected");
        }
    }
    tracing::debug!(network_id, remote_addr, "client disconnected");
}

/// The per-message dispatch table. Three outcomes decide what happens to a
/// parsed frame: whether it's forwarded to `MessagesIn` (`send_to_mq`),
/// whether the generic ack is suppressed (`skip_ack`), and what immediate
/// reply (if any) the switch already produced.
async fn handle_message(
    state: &AppState,
    network_id: &str,
    remote_addr: &str,
    raw: &[u8],
) -> Result<(), ocpp_proto::OcppError> {
    tracing::debug!(network_id, raw = %String::from_utf8_lossy(raw), "RecvClient->");

    let msg = match ocpp_proto::message::parse(raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(network_id, error = %e, "unable to parse ocpp envelope, dropping");
            return Ok(());
        }
    };

    let standalone = state.config.services.csms_server.standalone_mode;
    let mut send_to_mq = true;
    let mut skip_ack = false;
    let mut reply: Option<Vec<u8>> = None;

    match msg.direction {
        Direction::Reply => {
            if state.pending_client_replies.remove(&msg.msg_id).is_some() {
                tracing::debug!(msg_id = %msg.msg_id, "valid message response");
                state
                    .bus
                    .send_client_message_with_retry(
                        state.host_name.as_ref(),
                        network_id,
                        serde_json::to_value(&msg).expect("OcppMessage always serializes"),
                    )
                    .await?;
            } else {
                tracing::warn!(msg_id = %msg.msg_id, "no waiting message for reply, dropping");
            }
            return Ok(());
        }
        Direction::ClientToServer => {
            match msg.message_type.as_deref() {
                Some("StatusNotification") | Some("MeterValues") | Some("SecurityEventNotification") => {
                    if standalone {
                        send_to_mq = false;
                    }
                }
                Some("BootNotification") => {
                    if standalone {
                        send_to_mq = false;
                    }
                    tracing::debug!(network_id, "received BootNotification");
                    let body = serde_json::json!({
                        "status": "Accepted",
                        "currentTime": now_iso8601(),
                        "interval": 60,
                    });
                    reply = Some(emit_result(&msg.msg_id, &body)?);
                }
                Some("Heartbeat") => {
                    if standalone {
                        send_to_mq = false;
                    }
                    tracing::debug!(network_id, "received Heartbeat");
                    let body = serde_json::json!({ "currentTime": now_iso8601() });
                    reply = Some(emit_result(&msg.msg_id, &body)?);
                }
                Some("StartTransaction") => {
                    send_to_mq = true;
                    skip_ack = true;
                }
                Some("StopTransaction") => {
                    send_to_mq = true;
                    skip_ack = false;
                }
                Some("DataTransfer") => {
                    skip_ack = false;
                    send_to_mq = false;
                    let body = serde_json::json!({ "status": "UnknownVendorId" });
                    reply = Some(emit_result(&msg.msg_id, &body)?);
                }
                _ => {}
            }
        }
        Direction::ServerToClient => {
            tracing::error!(network_id, "unhandled OCPP direction: ServerToClient from a client");
            return Ok(());
        }
    }

    if send_to_mq {
        state
            .bus
            .send_client_message_with_retry(
                state.host_name.as_ref(),
                network_id,
                serde_json::to_value(&msg).expect("OcppMessage always serializes"),
            )
            .await?;
    }

    if !skip_ack && reply.is_none() {
        reply = Some(emit_ack(&msg.msg_id)?);
    }

    state.record_request();

    if let Some(frame) = reply {
        if let Some(conn) = state.connections.get(network_id) {
            tracing::debug!(network_id, frame = %String::from_utf8_lossy(&frame), "<-SendClient");
            let _ = conn.outbound.send(frame);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ocpp_bus::{Bus, TopicHandler};
    use ocpp_conf::Configuration;
    use ocpp_proto::OcppError;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct StubBus {
        published: StdMutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Bus for StubBus {
        async fn connect(&self) -> Result<(), OcppError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), OcppError> {
            Ok(())
        }
        async fn declare_queue(&self, _name: &str) -> Result<(), OcppError> {
            Ok(())
        }
        async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload.to_vec()));
            Ok(())
        }
        async fn publish_with_retry(&self, channel: &str, payload: &[u8]) -> Result<(), OcppError> {
            self.publish(channel, payload).await
        }
        async fn send_client_message_with_retry(
            &self,
            _server_node: &str,
            _client: &str,
            body: serde_json::Value,
        ) -> Result<(), OcppError> {
            self.published
                .lock()
                .unwrap()
                .push(("MessagesIn".to_string(), serde_json::to_vec(&body).unwrap()));
            Ok(())
        }
        async fn subscribe_topic(&self, _channel: &str, _routing_key: &str) -> Result<(), OcppError> {
            Ok(())
        }
        async fn run_topic_receiver(&self, _channel: &str, _handler: TopicHandler) -> Result<(), OcppError> {
            Ok(())
        }
    }

    fn test_state(standalone: bool) -> (AppState, Arc<StubBus>) {
        let mut config = Configuration::default();
        config.services.csms_server.standalone_mode = standalone;
        let stub = Arc::new(StubBus::default());
        let bus: Arc<dyn Bus> = stub.clone();
        (AppState::new(Arc::new(config), bus, "TestNode", None), stub)
    }

    fn published_channels(stub: &StubBus) -> Vec<String> {
        stub.published
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    #[tokio::test]
    async fn heartbeat_replies_immediately_and_publishes() {
        let (state, stub) = test_state(false);
        let raw = br#"[2,"id-1","Heartbeat",{}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert_eq!(published_channels(&stub), vec!["MessagesIn"]);
    }

    #[tokio::test]
    async fn heartbeat_in_standalone_mode_does_not_publish() {
        let (state, stub) = test_state(true);
        let raw = br#"[2,"id-1","Heartbeat",{}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert!(published_channels(&stub).is_empty());
    }

    #[tokio::test]
    async fn data_transfer_replies_unknown_vendor_and_does_not_publish() {
        let (state, stub) = test_state(false);
        let raw = br#"[2,"id-2","DataTransfer",{"vendorId":"acme"}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert!(published_channels(&stub).is_empty());
    }

    #[tokio::test]
    async fn start_transaction_publishes_and_skips_generic_ack() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (state, stub) = test_state(false);
        state.connections.insert(
            "cp-1".to_string(),
            ConnectionHandle {
                outbound: tx,
                remote_addr: "1.2.3.4:1".to_string(),
            },
        );
        let raw = br#"[2,"id-3","StartTransaction",{}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert_eq!(published_channels(&stub), vec!["MessagesIn"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped_not_republished() {
        let (state, stub) = test_state(false);
        let raw = br#"[3,"unknown-id",{}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert!(published_channels(&stub).is_empty());
    }

    #[tokio::test]
    async fn matched_reply_is_republished_and_consumed() {
        let (state, stub) = test_state(false);
        state.pending_client_replies.insert("id-4".to_string(), ());
        let raw = br#"[3,"id-4",{"status":"Accepted"}]"#;
        handle_message(&state, "cp-1", "1.2.3.4:1", raw).await.unwrap();
        assert_eq!(published_channels(&stub), vec!["MessagesIn"]);
        assert!(!state.pending_client_replies.contains_key("id-4"));
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_error() {
        let (state, stub) = test_state(false);
        assert!(handle_message(&state, "cp-1", "1.2.3.4:1", b"not json")
            .await
            .is_ok());
        assert!(published_channels(&stub).is_empty());
    }
}
