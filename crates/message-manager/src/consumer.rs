//! `MessagesIn` consumer: archives every received envelope, matching
//! `original_source/src/message-manager/processMessages.go`'s
//! `ProcessRecvMessage`. Gating on `store_messages` happens at
//! subscription time in `main`, not here.

use crate::state::AppState;
use chrono::Utc;
use ocpp_proto::{Direction, OcppMessage};

pub async fn handle_messages_in(state: &AppState, payload: Vec<u8>) {
    let envelope: ocpp_proto::Envelope = match serde_json::from_slice(&payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "MQ received message, unmarshal error");
            return;
        }
    };

    let direction = match serde_json::from_value::<OcppMessage>(envelope.body.clone()) {
        Ok(msg) => msg.direction,
        Err(e) => {
            tracing::error!(error = %e, "error reading direction from message body");
            return;
        }
    };

    let received_at_ms = Utc::now().timestamp_millis();
    tracing::debug!(client = %envelope.client, received_at_ms, "add message");

    if let Err(e) = state
        .archive
        .insert_message(
            &envelope.client,
            received_at_ms,
            &envelope.server_node,
            &direction_label(direction),
            &envelope.message_time,
            envelope.body,
        )
        .await
    {
        tracing::error!(error = %e, "error archiving message");
    }
}

fn direction_label(direction: Direction) -> String {
    (direction as i64).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ArchiveSink;
    use async_trait::async_trait;
    use ocpp_bus::{Bus, TopicHandler};
    use ocpp_conf::Configuration;
    use ocpp_proto::{Envelope, OcppError};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct StubBus;

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
        async fn publish(&self, _channel: &str, _payload: &[u8]) -> Result<(), OcppError> {
            Ok(())
        }
        async fn publish_with_retry(&self, _channel: &str, _payload: &[u8]) -> Result<(), OcppError> {
            Ok(())
        }
        async fn send_client_message_with_retry(
            &self,
            _server_node: &str,
            _client: &str,
            _body: Value,
        ) -> Result<(), OcppError> {
            Ok(())
        }
        async fn subscribe_topic(&self, _channel: &str, _routing_key: &str) -> Result<(), OcppError> {
            Ok(())
        }
        async fn run_topic_receiver(&self, _channel: &str, _handler: TopicHandler) -> Result<(), OcppError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubArchive {
        rows: StdMutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ArchiveSink for StubArchive {
        async fn insert_message(
            &self,
            client: &str,
            _received_at_ms: i64,
            server_node: &str,
            direction: &str,
            _message_time: &str,
            _body: Value,
        ) -> Result<(), OcppError> {
            self.rows.lock().unwrap().push((
                client.to_string(),
                server_node.to_string(),
                direction.to_string(),
            ));
            Ok(())
        }
    }

    fn test_state() -> (AppState, Arc<StubArchive>) {
        let archive = Arc::new(StubArchive::default());
        let state = AppState {
            config: Arc::new(Configuration::default()),
            bus: Arc::new(StubBus::default()),
            host_name: "TestNode".into(),
            archive: archive.clone(),
        };
        (state, archive)
    }

    fn envelope_payload(direction: Direction) -> Vec<u8> {
        let inner = OcppMessage {
            direction,
            msg_id: "msg-1".to_string(),
            message_type: Some("Heartbeat".to_string()),
            message_body: serde_json::json!({}),
        };
        let body = serde_json::to_value(&inner).unwrap();
        let envelope = Envelope::new("Node1", "cp-1", body);
        serde_json::to_vec(&envelope).unwrap()
    }

    #[tokio::test]
    async fn archives_the_envelope_with_its_direction_label() {
        let (state, archive) = test_state();
        handle_messages_in(&state, envelope_payload(Direction::ClientToServer)).await;
        let rows = archive.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], ("cp-1".to_string(), "Node1".to_string(), "2".to_string()));
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let (state, archive) = test_state();
        handle_messages_in(&state, b"not json".to_vec()).await;
        assert!(archive.rows.lock().unwrap().is_empty());
    }
}
