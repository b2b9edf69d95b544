//! `MessagesIn` consumer: turns a `StartTransaction` request into a
//! persisted `transactions` row and a `direction = 3` reply, matching
//! `original_source/src/session/processMessages.go`.

use crate::state::AppState;
use chrono::NaiveDateTime;
use ocpp_bus::CHANNEL_MESSAGES_OUT;
use ocpp_proto::{Direction, Envelope, OcppMessage};
use serde::Serialize;

#[derive(Debug, Default, Serialize)]
struct IdTagInfo {
    status: String,
}

#[derive(Debug, Default, Serialize)]
struct TransactionResponse {
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    transaction_id: Option<i64>,
    #[serde(rename = "idTagInfo")]
    id_tag_info: IdTagInfo,
}

pub async fn handle_messages_in(state: &AppState, payload: Vec<u8>) {
    let envelope: Envelope = match serde_json::from_slice(&payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "MQ received message, unmarshal error");
            return;
        }
    };

    let inner: OcppMessage = match serde_json::from_value(envelope.body.clone()) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "error unmarshalling ocpp message");
            return;
        }
    };

    if inner.direction != Direction::ClientToServer {
        return;
    }
    if inner.message_type.as_deref() != Some("StartTransaction") {
        return;
    }

    tracing::debug!(client = %envelope.client, "MQ received MessagesOut");

    let time_started_ms = match parse_message_time(&envelope.message_time) {
        Ok(ms) => ms,
        Err(e) => {
            tracing::error!(message_time = %envelope.message_time, error = %e, "unable to parse message time");
            0
        }
    };

    let response = match state
        .transactions
        .insert_next_transaction(&envelope.client, time_started_ms)
        .await
    {
        Ok(transaction_id) => TransactionResponse {
            transaction_id: Some(transaction_id),
            id_tag_info: IdTagInfo {
                status: "accepted".to_string(),
            },
        },
        Err(e) => {
            tracing::error!(error = %e, "error inserting transaction");
            TransactionResponse {
                transaction_id: None,
                id_tag_info: IdTagInfo {
                    status: "error".to_string(),
                },
            }
        }
    };

    let body = match serde_json::to_value(&response) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "error marshalling response");
            return;
        }
    };

    let reply = OcppMessage {
        direction: Direction::Reply,
        msg_id: inner.msg_id,
        message_type: None,
        message_body: body,
    };
    let reply_body = match serde_json::to_value(&reply) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "error marshalling reply envelope body");
            return;
        }
    };

    let out_envelope = Envelope::new(envelope.server_node, envelope.client, reply_body);
    let out_payload = match serde_json::to_vec(&out_envelope) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "error marshalling reply envelope");
            return;
        }
    };

    if let Err(e) = state.bus.publish_with_retry(CHANNEL_MESSAGES_OUT, &out_payload).await {
        tracing::error!(error = %e, "error sending reply to MQ, msg lost");
    }
}

fn parse_message_time(message_time: &str) -> Result<i64, chrono::ParseError> {
    let naive = NaiveDateTime::parse_from_str(message_time, "%Y-%m-%dT%H:%M:%S%.3fZ")?;
    Ok(naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TransactionSink;
    use async_trait::async_trait;
    use ocpp_bus::{Bus, TopicHandler};
    use ocpp_conf::Configuration;
    use ocpp_proto::OcppError;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::sync::Arc;

    #[test]
    fn parses_the_bus_timestamp_format() {
        let ms = parse_message_time("2024-03-15T10:48:10.637Z").unwrap();
        assert_eq!(ms, 1710499690637);
    }

    #[test]
    fn rejects_a_malformed_timestamp() {
        assert!(parse_message_time("not-a-time").is_err());
    }

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
            _body: serde_json::Value,
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

    struct StubTransactions {
        next_id: AtomicI64,
        fail: bool,
    }

    #[async_trait]
    impl TransactionSink for StubTransactions {
        async fn insert_next_transaction(
            &self,
            _client_id: &str,
            _time_started_ms: i64,
        ) -> Result<i64, OcppError> {
            if self.fail {
                return Err(OcppError::fatal("stub failure"));
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn test_state(fail: bool) -> (AppState, Arc<StubBus>) {
        let stub = Arc::new(StubBus::default());
        let bus: Arc<dyn Bus> = stub.clone();
        let transactions: Arc<dyn TransactionSink> = Arc::new(StubTransactions {
            next_id: AtomicI64::new(42),
            fail,
        });
        let state = AppState {
            config: Arc::new(Configuration::default()),
            bus,
            host_name: "TestNode".into(),
            transactions,
        };
        (state, stub)
    }

    fn envelope_payload(message_type: &str, direction: Direction) -> Vec<u8> {
        let inner = OcppMessage {
            direction,
            msg_id: "msg-1".to_string(),
            message_type: Some(message_type.to_string()),
            message_body: serde_json::json!({"idTag": "tag-1"}),
        };
        let body = serde_json::to_value(&inner).unwrap();
        let envelope = Envelope::new("Node1", "cp-1", body);
        serde_json::to_vec(&envelope).unwrap()
    }

    #[tokio::test]
    async fn start_transaction_inserts_and_replies_with_transaction_id() {
        let (state, stub) = test_state(false);
        let payload = envelope_payload("StartTransaction", Direction::ClientToServer);
        handle_messages_in(&state, payload).await;

        let published = stub.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, CHANNEL_MESSAGES_OUT);
        let out: Envelope = serde_json::from_slice(&published[0].1).unwrap();
        let reply: OcppMessage = serde_json::from_value(out.body).unwrap();
        assert_eq!(reply.direction, Direction::Reply);
        assert_eq!(reply.message_body["transactionId"], 42);
        assert_eq!(reply.message_body["idTagInfo"]["status"], "accepted");
    }

    #[tokio::test]
    async fn start_transaction_replies_with_error_status_on_db_failure() {
        let (state, stub) = test_state(true);
        let payload = envelope_payload("StartTransaction", Direction::ClientToServer);
        handle_messages_in(&state, payload).await;

        let published = stub.published.lock().unwrap();
        let out: Envelope = serde_json::from_slice(&published[0].1).unwrap();
        let reply: OcppMessage = serde_json::from_value(out.body).unwrap();
        assert!(reply.message_body.get("transactionId").is_none());
        assert_eq!(reply.message_body["idTagInfo"]["status"], "error");
    }

    #[tokio::test]
    async fn non_start_transaction_messages_are_ignored() {
        let (state, stub) = test_state(false);
        let payload = envelope_payload("Heartbeat", Direction::ClientToServer);
        handle_messages_in(&state, payload).await;
        assert!(stub.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_direction_messages_are_ignored() {
        let (state, stub) = test_state(false);
        let payload = envelope_payload("StartTransaction", Direction::Reply);
        handle_messages_in(&state, payload).await;
        assert!(stub.published.lock().unwrap().is_empty());
    }
}
