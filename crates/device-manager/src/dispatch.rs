//! Action dispatch: mints a CSMS→CP request, publishes it to `MessagesOut`,
//! and waits for the CP's correlated reply. Matches
//! `original_source/src/device-manager/device_manager.go`'s
//! `action_SendPayloadToCharger`/`action_dataTransfer`.

use crate::state::AppState;
use ocpp_bus::CHANNEL_MESSAGES_OUT;
use ocpp_proto::{message::generate_msg_id, Direction, Envelope, OcppError, OcppMessage};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::timeout;

/// Mirrors the original's `ActionResponse{statusCode?, msgId?, messageBody?}`.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(rename = "msgId", skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(rename = "messageBody", skip_serializing_if = "Option::is_none")]
    pub message_body: Option<Value>,
}

impl ActionResponse {
    fn message(text: impl Into<String>) -> Self {
        Self {
            status_code: None,
            msg_id: None,
            message_body: Some(Value::String(text.into())),
        }
    }
}

pub enum Outcome {
    /// HTTP 200, the CP's own reply body re-stringified into `messageBody`.
    Completed(ActionResponse),
    /// HTTP 200, `messageBody` names the timeout.
    TimedOut(ActionResponse),
    /// HTTP 404, `networkId` isn't a known device.
    DeviceNotFound,
}

impl Outcome {
    pub fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        match self {
            Outcome::Completed(body) => (StatusCode::OK, axum::Json(body)).into_response(),
            Outcome::TimedOut(body) => (StatusCode::OK, axum::Json(body)).into_response(),
            // Missing device: HTTP 404 without body.
            Outcome::DeviceNotFound => StatusCode::NOT_FOUND.into_response(),
        }
    }
}

/// Sends `message_type` with `body` to the CP behind `network_id` and waits
/// up to [`ocpp_proto::constants::ACTION_TIMEOUT_SECS`] for its reply.
pub async fn send_action(
    state: &AppState,
    network_id: &str,
    message_type: &str,
    body: Value,
) -> Outcome {
    let device = match state.devices.get_device(network_id).await {
        Ok(d) => d,
        Err(_) => return Outcome::DeviceNotFound,
    };

    let msg_id = generate_msg_id();
    let ocpp_message = OcppMessage {
        direction: Direction::ClientToServer,
        msg_id: msg_id.clone(),
        message_type: Some(message_type.to_string()),
        message_body: body,
    };

    let rx = state.registry.register(msg_id.clone());

    let publish_result = publish_request(state, &device.server_node, &device.network_id, &ocpp_message).await;
    if let Err(e) = publish_result {
        state.registry.cancel_and_remove(&msg_id);
        tracing::error!(network_id, error = %e, "error sending reply to MQ, msg lost");
        return Outcome::Completed(ActionResponse::message(
            "Error sending reply to MQ, msg lost",
        ));
    }

    let outcome = match timeout(Duration::from_secs(ocpp_proto::constants::ACTION_TIMEOUT_SECS), rx).await {
        Ok(Ok(response_body)) => {
            let text = serde_json::to_string(&response_body).unwrap_or_default();
            tracing::info!(network_id, response = %text, "action response");
            Outcome::Completed(ActionResponse::message(text))
        }
        Ok(Err(_)) => {
            tracing::error!(network_id, "waiter dropped without a reply");
            Outcome::TimedOut(ActionResponse::message("Timed out waiting for response"))
        }
        Err(_) => {
            tracing::error!(network_id, "timed out waiting for response");
            Outcome::TimedOut(ActionResponse::message("Timed out waiting for response"))
        }
    };

    state.registry.cancel_and_remove(&msg_id);
    outcome
}

async fn publish_request(
    state: &AppState,
    server_node: &str,
    client: &str,
    message: &OcppMessage,
) -> Result<(), OcppError> {
    let body = serde_json::to_value(message)?;
    let envelope = Envelope::new(server_node, client, body);
    let payload = serde_json::to_vec(&envelope)?;
    state.bus.publish_with_retry(CHANNEL_MESSAGES_OUT, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Device, DeviceLookup};
    use crate::state::AppState;
    use async_trait::async_trait;
    use ocpp_bus::{Bus, TopicHandler};
    use ocpp_conf::Configuration;
    use ocpp_registry::CorrelationRegistry;
    use std::collections::HashMap;
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

    struct StubDeviceLookup {
        known: HashMap<String, String>,
    }

    #[async_trait]
    impl DeviceLookup for StubDeviceLookup {
        async fn get_device(&self, network_id: &str) -> Result<Device, OcppError> {
            match self.known.get(network_id) {
                Some(server_node) => Ok(Device {
                    network_id: network_id.to_string(),
                    server_node: server_node.clone(),
                }),
                None => Err(OcppError::not_found(format!("device {network_id}"))),
            }
        }
    }

    fn test_state(known: &[(&str, &str)]) -> (AppState, std::sync::Arc<StubBus>) {
        let stub = std::sync::Arc::new(StubBus::default());
        let bus: std::sync::Arc<dyn Bus> = stub.clone();
        let devices: std::sync::Arc<dyn DeviceLookup> = std::sync::Arc::new(StubDeviceLookup {
            known: known
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        let state = AppState {
            config: std::sync::Arc::new(Configuration::default()),
            bus,
            host_name: "TestNode".into(),
            registry: CorrelationRegistry::new(),
            devices,
        };
        (state, stub)
    }

    #[tokio::test]
    async fn unknown_device_returns_not_found() {
        let (state, _stub) = test_state(&[]);
        let outcome = send_action(&state, "cp-missing", "Reset", serde_json::json!({})).await;
        assert!(matches!(outcome, Outcome::DeviceNotFound));
    }

    #[tokio::test]
    async fn known_device_publishes_and_times_out_without_reply() {
        let (state, stub) = test_state(&[("cp-1", "Node1")]);
        let outcome = send_action(&state, "cp-1", "Reset", serde_json::json!({"type": "Hard"})).await;
        assert!(matches!(outcome, Outcome::TimedOut(_)));
        let published = stub.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, CHANNEL_MESSAGES_OUT);
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn known_device_completes_when_reply_arrives_before_timeout() {
        let (state, stub) = test_state(&[("cp-1", "Node1")]);
        let registry = state.registry.clone();

        let replier = tokio::spawn(async move {
            loop {
                if registry.len() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let msg_id = {
                let published = stub.published.lock().unwrap();
                let (_, payload) = &published[0];
                let envelope: ocpp_proto::Envelope = serde_json::from_slice(payload).unwrap();
                let msg: OcppMessage = serde_json::from_value(envelope.body).unwrap();
                msg.msg_id
            };
            assert!(registry.complete(&msg_id, serde_json::json!({"status": "Accepted"})));
        });

        let outcome = send_action(&state, "cp-1", "Reset", serde_json::json!({"type": "Hard"})).await;
        replier.await.unwrap();

        match outcome {
            Outcome::Completed(resp) => {
                assert_eq!(
                    resp.message_body,
                    Some(Value::String(
                        serde_json::to_string(&serde_json::json!({"status": "Accepted"})).unwrap()
                    ))
                );
            }
            _ => panic!("expected Completed outcome"),
        }
    }
}
