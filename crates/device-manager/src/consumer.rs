//! `MessagesIn` consumer: completes the waiter for every `direction = 3`
//! reply, matching `original_source/src/device-manager/process_messages.go`.

use crate::state::AppState;
use ocpp_proto::{Direction, Envelope, OcppMessage};

pub async fn handle_messages_in(state: &AppState, payload: Vec<u8>) {
    let envelope: Envelope = match serde_json::from_slice(&payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "MQ received message, unmarshal error");
            return;
        }
    };

    let inner: OcppMessage = match serde_json::from_value(envelope.body) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "error unmarshalling ocpp message");
            return;
        }
    };

    tracing::debug!(direction = ?inner.direction, msg_id = %inner.msg_id, "ocpp message response");
    if inner.direction != Direction::Reply {
        return;
    }

    if !state.registry.complete(&inner.msg_id, inner.message_body) {
        tracing::error!(msg_id = %inner.msg_id, "cannot find msgId");
    }
}
