//! Consumes `MessagesOut` and writes each envelope down to the right CP's
//! WebSocket, matching `original_source/src/csms-server/csms_server.go`'s
//! `ProcessRecvMqMessage`.

use crate::state::AppState;
use ocpp_proto::message::{emit_ack, emit_request, emit_result};
use ocpp_proto::{Direction, Envelope, OcppMessage};

/// Handles one `MessagesOut` delivery: looks up the target CP's connection
/// by `client`, rebuilds the wire frame from the envelope body, and writes
/// it down. A client that's already gone just drops the message — the CP
/// will find out it missed something the next time it asks.
pub async fn handle_messages_out(state: &AppState, payload: Vec<u8>) {
    let envelope: Envelope = match serde_json::from_slice(&payload) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "MessagesOut delivery, unmarshal error");
            return;
        }
    };

    let Some(conn) = state.connections.get(&envelope.client) else {
        tracing::warn!(client = %envelope.client, "client no longer exists, message lost");
        return;
    };

    let inner: OcppMessage = match serde_json::from_value(envelope.body) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(client = %envelope.client, error = %e, "unable to unmarshal inner message");
            return;
        }
    };

    let frame = match inner.message_type.as_deref() {
        Some(message_type) => {
            state
                .pending_client_replies
                .insert(inner.msg_id.clone(), ());
            emit_request(
                Direction::ServerToClient,
                &inner.msg_id,
                message_type,
                &inner.message_body,
            )
        }
        None => {
            if inner.message_body.is_null() {
                emit_ack(&inner.msg_id)
            } else {
                emit_result(&inner.msg_id, &inner.message_body)
            }
        }
    };

    let frame = match frame {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(client = %envelope.client, error = %e, "unable to build reply frame");
            return;
        }
    };

    tracing::debug!(client = %envelope.client, frame = %String::from_utf8_lossy(&frame), "reply");
    if conn.outbound.send(frame).is_err() {
        tracing::warn!(client = %envelope.client, "outbound channel closed, message lost");
    }
}
