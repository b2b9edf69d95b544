//! OCPP 1.6-J wire message: the `[direction, msgId, ...]` JSON array frame
//! exchanged between a charge point and the gateway.

use crate::error::OcppError;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// First element of every OCPP wire frame. Serializes as its bare integer,
/// not its variant name — every consumer on the bus (`device-manager`,
/// `session`, `message-manager`) reads `body["direction"]` as a JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Direction {
    /// CSMS-initiated request, reaching a charge point.
    ServerToClient = 1,
    /// Charge-point-initiated request, reaching the CSMS.
    ClientToServer = 2,
    /// A reply to either of the above.
    Reply = 3,
}

impl Direction {
    fn from_i64(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::ServerToClient),
            2 => Some(Self::ClientToServer),
            3 => Some(Self::Reply),
            _ => None,
        }
    }
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*self as i64)
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let n = i64::deserialize(deserializer)?;
        Direction::from_i64(n).ok_or_else(|| serde::de::Error::custom(format!("unknown direction: {n}")))
    }
}

/// A parsed OCPP frame. `message_type` is only present on `ClientToServer`
/// and `ServerToClient` frames; a `Reply` frame is three elements wide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcppMessage {
    pub direction: Direction,
    pub msg_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    pub message_body: Value,
}

/// Reads just the leading direction integer out of a frame without fully
/// decoding it, so a malformed body can still be rejected with a direction.
pub fn peek_direction(buf: &[u8]) -> Result<Direction, OcppError> {
    let parsed: Value = serde_json::from_slice(buf)?;
    let arr = parsed
        .as_array()
        .ok_or_else(|| OcppError::malformed("frame is not a JSON array"))?;
    let first = arr
        .first()
        .ok_or_else(|| OcppError::malformed("frame is empty"))?;
    let n = first
        .as_i64()
        .ok_or_else(|| OcppError::malformed("first element is not a number"))?;
    Direction::from_i64(n).ok_or_else(|| OcppError::malformed(format!("unknown direction: {n}")))
}

/// Parses a raw WebSocket text frame into an [`OcppMessage`].
///
/// `ClientToServer`/`ServerToClient` frames are `[direction, msgId, messageType, body]`;
/// `Reply` frames are `[direction, msgId, body]`.
pub fn parse(buf: &[u8]) -> Result<OcppMessage, OcppError> {
    let direction = peek_direction(buf)?;
    let arr: Vec<Value> = serde_json::from_slice(buf)?;

    match direction {
        Direction::ClientToServer | Direction::ServerToClient => {
            if arr.len() != 4 {
                return Err(OcppError::malformed(format!(
                    "expected 4-element frame, got {}",
                    arr.len()
                )));
            }
            let msg_id = arr[1]
                .as_str()
                .ok_or_else(|| OcppError::malformed("msgId is not a string"))?
                .to_string();
            let message_type = arr[2]
                .as_str()
                .ok_or_else(|| OcppError::malformed("messageType is not a string"))?
                .to_string();
            Ok(OcppMessage {
                direction,
                msg_id,
                message_type: Some(message_type),
                message_body: arr[3].clone(),
            })
        }
        Direction::Reply => {
            if arr.len() != 3 {
                return Err(OcppError::malformed(format!(
                    "expected 3-element frame, got {}",
                    arr.len()
                )));
            }
            let msg_id = arr[1]
                .as_str()
                .ok_or_else(|| OcppError::malformed("msgId is not a string"))?
                .to_string();
            Ok(OcppMessage {
                direction,
                msg_id,
                message_type: None,
                message_body: arr[2].clone(),
            })
        }
    }
}

/// Builds a `[3, msgId, body]` reply frame.
pub fn emit_result(msg_id: &str, body: &Value) -> Result<Vec<u8>, OcppError> {
    let frame = (Direction::Reply as i64, msg_id, body);
    Ok(serde_json::to_vec(&frame)?)
}

/// Builds a generic empty-object ACK reply: `[3, msgId, {}]`.
pub fn emit_ack(msg_id: &str) -> Result<Vec<u8>, OcppError> {
    emit_result(msg_id, &Value::Object(Default::default()))
}

/// Builds a `[direction, msgId, messageType, body]` request frame, where
/// `direction` is `ServerToClient` or `ClientToServer`.
pub fn emit_request(
    direction: Direction,
    msg_id: &str,
    message_type: &str,
    body: &Value,
) -> Result<Vec<u8>, OcppError> {
    if direction == Direction::Reply {
        return Err(OcppError::malformed(
            "emit_request called with Reply direction",
        ));
    }
    let frame = (direction as i64, msg_id, message_type, body);
    Ok(serde_json::to_vec(&frame)?)
}

/// Generates a fresh correlation id for an outgoing request.
pub fn generate_msg_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time in the `2006-01-02T15:04:05.000Z` layout used throughout
/// the wire protocol.
pub fn now_iso8601() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_to_server_frame() {
        let raw = br#"[2,"abc-123","Heartbeat",{}]"#;
        let msg = parse(raw).unwrap();
        assert_eq!(msg.direction, Direction::ClientToServer);
        assert_eq!(msg.msg_id, "abc-123");
        assert_eq!(msg.message_type.as_deref(), Some("Heartbeat"));
    }

    #[test]
    fn parses_reply_frame() {
        let raw = br#"[3,"abc-123",{"status":"Accepted"}]"#;
        let msg = parse(raw).unwrap();
        assert_eq!(msg.direction, Direction::Reply);
        assert!(msg.message_type.is_none());
        assert_eq!(msg.message_body["status"], "Accepted");
    }

    #[test]
    fn rejects_empty_array() {
        assert!(parse(b"[]").is_err());
    }

    #[test]
    fn rejects_unknown_direction() {
        assert!(parse(br#"[9,"x","Y",{}]"#).is_err());
    }

    #[test]
    fn emits_ack_as_empty_object() {
        let out = emit_ack("id-1").unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v, serde_json::json!([3, "id-1", {}]));
    }

    #[test]
    fn emits_request_frame() {
        let out = emit_request(
            Direction::ServerToClient,
            "id-2",
            "Reset",
            &serde_json::json!({"type": "Hard"}),
        )
        .unwrap();
        let v: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v, serde_json::json!([1, "id-2", "Reset", {"type": "Hard"}]));
    }

    #[test]
    fn refuses_emit_request_with_reply_direction() {
        assert!(emit_request(Direction::Reply, "id", "X", &Value::Null).is_err());
    }

    #[test]
    fn direction_serializes_as_a_bare_integer() {
        let msg = OcppMessage {
            direction: Direction::ClientToServer,
            msg_id: "id".into(),
            message_type: Some("Heartbeat".into()),
            message_body: Value::Null,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["direction"], serde_json::json!(2));
    }

    #[test]
    fn direction_roundtrips_through_json() {
        let json = serde_json::json!(3);
        let direction: Direction = serde_json::from_value(json).unwrap();
        assert_eq!(direction, Direction::Reply);
    }
}
