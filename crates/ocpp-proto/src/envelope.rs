//! Bus-level envelope wrapping a charge point's message with routing
//! metadata, independent of the transport (`ocpp-bus`) that carries it.

use crate::message::now_iso8601;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wraps a message body with the routing metadata every bus backend needs
/// to get it back to the right front-end node and charge point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "serverNode")]
    pub server_node: String,
    pub client: String,
    #[serde(rename = "messageTime")]
    pub message_time: String,
    pub body: Value,
}

impl Envelope {
    pub fn new(server_node: impl Into<String>, client: impl Into<String>, body: Value) -> Self {
        Self {
            server_node: server_node.into(),
            client: client.into(),
            message_time: now_iso8601(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_field_names_match_the_wire_format() {
        let env = Envelope::new("Node1", "cp-1", serde_json::json!({"a": 1}));
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("serverNode").is_some());
        assert!(json.get("messageTime").is_some());
        assert!(json.get("client").is_some());
    }

    #[test]
    fn envelope_roundtrips() {
        let env = Envelope::new("Node1", "cp-1", serde_json::json!({"a": 1}));
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, parsed);
    }
}
