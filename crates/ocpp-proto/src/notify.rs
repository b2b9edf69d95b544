//! Connect/disconnect events published on the `Notify` channel.

use crate::constants::{
    NOTIFY_CLIENT_CONNECTED, NOTIFY_CLIENT_DISCONNECTED, NOTIFY_NODE_CONNECTED,
    NOTIFY_NODE_DISCONNECTED,
};
use crate::message::now_iso8601;
use serde::{Deserialize, Serialize};

/// A node- or client-level connection change, published to `Notify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyMessage {
    #[serde(rename = "queuedTime")]
    pub queued_time: String,
    #[serde(rename = "serverNode")]
    pub server_node: String,
    #[serde(rename = "notifyType")]
    pub notify_type: String,
    #[serde(rename = "remoteAddr", skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(rename = "networkId", skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

impl NotifyMessage {
    fn node_event(server_node: impl Into<String>, notify_type: &str) -> Self {
        Self {
            queued_time: now_iso8601(),
            server_node: server_node.into(),
            notify_type: notify_type.to_string(),
            remote_addr: None,
            network_id: None,
        }
    }

    pub fn node_connected(server_node: impl Into<String>) -> Self {
        Self::node_event(server_node, NOTIFY_NODE_CONNECTED)
    }

    pub fn node_disconnected(server_node: impl Into<String>) -> Self {
        Self::node_event(server_node, NOTIFY_NODE_DISCONNECTED)
    }

    fn client_event(
        server_node: impl Into<String>,
        remote_addr: impl Into<String>,
        network_id: impl Into<String>,
        notify_type: &str,
    ) -> Self {
        Self {
            queued_time: now_iso8601(),
            server_node: server_node.into(),
            notify_type: notify_type.to_string(),
            remote_addr: Some(remote_addr.into()),
            network_id: Some(network_id.into()),
        }
    }

    pub fn client_connected(
        server_node: impl Into<String>,
        remote_addr: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self::client_event(server_node, remote_addr, network_id, NOTIFY_CLIENT_CONNECTED)
    }

    pub fn client_disconnected(
        server_node: impl Into<String>,
        remote_addr: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self::client_event(
            server_node,
            remote_addr,
            network_id,
            NOTIFY_CLIENT_DISCONNECTED,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_events_omit_client_fields() {
        let json = serde_json::to_value(NotifyMessage::node_connected("Node1")).unwrap();
        assert!(json.get("remoteAddr").is_none());
        assert!(json.get("networkId").is_none());
        assert_eq!(json["notifyType"], "NodeConnected");
    }

    #[test]
    fn client_events_carry_network_id() {
        let json =
            serde_json::to_value(NotifyMessage::client_connected("Node1", "1.2.3.4:9000", "cp-1"))
                .unwrap();
        assert_eq!(json["networkId"], "cp-1");
        assert_eq!(json["notifyType"], "ClientConnected");
    }
}
