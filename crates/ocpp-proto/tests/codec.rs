use ocpp_proto::message::{self, Direction};
use ocpp_proto::{Envelope, NotifyMessage};

#[test]
fn boot_notification_request_round_trips_through_envelope() {
    let raw = br#"[2,"msg-1","BootNotification",{"chargePointVendor":"Acme"}]"#;
    let parsed = message::parse(raw).unwrap();
    assert_eq!(parsed.direction, Direction::ClientToServer);
    assert_eq!(parsed.message_type.as_deref(), Some("BootNotification"));

    let envelope = Envelope::new("Node1", "cp-42", serde_json::to_value(&parsed).unwrap());
    let wire = serde_json::to_string(&envelope).unwrap();
    let back: Envelope = serde_json::from_str(&wire).unwrap();
    assert_eq!(back.client, "cp-42");
    assert_eq!(back.body["msg_id"], "msg-1");
}

#[test]
fn heartbeat_ack_uses_reply_direction_and_empty_body() {
    let frame = message::emit_ack("msg-2").unwrap();
    let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
    assert_eq!(value, serde_json::json!([3, "msg-2", {}]));
}

#[test]
fn client_connect_notify_carries_network_id() {
    let notify = NotifyMessage::client_connected("Node1", "10.0.0.5:5555", "cp-7");
    let json = serde_json::to_value(&notify).unwrap();
    assert_eq!(json["notifyType"], "ClientConnected");
    assert_eq!(json["networkId"], "cp-7");
}
