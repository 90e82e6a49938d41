use super::*;
use crate::model::{Point, Stroke};

#[test]
fn failure_statuses() {
    assert!(ChannelStatus::ChannelError.is_failure());
    assert!(ChannelStatus::TimedOut.is_failure());
    assert!(!ChannelStatus::Connecting.is_failure());
    assert!(!ChannelStatus::Subscribed.is_failure());
    assert!(!ChannelStatus::Closed.is_failure());
}

#[test]
fn channel_names_match_wire_protocol() {
    assert_eq!(ChannelKind::Drawing.channel_name(), "drawing-room");
    assert_eq!(ChannelKind::Chat.channel_name(), "chat-room");
    assert_eq!(ChannelKind::Presence.channel_name(), "presence");
    assert_eq!(ChannelKind::Chat.to_string(), "chat-room");
}

#[test]
fn envelope_wire_shape() {
    let stroke = Stroke::new(vec![Point { x: 1.0, y: 2.0 }], "#000000", 3.0);
    let env = Envelope::stroke(&stroke, "user-1-abc").expect("encode");
    let json = serde_json::to_value(&env).expect("json");

    assert_eq!(json["type"], "stroke");
    assert_eq!(json["originId"], "user-1-abc");
    assert_eq!(json["payload"]["id"], stroke.id.as_str());
    assert_eq!(env.decode_stroke().expect("decode"), stroke);
}

#[test]
fn clear_envelope_has_null_payload() {
    let json = serde_json::to_value(Envelope::clear("me")).expect("json");
    assert_eq!(json["type"], "clear");
    assert!(json["payload"].is_null());
}

#[test]
fn envelope_without_payload_parses() {
    let env: Envelope = serde_json::from_str(r#"{"type":"clear","originId":"x"}"#).expect("parse");
    assert_eq!(env.kind, EventKind::Clear);
    assert!(env.payload.is_null());
}

#[test]
fn decoding_wrong_payload_fails() {
    let env = Envelope::clear("me");
    assert!(matches!(env.decode_message(), Err(TransportError::Encode(_))));
}

#[test]
fn presence_options() {
    let opts = ChannelOptions::presence("user-1");
    assert_eq!(opts.presence_key.as_deref(), Some("user-1"));
    assert!(!opts.receive_own);
    assert_eq!(ChannelOptions::default().presence_key, None);
}
