//! # Stream Frames
//!
//! Wire frames exchanged over the viewer WebSocket.
//!
//! Outbound [`EventFrame`]s carry one store mutation each; inbound
//! [`ControlFrame`]s mutate the sending session's channel subscriptions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of an outbound event frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A message was inserted into the store.
    NewMessage,
    /// An existing message changed (edit, media caption update, ...).
    UpdateMessage,
    /// A message was removed from the store.
    DeleteMessage,
    /// A new channel was activated for logging.
    NewGroup,
}

/// One delivered store mutation, pushed to a subscribed viewer.
///
/// The payload is entity-shaped for `new_message` / `update_message` /
/// `new_group`. For `delete_message` only the identity survives:
/// `{"id": <identity>, "chat_id": <channel or null>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl EventFrame {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Kind of an inbound control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Subscribe,
    Unsubscribe,
}

/// Subscription mutation sent by a viewer.
///
/// `chatId` is the channel identifier the viewer wants to start or stop
/// receiving events for. A session that never subscribes receives every
/// event (global listener).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(rename = "chatId")]
    pub chat_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_frame_uses_client_type_names() {
        let frame = EventFrame::new(
            EventKind::NewMessage,
            json!({"id": "m1", "chat_id": 42, "text": "hi"}),
        );

        let wire = serde_json::to_value(&frame).unwrap();

        assert_eq!(wire["type"], "new_message");
        assert_eq!(wire["payload"]["chat_id"], 42);
        assert_eq!(wire["payload"]["text"], "hi");
    }

    #[test]
    fn delete_frame_carries_identity_and_channel_only() {
        let frame = EventFrame::new(
            EventKind::DeleteMessage,
            json!({"id": "m1", "chat_id": Value::Null}),
        );

        let wire = serde_json::to_string(&frame).unwrap();

        assert!(wire.contains(r#""type":"delete_message""#));
        assert!(wire.contains(r#""chat_id":null"#));
    }

    #[test]
    fn control_frame_parses_subscribe_and_unsubscribe() {
        let sub: ControlFrame =
            serde_json::from_str(r#"{"type":"subscribe","chatId":7}"#).unwrap();
        assert_eq!(sub.kind, ControlKind::Subscribe);
        assert_eq!(sub.chat_id, 7);

        let unsub: ControlFrame =
            serde_json::from_str(r#"{"type":"unsubscribe","chatId":7}"#).unwrap();
        assert_eq!(unsub.kind, ControlKind::Unsubscribe);
    }

    #[test]
    fn control_frame_rejects_unknown_type() {
        let res = serde_json::from_str::<ControlFrame>(r#"{"type":"shout","chatId":7}"#);
        assert!(res.is_err());
    }
}
