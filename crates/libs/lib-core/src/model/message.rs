//! # Stored Entities
//!
//! Document shapes for the two watched collections, as the logger bot writes
//! them. Every field except the compound natural key is optional or
//! defaulted: the store accepts whatever the upstream chat platform sent, and
//! partial documents must deserialize without loss.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Sender sub-document embedded in a message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

/// One preserved prior version of an edited message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRevision {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<i64>,
}

/// A logged chat message.
///
/// Keyed naturally by (`message_id`, `chat_id`); `_id` is the store-assigned
/// durable identity every downstream consumer keys on. Timestamps are unix
/// epoch values as the chat platform reports them (`date`, `edit_date` in
/// seconds; `logged_at` in milliseconds, stamped by the logger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub message_id: i64,
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_user: Option<Sender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default)]
    pub date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_date: Option<i64>,
    #[serde(default)]
    pub was_edited: bool,
    #[serde(default)]
    pub is_channel_post: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditRevision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<i64>,
}

/// A channel activated for logging.
///
/// Inserted once per channel the bot starts logging; insertion is the
/// "new group" announcement viewers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatActivation {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub chat_id: i64,
    pub chat_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, from_document, to_document};

    #[test]
    fn partial_message_document_deserializes() {
        // Projection gaps leave fields out entirely; they must come back as
        // None/default, not fail the decode.
        let doc = doc! {
            "message_id": 12i64,
            "chat_id": 42i64,
            "date": 1700000000i64,
        };

        let msg: StoredMessage = from_document(doc).expect("partial doc should decode");

        assert_eq!(msg.message_id, 12);
        assert_eq!(msg.chat_id, 42);
        assert!(msg.text.is_none());
        assert!(!msg.was_edited);
        assert!(msg.edit_history.is_empty());
    }

    #[test]
    fn message_round_trips_through_bson() {
        let msg = StoredMessage {
            id: None,
            message_id: 7,
            chat_id: -100123,
            from_user: Some(Sender {
                id: 5,
                first_name: Some("Ada".to_string()),
                last_name: None,
                username: Some("ada".to_string()),
                is_bot: false,
            }),
            text: Some("hello".to_string()),
            caption: None,
            date: 1700000001,
            message_thread_id: Some(3),
            edit_date: None,
            was_edited: false,
            is_channel_post: false,
            edit_history: vec![],
            logged_at: Some(1700000001500),
        };

        let doc = to_document(&msg).unwrap();
        let back: StoredMessage = from_document(doc).unwrap();

        assert_eq!(back, msg);
    }

    #[test]
    fn activation_document_decodes() {
        let doc = doc! {
            "chat_id": 7i64,
            "chat_title": "design",
            "activated_at": 1700000000000i64,
        };

        let activation: ChatActivation = from_document(doc).unwrap();

        assert_eq!(activation.chat_id, 7);
        assert_eq!(activation.chat_title, "design");
    }
}
