//! # Change Events
//!
//! [`ChangeEvent`] is the normalized unit of change: one store mutation,
//! decoded from a raw change notification into the shape both consumer paths
//! (broadcast hub, index synchronizer) understand.
//!
//! ## Normalization rules
//!
//! - `insert` / `update` / `replace` carry the full current document when the
//!   store supplies one; a partial document is passed through as-is and
//!   downstream consumers treat missing fields as "unchanged", never
//!   "cleared".
//! - `delete` carries only the durable identity, plus the pre-image when the
//!   store recorded one. Consumers needing a lost field (the channel id for
//!   routing) fall back to broadcasting.
//! - Administrative notifications (`drop`, `rename`, `invalidate`, ...) do
//!   not decode into events; the feed handles them as stream lifecycle.

use mongodb::bson::{Bson, Document};
use mongodb::change_stream::event::ResumeToken;

/// Store mutation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// Which logical collection an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedCollection {
    /// The `messages` collection: one document per logged chat message.
    Messages,
    /// The `activated_chats` collection: one document per logging-enabled
    /// channel.
    ChatActivations,
}

impl WatchedCollection {
    /// Collection name in the store.
    pub fn name(&self) -> &'static str {
        match self {
            WatchedCollection::Messages => "messages",
            WatchedCollection::ChatActivations => "activated_chats",
        }
    }
}

/// Normalized representation of one store mutation.
///
/// Immutable once produced; consumers receive it by value off the event bus.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub operation: ChangeOperation,
    pub collection: WatchedCollection,
    /// The entity's durable identity (store `_id`, rendered as hex for
    /// object ids).
    pub document_id: String,
    /// Complete (or partial, on a projection gap) current entity state.
    /// Present for insert/update, absent for delete.
    pub full_document: Option<Document>,
    /// Entity state before a delete, when the store supplies a pre-image.
    pub pre_image: Option<Document>,
    /// Opaque stream position of this event, attached by the feed so the
    /// index synchronizer can persist its cursor after applying it.
    pub resume_token: Option<ResumeToken>,
}

impl ChangeEvent {
    /// Decode a raw change notification document.
    ///
    /// Returns `None` for notifications that do not map to an entity
    /// mutation (stream administrivia) or that carry no usable identity.
    pub fn from_document(collection: WatchedCollection, raw: &Document) -> Option<Self> {
        let operation = match raw.get_str("operationType").ok()? {
            "insert" => ChangeOperation::Insert,
            "update" | "replace" => ChangeOperation::Update,
            "delete" => ChangeOperation::Delete,
            _ => return None,
        };

        let document_id = raw
            .get_document("documentKey")
            .ok()
            .and_then(|key| key.get("_id"))
            .map(identity_string)?;

        let full_document = raw.get_document("fullDocument").ok().cloned();
        let pre_image = raw.get_document("fullDocumentBeforeChange").ok().cloned();

        Some(ChangeEvent {
            operation,
            collection,
            document_id,
            full_document,
            pre_image,
            resume_token: None,
        })
    }

    /// The event's channel identifier, when recoverable.
    ///
    /// Reads `chat_id` from the current document, falling back to the
    /// pre-image for deletes. `None` means the channel cannot be determined
    /// and routing must fall back to a global broadcast.
    pub fn channel(&self) -> Option<i64> {
        self.full_document
            .as_ref()
            .and_then(chat_id_of)
            .or_else(|| self.pre_image.as_ref().and_then(chat_id_of))
    }
}

/// Render a store `_id` as the opaque durable identity every consumer keys
/// on: object ids as hex, strings as-is.
pub fn identity_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn chat_id_of(doc: &Document) -> Option<i64> {
    match doc.get("chat_id") {
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};

    #[test]
    fn decodes_insert_with_full_document() {
        let oid = ObjectId::new();
        let raw = doc! {
            "operationType": "insert",
            "documentKey": { "_id": oid },
            "fullDocument": { "_id": oid, "message_id": 1i64, "chat_id": 42i64, "text": "hi" },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw)
            .expect("insert should decode");

        assert_eq!(event.operation, ChangeOperation::Insert);
        assert_eq!(event.collection, WatchedCollection::Messages);
        assert_eq!(event.document_id, oid.to_hex());
        assert_eq!(event.channel(), Some(42));
        assert!(event.full_document.is_some());
        assert!(event.pre_image.is_none());
    }

    #[test]
    fn replace_decodes_as_update() {
        let raw = doc! {
            "operationType": "replace",
            "documentKey": { "_id": "m1" },
            "fullDocument": { "message_id": 1i64, "chat_id": 42i64 },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw).unwrap();

        assert_eq!(event.operation, ChangeOperation::Update);
        assert_eq!(event.document_id, "m1");
    }

    #[test]
    fn update_without_full_document_still_decodes() {
        // Projection gap: the lookup raced a subsequent delete. The event is
        // still emitted with the identity only.
        let raw = doc! {
            "operationType": "update",
            "documentKey": { "_id": "m1" },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw).unwrap();

        assert!(event.full_document.is_none());
        assert_eq!(event.channel(), None);
    }

    #[test]
    fn delete_recovers_channel_from_pre_image() {
        let raw = doc! {
            "operationType": "delete",
            "documentKey": { "_id": "m1" },
            "fullDocumentBeforeChange": { "message_id": 1i64, "chat_id": 42i64 },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw).unwrap();

        assert_eq!(event.operation, ChangeOperation::Delete);
        assert!(event.full_document.is_none());
        assert_eq!(event.channel(), Some(42));
    }

    #[test]
    fn delete_without_pre_image_has_no_channel() {
        let raw = doc! {
            "operationType": "delete",
            "documentKey": { "_id": "m1" },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw).unwrap();

        assert_eq!(event.channel(), None);
    }

    #[test]
    fn administrative_notifications_do_not_decode() {
        for op in ["drop", "rename", "invalidate", "dropDatabase"] {
            let raw = doc! { "operationType": op };
            assert!(ChangeEvent::from_document(WatchedCollection::Messages, &raw).is_none());
        }
    }

    #[test]
    fn missing_document_key_does_not_decode() {
        let raw = doc! { "operationType": "insert", "fullDocument": { "chat_id": 1i64 } };
        assert!(ChangeEvent::from_document(WatchedCollection::Messages, &raw).is_none());
    }

    #[test]
    fn channel_reads_int32_chat_ids() {
        let raw = doc! {
            "operationType": "insert",
            "documentKey": { "_id": "m1" },
            "fullDocument": { "chat_id": 42i32 },
        };

        let event = ChangeEvent::from_document(WatchedCollection::Messages, &raw).unwrap();

        assert_eq!(event.channel(), Some(42));
    }
}
