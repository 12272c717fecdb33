//! # Index Documents
//!
//! The denormalized mirror of a message entity the search index holds: the
//! searchable text fields, the filterable scalars, and nothing else. One
//! document per message, keyed by the entity's durable identity so repeated
//! upserts of the same state converge.

use lib_core::error::{AppError, Result};
use lib_core::model::message::StoredMessage;
use mongodb::bson::{from_document, Document};
use serde::{Deserialize, Serialize};

/// Fields full-text search runs over.
pub const SEARCHABLE_FIELDS: &[&str] = &[
    "text",
    "caption",
    "sender_first_name",
    "sender_last_name",
    "sender_username",
];

/// Fields queries may filter on.
pub const FILTERABLE_FIELDS: &[&str] = &["chat_id", "sender_id", "date", "edited"];

/// Fields queries may sort on. `message_id` is the per-channel sequence id.
pub const SORTABLE_FIELDS: &[&str] = &["date", "message_id"];

/// One indexed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Durable identity (the store `_id` as hex); the index primary key.
    pub id: String,
    pub message_id: i64,
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    pub date: i64,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

impl IndexDocument {
    /// Transform a stored message into its index mirror.
    pub fn from_message(document_id: &str, msg: &StoredMessage) -> Self {
        let sender = msg.from_user.as_ref();
        Self {
            id: document_id.to_string(),
            message_id: msg.message_id,
            chat_id: msg.chat_id,
            text: msg.text.clone(),
            caption: msg.caption.clone(),
            sender_id: sender.map(|s| s.id),
            sender_first_name: sender.and_then(|s| s.first_name.clone()),
            sender_last_name: sender.and_then(|s| s.last_name.clone()),
            sender_username: sender.and_then(|s| s.username.clone()),
            date: msg.date,
            edited: msg.was_edited || msg.edit_date.is_some(),
            message_thread_id: msg.message_thread_id,
        }
    }

    /// Transform a raw store document.
    ///
    /// Fails with [`AppError::IndexWrite`] when the document lacks the
    /// message shape (missing natural key); callers skip-and-log, never
    /// abort the batch.
    pub fn from_document(document_id: &str, doc: &Document) -> Result<Self> {
        let msg: StoredMessage = from_document(doc.clone()).map_err(|e| {
            AppError::IndexWrite(format!("message {document_id} failed transform: {e}"))
        })?;
        Ok(Self::from_message(document_id, &msg))
    }
}
