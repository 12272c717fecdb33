//! # Message Repository
//!
//! Read-side access to the `messages` collection: full enumeration for index
//! backfill and counts for the status surface.

use super::MongoStore;
use crate::error::Result;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::Cursor;

/// Message repository for store operations.
pub struct MessageRepository;

impl MessageRepository {
    /// Total number of logged messages.
    pub async fn count(store: &MongoStore) -> Result<u64> {
        let count = store.messages().count_documents(doc! {}).await?;
        Ok(count)
    }

    /// Open a full enumeration of the message store in natural (`_id`)
    /// order, for consumption in bounded batches.
    pub async fn open_backfill(store: &MongoStore, batch_size: usize) -> Result<MessageBackfill> {
        let cursor = store
            .messages()
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .batch_size(batch_size as u32)
            .await?;

        Ok(MessageBackfill { cursor })
    }
}

/// Streaming enumeration over every message record.
pub struct MessageBackfill {
    cursor: Cursor<Document>,
}

impl MessageBackfill {
    /// Pull up to `limit` documents. An empty vec means the enumeration is
    /// exhausted.
    pub async fn next_batch(&mut self, limit: usize) -> Result<Vec<Document>> {
        let mut batch = Vec::with_capacity(limit);

        while batch.len() < limit {
            match self.cursor.try_next().await? {
                Some(doc) => batch.push(doc),
                None => break,
            }
        }

        Ok(batch)
    }
}
