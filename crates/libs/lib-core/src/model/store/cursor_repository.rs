//! # Sync Cursor Repository
//!
//! Persists the change stream position a consumer has durably applied, keyed
//! by consumer name. The token is only written after the consumer's
//! downstream write was acknowledged, so a crash between the two replays at
//! most the in-flight event and never skips one.

use super::MongoStore;
use crate::error::Result;
use mongodb::bson::{doc, from_bson, to_bson, Document};
use mongodb::change_stream::event::ResumeToken;
use mongodb::Collection;

/// Consumer name the index synchronizer persists its position under.
pub const INDEX_SYNC_CONSUMER: &str = "index-sync";

/// Repository over the `sync_cursors` collection.
#[derive(Clone)]
pub struct CursorRepository {
    cursors: Collection<Document>,
}

impl CursorRepository {
    pub fn new(store: &MongoStore) -> Self {
        Self {
            cursors: store.sync_cursors(),
        }
    }

    /// Load the persisted position for `consumer`, if any.
    pub async fn load(&self, consumer: &str) -> Result<Option<ResumeToken>> {
        let record = self
            .cursors
            .find_one(doc! { "consumer": consumer })
            .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        match record.get("token") {
            Some(raw) => {
                let token = from_bson::<ResumeToken>(raw.clone())?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    /// Persist `token` as the position `consumer` has fully applied.
    pub async fn save(&self, consumer: &str, token: &ResumeToken) -> Result<()> {
        let record = doc! {
            "consumer": consumer,
            "token": to_bson(token)?,
            "updated_at": chrono::Utc::now().timestamp_millis(),
        };

        self.cursors
            .replace_one(doc! { "consumer": consumer }, record)
            .upsert(true)
            .await?;

        Ok(())
    }

    /// Drop the persisted position for `consumer`.
    ///
    /// Used when the store reports the token unresumable; the next feed open
    /// starts from "now" and a resync is recommended.
    pub async fn clear(&self, consumer: &str) -> Result<()> {
        self.cursors
            .delete_one(doc! { "consumer": consumer })
            .await?;

        Ok(())
    }
}
