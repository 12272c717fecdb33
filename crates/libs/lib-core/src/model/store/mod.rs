//! # Document Store
//!
//! MongoDB client handle and repository implementations.

// region:    --- Modules
pub mod cursor_repository;
pub mod message_repository;
// endregion: --- Modules

// region:    --- Re-exports
pub use cursor_repository::CursorRepository;
pub use message_repository::{MessageBackfill, MessageRepository};
// endregion: --- Re-exports

// region:    --- Types and Functions
use crate::error::Result;
use mongodb::bson::{doc, Document};
use mongodb::{Client, Collection, Database};

/// Shared handle to the authoritative store.
///
/// Read-only for every feed consumer; the only writes this subsystem issues
/// are to its own `sync_cursors` collection.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Connect to the store and fail fast if it is unreachable.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);

        // The driver connects lazily; ping so a bad URI surfaces at startup
        // instead of on the first watched notification.
        db.run_command(doc! { "ping": 1 }).await?;

        Ok(Self { db })
    }

    /// The `messages` collection.
    pub fn messages(&self) -> Collection<Document> {
        self.db.collection("messages")
    }

    /// The `activated_chats` collection.
    pub fn activated_chats(&self) -> Collection<Document> {
        self.db.collection("activated_chats")
    }

    /// The `sync_cursors` collection (this subsystem's own state).
    pub fn sync_cursors(&self) -> Collection<Document> {
        self.db.collection("sync_cursors")
    }
}
// endregion: --- Types and Functions
