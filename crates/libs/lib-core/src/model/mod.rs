//! # Data Model
//!
//! Entity shapes, the normalized change event, and document store access.

// region:    --- Modules
pub mod event;
pub mod message;
pub mod store;
// endregion: --- Modules

// region:    --- Re-exports
pub use event::{ChangeEvent, ChangeOperation, WatchedCollection};
pub use message::{ChatActivation, EditRevision, Sender, StoredMessage};
// endregion: --- Re-exports
