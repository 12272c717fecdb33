//! # Index Library
//!
//! Keeps the full-text search index eventually consistent with the
//! authoritative message store.
//!
//! ## Components
//!
//! - **[`document`]**: the denormalized [`IndexDocument`] mirror of a
//!   message entity and its transform
//! - **[`store`]**: the [`IndexStore`] seam and its Meilisearch
//!   implementation
//! - **[`synchronizer`]**: backfill (full re-derivation) and incremental
//!   sync (continuous change application), both idempotent by identity
//!
//! [`IndexDocument`]: document::IndexDocument
//! [`IndexStore`]: store::IndexStore

pub mod document;
pub mod store;
pub mod synchronizer;

pub use document::IndexDocument;
pub use store::{IndexStore, MeiliIndexStore};
pub use synchronizer::{BackfillReport, BackfillSource, CursorStore, IndexSynchronizer};
