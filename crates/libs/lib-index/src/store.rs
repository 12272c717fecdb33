//! # Index Store
//!
//! The write seam to the search index: upsert-by-identity, delete-by-identity,
//! and settings bootstrap. The trait keeps the synchronizer testable against
//! an in-memory index; production uses the Meilisearch implementation.

use crate::document::{IndexDocument, FILTERABLE_FIELDS, SEARCHABLE_FIELDS, SORTABLE_FIELDS};
use async_trait::async_trait;
use lib_core::error::{AppError, Result};
use meilisearch_sdk::client::Client;
use meilisearch_sdk::indexes::Index;
use meilisearch_sdk::settings::Settings;
use tracing::info;

/// Identity-keyed document writes against the search index.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Apply the configured searchable/filterable/sortable attributes.
    async fn ensure_settings(&self) -> Result<()>;

    /// Upsert a batch of documents keyed by their `id`. Re-writing the same
    /// logical state converges; it never duplicates.
    async fn upsert_batch(&self, documents: &[IndexDocument]) -> Result<()>;

    /// Remove a document by identity. Deleting an absent identity is not an
    /// error.
    async fn delete_by_id(&self, id: &str) -> Result<()>;
}

/// Meilisearch-backed index store.
///
/// Owned exclusively by the index synchronizer; the REST layer only ever
/// queries the index, it never writes through this.
pub struct MeiliIndexStore {
    index: Index,
}

impl MeiliIndexStore {
    pub fn connect(url: &str, api_key: Option<&str>, index_name: &str) -> Result<Self> {
        let client = Client::new(url, api_key).map_err(map_meili_err)?;
        let index = client.index(index_name);

        Ok(Self { index })
    }
}

#[async_trait]
impl IndexStore for MeiliIndexStore {
    async fn ensure_settings(&self) -> Result<()> {
        let settings = Settings::new()
            .with_searchable_attributes(SEARCHABLE_FIELDS.iter().copied())
            .with_filterable_attributes(FILTERABLE_FIELDS.iter().copied())
            .with_sortable_attributes(SORTABLE_FIELDS.iter().copied());

        self.index
            .set_settings(&settings)
            .await
            .map_err(map_meili_err)?;

        info!(index = %self.index.uid, "search index settings applied");
        Ok(())
    }

    async fn upsert_batch(&self, documents: &[IndexDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        // The write is acknowledged once the index service has durably
        // enqueued it; per-document task failures surface in its task log.
        self.index
            .add_or_update(documents, Some("id"))
            .await
            .map_err(map_meili_err)?;

        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.index
            .delete_document(id)
            .await
            .map_err(map_meili_err)?;

        Ok(())
    }
}

/// Map client errors onto the app error taxonomy: an API-level rejection is
/// a document problem (skip-and-log), everything else is the store being
/// unreachable (retry with backoff).
fn map_meili_err(err: meilisearch_sdk::errors::Error) -> AppError {
    match err {
        meilisearch_sdk::errors::Error::Meilisearch(api) => AppError::IndexWrite(api.to_string()),
        other => AppError::IndexUnavailable(other.to_string()),
    }
}
