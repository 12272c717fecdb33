//! # Index Synchronizer
//!
//! Keeps the search index eventually consistent with the message store
//! through two composable modes:
//!
//! - **Backfill**: enumerate the entire message store in natural order, in
//!   bounded batches, and upsert each batch. Re-runnable at any time; upserts
//!   are idempotent by identity.
//! - **Incremental**: consume change events continuously, upserting or
//!   deleting by identity, and persist the stream position only after the
//!   index acknowledged the write.
//!
//! The two modes may process overlapping identities concurrently; that is
//! safe precisely because every write is keyed by identity and tolerant of
//! re-application. The synchronizer never assumes "later arrival = newer
//! state" across the backfill/incremental boundary.

use crate::document::IndexDocument;
use crate::store::IndexStore;
use async_trait::async_trait;
use lib_core::error::{AppError, Result};
use lib_core::model::event::{identity_string, ChangeEvent, ChangeOperation, WatchedCollection};
use lib_core::model::store::cursor_repository::INDEX_SYNC_CONSUMER;
use lib_core::model::store::{CursorRepository, MessageBackfill};
use lib_stream::health::FeedHealth;
use mongodb::bson::Document;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Batched enumeration of the message store for backfill.
#[async_trait]
pub trait BackfillSource: Send {
    /// Pull up to `limit` raw records; an empty batch ends the enumeration.
    async fn next_batch(&mut self, limit: usize) -> Result<Vec<Document>>;
}

#[async_trait]
impl BackfillSource for MessageBackfill {
    async fn next_batch(&mut self, limit: usize) -> Result<Vec<Document>> {
        MessageBackfill::next_batch(self, limit).await
    }
}

/// Durable record of the last change event applied to the index.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Record that `event` reached its terminal outcome (indexed, deleted,
    /// or deliberately skipped). Called only after the index acknowledged
    /// the corresponding write, so a crash in between replays the event
    /// rather than losing it.
    async fn advance(&self, event: &ChangeEvent) -> Result<()>;
}

#[async_trait]
impl CursorStore for CursorRepository {
    async fn advance(&self, event: &ChangeEvent) -> Result<()> {
        match &event.resume_token {
            Some(token) => self.save(INDEX_SYNC_CONSUMER, token).await,
            None => Ok(()),
        }
    }
}

/// Outcome of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Batches fetched from the store.
    pub batches: usize,
    /// Documents upserted into the index.
    pub indexed: usize,
    /// Records that failed transform and were skipped.
    pub skipped: usize,
}

/// Applies store state to the search index, idempotently.
pub struct IndexSynchronizer<S: IndexStore, C: CursorStore> {
    index: S,
    cursors: C,
    batch_size: usize,
    health: Arc<FeedHealth>,
}

impl<S: IndexStore, C: CursorStore> IndexSynchronizer<S, C> {
    pub fn new(index: S, cursors: C, batch_size: usize, health: Arc<FeedHealth>) -> Self {
        Self {
            index,
            cursors,
            batch_size,
            health,
        }
    }

    /// Apply the index settings, retrying while the index store comes up.
    pub async fn ensure_index(&self) -> Result<()> {
        self.with_retry("ensure settings", || self.index.ensure_settings())
            .await
    }

    /// Re-derive the entire index from the message store.
    ///
    /// Safe to re-run against an already-synced index: every upsert is
    /// keyed by identity, so the run converges without duplicating. A
    /// successful run clears the "resync recommended" flag.
    pub async fn backfill<B: BackfillSource>(&self, source: &mut B) -> Result<BackfillReport> {
        info!(batch_size = self.batch_size, "index backfill started");
        let mut report = BackfillReport::default();

        loop {
            let batch = source.next_batch(self.batch_size).await?;
            if batch.is_empty() {
                break;
            }

            let mut documents = Vec::with_capacity(batch.len());
            for record in &batch {
                let Some(id) = record.get("_id").map(identity_string) else {
                    report.skipped += 1;
                    warn!("backfill record without identity, skipping");
                    continue;
                };
                match IndexDocument::from_document(&id, record) {
                    Ok(document) => documents.push(document),
                    Err(e) => {
                        report.skipped += 1;
                        warn!(document_id = %id, error = %e, "skipping unindexable record");
                    }
                }
            }

            self.with_retry("backfill upsert", || self.index.upsert_batch(&documents))
                .await?;
            report.batches += 1;
            report.indexed += documents.len();
            debug!(
                batches = report.batches,
                indexed = report.indexed,
                "backfill batch applied"
            );
        }

        self.health.clear_resync();
        info!(
            batches = report.batches,
            indexed = report.indexed,
            skipped = report.skipped,
            "index backfill complete"
        );
        Ok(report)
    }

    /// Consume change events until the feed closes or shutdown is signalled.
    pub async fn run_incremental(
        &self,
        mut events: broadcast::Receiver<ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("incremental index sync started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => self.apply(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Events were dropped before this consumer saw them;
                        // only a backfill can repair the gap.
                        warn!(missed, "index sync lagged behind the feed, resync recommended");
                        self.health.recommend_resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        info!("incremental index sync stopped");
    }

    /// Apply one change event to the index.
    async fn apply(&self, event: &ChangeEvent) {
        // The index mirrors messages only; activation events belong to a
        // different stream and must not advance this cursor either.
        if event.collection != WatchedCollection::Messages {
            return;
        }

        let result = match event.operation {
            ChangeOperation::Insert | ChangeOperation::Update => match &event.full_document {
                Some(doc) => match IndexDocument::from_document(&event.document_id, doc) {
                    Ok(document) => {
                        let batch = [document];
                        self.with_retry("upsert", || self.index.upsert_batch(&batch))
                            .await
                    }
                    Err(e) => {
                        // Terminal for this document: log, skip, keep the
                        // stream moving.
                        warn!(document_id = %event.document_id, error = %e, "skipping unindexable document");
                        Ok(())
                    }
                },
                None => {
                    debug!(document_id = %event.document_id, "change carries no document, nothing to index");
                    Ok(())
                }
            },
            ChangeOperation::Delete => {
                // Absent identities are fine; the document was never indexed
                // or a previous application already removed it.
                self.with_retry("delete", || self.index.delete_by_id(&event.document_id))
                    .await
            }
        };

        match result {
            Ok(()) => {
                if let Err(e) = self.cursors.advance(event).await {
                    warn!(document_id = %event.document_id, error = %e, "failed to persist sync cursor");
                }
            }
            Err(e) => {
                error!(document_id = %event.document_id, error = %e, "index write failed after retries, resync recommended");
                self.health.recommend_resync();
            }
        }
    }

    /// Run `op`, retrying connectivity failures with capped exponential
    /// backoff. Document-level failures are returned immediately.
    async fn with_retry<F, Fut>(&self, operation: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut delay = RETRY_BACKOFF;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(()),
                Err(AppError::IndexUnavailable(msg)) if attempt < MAX_ATTEMPTS => {
                    warn!(operation, attempt, error = %msg, "index store unavailable, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_BACKOFF);
                }
                Err(other) => return Err(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory index store mirroring the identity-keyed upsert/delete
    /// contract.
    #[derive(Default)]
    struct MemoryIndexStore {
        docs: Mutex<HashMap<String, IndexDocument>>,
        fail_remaining: AtomicUsize,
    }

    impl MemoryIndexStore {
        fn failing(times: usize) -> Self {
            let store = Self::default();
            store.fail_remaining.store(times, Ordering::SeqCst);
            store
        }

        fn maybe_fail(&self) -> Result<()> {
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::IndexUnavailable("connection refused".to_string()));
            }
            Ok(())
        }

        fn snapshot(&self) -> HashMap<String, IndexDocument> {
            self.docs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IndexStore for MemoryIndexStore {
        async fn ensure_settings(&self) -> Result<()> {
            self.maybe_fail()
        }

        async fn upsert_batch(&self, documents: &[IndexDocument]) -> Result<()> {
            self.maybe_fail()?;
            let mut docs = self.docs.lock().unwrap();
            for document in documents {
                docs.insert(document.id.clone(), document.clone());
            }
            Ok(())
        }

        async fn delete_by_id(&self, id: &str) -> Result<()> {
            self.maybe_fail()?;
            self.docs.lock().unwrap().remove(id);
            Ok(())
        }
    }

    /// Records which events were acknowledged as applied.
    #[derive(Default)]
    struct RecordingCursorStore {
        advanced: Mutex<Vec<String>>,
    }

    impl RecordingCursorStore {
        fn advanced_ids(&self) -> Vec<String> {
            self.advanced.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CursorStore for RecordingCursorStore {
        async fn advance(&self, event: &ChangeEvent) -> Result<()> {
            self.advanced.lock().unwrap().push(event.document_id.clone());
            Ok(())
        }
    }

    /// Backfill source over a fixed set of records.
    struct VecSource {
        records: Vec<Document>,
        offset: usize,
    }

    impl VecSource {
        fn new(records: Vec<Document>) -> Self {
            Self { records, offset: 0 }
        }
    }

    #[async_trait]
    impl BackfillSource for VecSource {
        async fn next_batch(&mut self, limit: usize) -> Result<Vec<Document>> {
            let end = (self.offset + limit).min(self.records.len());
            let batch = self.records[self.offset..end].to_vec();
            self.offset = end;
            Ok(batch)
        }
    }

    fn synchronizer(
        index: MemoryIndexStore,
        batch_size: usize,
    ) -> (
        IndexSynchronizer<MemoryIndexStore, RecordingCursorStore>,
        Arc<FeedHealth>,
    ) {
        let health = Arc::new(FeedHealth::new());
        let sync = IndexSynchronizer::new(
            index,
            RecordingCursorStore::default(),
            batch_size,
            Arc::clone(&health),
        );
        (sync, health)
    }

    fn message_doc(message_id: i64, chat_id: i64, text: &str) -> Document {
        doc! {
            "message_id": message_id,
            "chat_id": chat_id,
            "text": text,
            "date": 1700000000i64 + message_id,
        }
    }

    fn insert_event(id: &str, doc: Document) -> ChangeEvent {
        ChangeEvent {
            operation: ChangeOperation::Insert,
            collection: WatchedCollection::Messages,
            document_id: id.to_string(),
            full_document: Some(doc),
            pre_image: None,
            resume_token: None,
        }
    }

    fn update_event(id: &str, doc: Document) -> ChangeEvent {
        ChangeEvent {
            operation: ChangeOperation::Update,
            full_document: Some(doc),
            ..insert_event(id, Document::new())
        }
    }

    fn delete_event(id: &str) -> ChangeEvent {
        ChangeEvent {
            operation: ChangeOperation::Delete,
            collection: WatchedCollection::Messages,
            document_id: id.to_string(),
            full_document: None,
            pre_image: None,
            resume_token: None,
        }
    }

    #[tokio::test]
    async fn feed_order_application_matches_final_store_state() {
        // Arrange
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 100);
        let final_doc = message_doc(1, 42, "hello, again");

        // Act: insert, then two updates for the same identity, in feed order.
        sync.apply(&insert_event("m1", message_doc(1, 42, "hi"))).await;
        sync.apply(&update_event("m1", message_doc(1, 42, "hello"))).await;
        sync.apply(&update_event("m1", final_doc.clone())).await;

        // Assert: indistinguishable from transforming the final state once.
        let expected = IndexDocument::from_document("m1", &final_doc).unwrap();
        assert_eq!(sync.index.snapshot().get("m1"), Some(&expected));
    }

    #[tokio::test]
    async fn delete_removes_document_and_absent_delete_is_not_an_error() {
        let (sync, health) = synchronizer(MemoryIndexStore::default(), 100);

        sync.apply(&insert_event("m1", message_doc(1, 42, "hi"))).await;
        sync.apply(&delete_event("m1")).await;
        sync.apply(&delete_event("m1")).await;

        assert!(sync.index.snapshot().is_empty());
        assert!(!health.resync_recommended());
        // Every event reached a terminal outcome and advanced the cursor.
        assert_eq!(sync.cursors.advanced_ids(), vec!["m1", "m1", "m1"]);
    }

    #[tokio::test]
    async fn activation_events_touch_neither_index_nor_cursor() {
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 100);

        let event = ChangeEvent {
            operation: ChangeOperation::Insert,
            collection: WatchedCollection::ChatActivations,
            document_id: "act-7".to_string(),
            full_document: Some(doc! { "chat_id": 7i64, "chat_title": "design" }),
            pre_image: None,
            resume_token: None,
        };
        sync.apply(&event).await;

        assert!(sync.index.snapshot().is_empty());
        assert!(sync.cursors.advanced_ids().is_empty());
    }

    #[tokio::test]
    async fn unindexable_document_is_skipped_and_stream_continues() {
        let (sync, health) = synchronizer(MemoryIndexStore::default(), 100);

        sync.apply(&insert_event("bad", doc! { "text": "no natural key" })).await;
        sync.apply(&insert_event("m2", message_doc(2, 42, "fine"))).await;

        let snapshot = sync.index.snapshot();
        assert!(!snapshot.contains_key("bad"));
        assert!(snapshot.contains_key("m2"));
        assert!(!health.resync_recommended());
        // The skip is terminal, so the cursor still advances past it.
        assert_eq!(sync.cursors.advanced_ids(), vec!["bad", "m2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_outage_is_retried_until_the_write_lands() {
        let (sync, health) = synchronizer(MemoryIndexStore::failing(2), 100);

        sync.apply(&insert_event("m1", message_doc(1, 42, "hi"))).await;

        assert!(sync.index.snapshot().contains_key("m1"));
        assert!(!health.resync_recommended());
        assert_eq!(sync.cursors.advanced_ids(), vec!["m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_flag_resync_and_do_not_advance_cursor() {
        let (sync, health) = synchronizer(
            MemoryIndexStore::failing(MAX_ATTEMPTS as usize),
            100,
        );

        sync.apply(&insert_event("m1", message_doc(1, 42, "hi"))).await;

        assert!(sync.index.snapshot().is_empty());
        assert!(health.resync_recommended());
        assert!(sync.cursors.advanced_ids().is_empty());
    }

    #[tokio::test]
    async fn backfill_batches_and_counts_match_the_store() {
        // 2,500 records in batches of 1,000 -> exactly 3 batches, 2,500 docs.
        let records: Vec<Document> = (0..2500)
            .map(|i| {
                let mut record = message_doc(i, 42, "hi");
                record.insert("_id", format!("m{i}"));
                record
            })
            .collect();
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 1000);

        let report = sync.backfill(&mut VecSource::new(records)).await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.indexed, 2500);
        assert_eq!(report.skipped, 0);
        assert_eq!(sync.index.snapshot().len(), 2500);
    }

    #[tokio::test]
    async fn backfill_after_incremental_overlap_leaves_index_unchanged() {
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 10);
        let mut records = Vec::new();
        for i in 0..5 {
            let mut record = message_doc(i, 42, "stable");
            record.insert("_id", format!("m{i}"));
            records.push(record.clone());
            // Incremental sync already applied these identities.
            let mut event_doc = record.clone();
            event_doc.remove("_id");
            sync.apply(&insert_event(&format!("m{i}"), event_doc)).await;
        }
        let before = sync.index.snapshot();

        let report = sync.backfill(&mut VecSource::new(records)).await.unwrap();

        assert_eq!(report.indexed, 5);
        assert_eq!(sync.index.snapshot(), before);
    }

    #[tokio::test]
    async fn backfill_skips_malformed_records_without_aborting() {
        let mut good = message_doc(1, 42, "hi");
        good.insert("_id", "m1");
        let bad = doc! { "_id": "broken", "text": "no key" };
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 10);

        let report = sync
            .backfill(&mut VecSource::new(vec![good, bad]))
            .await
            .unwrap();

        assert_eq!(report.indexed, 1);
        assert_eq!(report.skipped, 1);
        assert!(sync.index.snapshot().contains_key("m1"));
    }

    #[tokio::test]
    async fn successful_backfill_clears_the_resync_flag() {
        let (sync, health) = synchronizer(MemoryIndexStore::default(), 10);
        health.recommend_resync();

        sync.backfill(&mut VecSource::new(Vec::new())).await.unwrap();

        assert!(!health.resync_recommended());
    }

    #[tokio::test(start_paused = true)]
    async fn backfill_propagates_a_persistent_outage() {
        let mut record = message_doc(1, 42, "hi");
        record.insert("_id", "m1");
        let (sync, _health) = synchronizer(
            MemoryIndexStore::failing(MAX_ATTEMPTS as usize),
            10,
        );

        let result = sync.backfill(&mut VecSource::new(vec![record])).await;

        assert!(matches!(result, Err(AppError::IndexUnavailable(_))));
    }

    #[tokio::test]
    async fn incremental_loop_drains_the_feed_until_it_closes() {
        let (sync, _health) = synchronizer(MemoryIndexStore::default(), 100);
        let (events_tx, events_rx) = broadcast::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        events_tx.send(insert_event("m1", message_doc(1, 42, "hi"))).unwrap();
        events_tx.send(delete_event("m1")).unwrap();
        events_tx.send(insert_event("m2", message_doc(2, 42, "yo"))).unwrap();
        drop(events_tx);

        sync.run_incremental(events_rx, shutdown_rx).await;

        let snapshot = sync.index.snapshot();
        assert!(!snapshot.contains_key("m1"));
        assert!(snapshot.contains_key("m2"));
    }
}
