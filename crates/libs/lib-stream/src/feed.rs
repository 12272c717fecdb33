//! # Change Feed Subscriber
//!
//! One long-lived task per watched collection. Each task owns a resumable
//! change stream against the store, decodes every notification into a
//! [`ChangeEvent`], and publishes it on the event bus. The task blocking on
//! the next notification is the system's primary idle state.
//!
//! ## Failure handling
//!
//! A feed error is fatal to that feed only: the task logs it, flips the
//! feed's connected flag, and re-establishes the stream with capped
//! exponential backoff, resuming from the last position it saw. A position
//! the store no longer holds (history lost) cannot be resumed; the task then
//! reopens from "now", clears the persisted cursor, and raises the
//! "resync recommended" flag so the index synchronizer schedules a backfill
//! instead of silently missing the gap.

use crate::bus::EventBus;
use crate::health::FeedHealth;
use futures_util::StreamExt;
use lib_core::error::AppError;
use lib_core::model::event::{ChangeEvent, WatchedCollection};
use lib_core::model::store::cursor_repository::INDEX_SYNC_CONSUMER;
use lib_core::model::store::{CursorRepository, MongoStore};
use mongodb::bson::{to_document, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::error::ErrorKind;
use mongodb::options::{FullDocumentBeforeChangeType, FullDocumentType};
use mongodb::Collection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Server error code for a resume position that fell out of the oplog.
const CHANGE_STREAM_HISTORY_LOST: i32 = 286;

/// Owns the change stream connections and decodes notifications for both
/// consumer paths.
pub struct ChangeFeedSubscriber {
    store: MongoStore,
    cursors: CursorRepository,
    bus: EventBus,
    health: Arc<FeedHealth>,
}

impl ChangeFeedSubscriber {
    pub fn new(
        store: MongoStore,
        cursors: CursorRepository,
        bus: EventBus,
        health: Arc<FeedHealth>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cursors,
            bus,
            health,
        })
    }

    /// Spawn one watch task per collection.
    ///
    /// Tasks run until `shutdown` flips true; stopping the feeds is the
    /// first step of shutdown and happens before any viewer connection or
    /// index client is closed.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let collections = [
            WatchedCollection::Messages,
            WatchedCollection::ChatActivations,
        ];

        collections
            .into_iter()
            .map(|collection| {
                let subscriber = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    subscriber.run_feed(collection, shutdown).await;
                })
            })
            .collect()
    }

    async fn run_feed(&self, collection: WatchedCollection, mut shutdown: watch::Receiver<bool>) {
        let coll = match collection {
            WatchedCollection::Messages => self.store.messages(),
            WatchedCollection::ChatActivations => self.store.activated_chats(),
        };

        // Only the message feed has a durable position: the synchronizer's
        // cursor. The activation feed always starts from "now"; live viewers
        // rebuild their world through the REST layer on reconnect.
        let mut resume: Option<ResumeToken> = if collection == WatchedCollection::Messages {
            match self.cursors.load(INDEX_SYNC_CONSUMER).await {
                Ok(token) => token,
                Err(e) => {
                    warn!(feed = collection.name(), error = %e, "could not load sync cursor, starting from now");
                    None
                }
            }
        } else {
            None
        };

        if resume.is_some() {
            info!(feed = collection.name(), "resuming feed from persisted sync cursor");
        }

        let mut backoff = INITIAL_BACKOFF;

        while !*shutdown.borrow() {
            let mut stream = match open_stream(&coll, resume.clone()).await {
                Ok(stream) => {
                    self.health.set_connected(collection, true);
                    backoff = INITIAL_BACKOFF;
                    info!(feed = collection.name(), "change feed established");
                    stream
                }
                Err(e) if is_history_lost(&e) && resume.is_some() => {
                    // The gap between the cursor and the oplog horizon is
                    // unrecoverable from the stream; only a backfill can
                    // repair the index now.
                    warn!(
                        feed = collection.name(),
                        "resume position no longer available, reopening from now (resync recommended)"
                    );
                    resume = None;
                    self.health.recommend_resync();
                    if let Err(clear_err) = self.cursors.clear(INDEX_SYNC_CONSUMER).await {
                        warn!(error = %clear_err, "failed to clear stale sync cursor");
                    }
                    continue;
                }
                Err(e) => {
                    self.health.set_connected(collection, false);
                    let err = AppError::Feed(e.to_string());
                    error!(feed = collection.name(), error = %err, "failed to open change feed");
                    if sleep_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            };

            // Consume until the stream errors, ends, or shutdown is signalled.
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            self.health.set_connected(collection, false);
                            info!(feed = collection.name(), "change feed stopped");
                            return;
                        }
                    }
                    next = stream.next() => match next {
                        Some(Ok(notification)) => {
                            resume = stream.resume_token();
                            self.publish(collection, notification, resume.clone());
                        }
                        Some(Err(e)) => {
                            let err = AppError::Feed(e.to_string());
                            warn!(feed = collection.name(), error = %err, "change feed error, reconnecting");
                            break;
                        }
                        None => {
                            warn!(feed = collection.name(), "change feed ended, reconnecting");
                            break;
                        }
                    }
                }
            }

            self.health.set_connected(collection, false);
            if *shutdown.borrow() {
                break;
            }
            if sleep_or_shutdown(&mut shutdown, backoff).await {
                break;
            }
            backoff = next_backoff(backoff);
        }

        self.health.set_connected(collection, false);
        info!(feed = collection.name(), "change feed stopped");
    }

    fn publish(
        &self,
        collection: WatchedCollection,
        notification: ChangeStreamEvent<Document>,
        resume: Option<ResumeToken>,
    ) {
        let raw = match to_document(&notification) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(feed = collection.name(), error = %e, "undecodable change notification, skipping");
                return;
            }
        };

        match ChangeEvent::from_document(collection, &raw) {
            Some(mut event) => {
                event.resume_token = resume;
                debug!(
                    feed = collection.name(),
                    document_id = %event.document_id,
                    operation = ?event.operation,
                    "change event decoded"
                );
                self.bus.publish(event);
            }
            None => {
                debug!(feed = collection.name(), "ignoring non-entity notification");
            }
        }
    }
}

async fn open_stream(
    coll: &Collection<Document>,
    resume: Option<ResumeToken>,
) -> mongodb::error::Result<ChangeStream<ChangeStreamEvent<Document>>> {
    let mut action = coll
        .watch()
        .full_document(FullDocumentType::UpdateLookup)
        .full_document_before_change(FullDocumentBeforeChangeType::WhenAvailable);

    if let Some(token) = resume {
        action = action.resume_after(token);
    }

    action.await
}

fn is_history_lost(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, ErrorKind::Command(ref cmd) if cmd.code == CHANGE_STREAM_HISTORY_LOST)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Sleep for `delay`, waking early on shutdown. Returns true when the task
/// should stop.
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut delay = INITIAL_BACKOFF;
        delay = next_backoff(delay);
        assert_eq!(delay, Duration::from_secs(2));

        for _ in 0..10 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn sleep_or_shutdown_returns_immediately_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let stopped = sleep_or_shutdown(&mut rx, Duration::from_secs(3600)).await;

        assert!(stopped);
    }

    #[tokio::test]
    async fn sleep_or_shutdown_treats_dropped_sender_as_stop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);

        let stopped = sleep_or_shutdown(&mut rx, Duration::from_secs(3600)).await;

        assert!(stopped);
    }
}
