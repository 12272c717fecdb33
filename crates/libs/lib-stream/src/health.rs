//! # Feed Health
//!
//! Shared degraded-state flags for the feed and its consumers. Failures are
//! never silent: a feed that cannot deliver raises a flag here, and the
//! status endpoint exposes it for viewers to poll.

use lib_core::model::event::WatchedCollection;
use std::sync::atomic::{AtomicBool, Ordering};

/// Live health of the watched feeds.
#[derive(Debug, Default)]
pub struct FeedHealth {
    messages_connected: AtomicBool,
    activations_connected: AtomicBool,
    resync_recommended: AtomicBool,
}

impl FeedHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, collection: WatchedCollection, connected: bool) {
        self.flag_for(collection).store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self, collection: WatchedCollection) -> bool {
        self.flag_for(collection).load(Ordering::Relaxed)
    }

    /// Mark that the index may have missed events (unresumable cursor or a
    /// lagged consumer queue). Cleared only by a successful backfill.
    pub fn recommend_resync(&self) {
        self.resync_recommended.store(true, Ordering::Relaxed);
    }

    pub fn resync_recommended(&self) -> bool {
        self.resync_recommended.load(Ordering::Relaxed)
    }

    pub fn clear_resync(&self) {
        self.resync_recommended.store(false, Ordering::Relaxed);
    }

    fn flag_for(&self, collection: WatchedCollection) -> &AtomicBool {
        match collection {
            WatchedCollection::Messages => &self.messages_connected,
            WatchedCollection::ChatActivations => &self.activations_connected,
        }
    }
}
