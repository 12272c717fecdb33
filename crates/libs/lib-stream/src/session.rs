//! # Viewer Sessions
//!
//! Per-connection state. A session owns the receiving half of its bounded
//! frame queue; the hub owns the registry entry holding the sending half and
//! the subscription set. Nothing else ever touches either.

use shared::frames::EventFrame;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicU64;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Process-local session identity, created on connect and dead on
/// disconnect. Never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hub-side registry entry for one session.
pub(crate) struct SessionEntry {
    /// Sending half of the session's bounded frame queue.
    pub(crate) frames: mpsc::Sender<EventFrame>,
    /// Channels this session wants; empty means "everything".
    pub(crate) subscriptions: RwLock<HashSet<i64>>,
    /// Frames delivered to this session.
    pub(crate) delivered: AtomicU64,
}

impl SessionEntry {
    pub(crate) fn new(frames: mpsc::Sender<EventFrame>) -> Self {
        Self {
            frames,
            subscriptions: RwLock::new(HashSet::new()),
            delivered: AtomicU64::new(0),
        }
    }
}

/// Connection-side handle for one registered session.
///
/// The transport layer drains frames from here and forwards them over the
/// wire in the order the hub delivered them.
pub struct ViewerSession {
    id: SessionId,
    frames: mpsc::Receiver<EventFrame>,
}

impl ViewerSession {
    pub(crate) fn new(id: SessionId, frames: mpsc::Receiver<EventFrame>) -> Self {
        Self { id, frames }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Await the next frame routed to this session.
    ///
    /// Returns `None` once the hub has dropped the session (eviction or
    /// shutdown), which the transport treats as "close the connection".
    pub async fn next_frame(&mut self) -> Option<EventFrame> {
        self.frames.recv().await
    }

    /// Non-blocking variant of [`next_frame`](Self::next_frame).
    pub fn try_next_frame(&mut self) -> Option<EventFrame> {
        self.frames.try_recv().ok()
    }
}
