//! # Broadcast Hub
//!
//! Live registry of viewer sessions and subscription-filtered dispatch of
//! change events to them.
//!
//! ## Delivery contract
//!
//! - A session receives an event when its subscription set is empty (global
//!   listener), contains the event's channel, or the event itself is global
//!   (`new_group` announcements, deletes whose channel was lost).
//! - Delivery is best-effort and non-blocking: every session owns a bounded
//!   frame queue, dispatch uses `try_send`, and a session whose queue cannot
//!   accept a frame is unregistered instead of retried. One slow session
//!   never stalls the feed or its siblings.
//! - The hub holds no durable state; after a restart it is rebuilt from
//!   whatever connections re-establish themselves.

use crate::session::{SessionEntry, SessionId, ViewerSession};
use lib_core::error::AppError;
use lib_core::model::event::{ChangeEvent, ChangeOperation, WatchedCollection};
use mongodb::bson::{Bson, Document};
use serde_json::{json, Value};
use shared::frames::{ControlFrame, ControlKind, EventFrame, EventKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Channel identifier type (chat id).
pub type ChannelId = i64;

/// Default per-session outbound queue depth.
pub const DEFAULT_SESSION_QUEUE: usize = 256;

/// Where an event frame should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Only sessions subscribed to this channel (plus global listeners).
    Channel(ChannelId),
    /// Every registered session, regardless of subscriptions.
    Global,
}

/// Session registry and event dispatcher.
pub struct BroadcastHub {
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    delivered: AtomicU64,
    session_queue: usize,
}

impl BroadcastHub {
    pub fn new(session_queue: usize) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            session_queue,
        })
    }

    /// Register a new viewer session and hand back its frame queue.
    pub async fn register(&self) -> ViewerSession {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.session_queue);
        let entry = Arc::new(SessionEntry::new(tx));

        self.sessions.write().await.insert(id.clone(), entry);
        info!(session_id = %id, "viewer session registered");

        ViewerSession::new(id, rx)
    }

    /// Remove a session from the registry.
    ///
    /// Idempotent: unregistering an already-removed session is a no-op, so
    /// the close path and the eviction path can race safely.
    pub async fn unregister(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(session_id = %id, "viewer session unregistered");
        }
        removed
    }

    /// Apply an inbound control frame to the owning session's subscriptions.
    pub async fn apply_control(&self, id: &SessionId, frame: &ControlFrame) {
        let entry = {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(entry) => Arc::clone(entry),
                None => return,
            }
        };

        let mut subscriptions = entry.subscriptions.write().await;
        match frame.kind {
            ControlKind::Subscribe => {
                subscriptions.insert(frame.chat_id);
                debug!(session_id = %id, chat_id = frame.chat_id, "subscribed");
            }
            ControlKind::Unsubscribe => {
                subscriptions.remove(&frame.chat_id);
                debug!(session_id = %id, chat_id = frame.chat_id, "unsubscribed");
            }
        }
    }

    /// Fan one change event out to every matching session.
    ///
    /// Never blocks on a session: frames go out through `try_send`, and a
    /// session whose queue is full or closed is evicted after the sweep.
    pub async fn dispatch(&self, event: &ChangeEvent) {
        let Some((frame, route)) = frame_for(event) else {
            return;
        };

        let mut stale: Vec<SessionId> = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, entry) in sessions.iter() {
                let matches = match route {
                    Route::Global => true,
                    Route::Channel(channel) => {
                        let subscriptions = entry.subscriptions.read().await;
                        subscriptions.is_empty() || subscriptions.contains(&channel)
                    }
                };
                if !matches {
                    continue;
                }

                match entry.frames.try_send(frame.clone()) {
                    Ok(()) => {
                        entry.delivered.fetch_add(1, Ordering::Relaxed);
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let err = AppError::Delivery(format!("session {id} outbound queue full"));
                        warn!(session_id = %id, error = %err, "evicting slow viewer");
                        stale.push(id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(id.clone());
                    }
                }
            }
        }

        for id in stale {
            self.unregister(&id).await;
        }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Total frames delivered across all sessions since startup.
    pub fn events_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Drop every session, closing their frame queues.
    ///
    /// Part of the shutdown sequence: called after the feeds have stopped
    /// producing and before the index store client is released.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        if count > 0 {
            info!(sessions = count, "closed all viewer sessions");
        }
    }
}

/// Build the outbound frame and routing decision for one event.
///
/// Returns `None` for events viewers are never told about (activation
/// updates/deletes).
fn frame_for(event: &ChangeEvent) -> Option<(EventFrame, Route)> {
    match (event.collection, event.operation) {
        (WatchedCollection::Messages, ChangeOperation::Insert) => Some((
            EventFrame::new(EventKind::NewMessage, entity_payload(event)),
            route_by_channel(event),
        )),
        (WatchedCollection::Messages, ChangeOperation::Update) => Some((
            EventFrame::new(EventKind::UpdateMessage, entity_payload(event)),
            route_by_channel(event),
        )),
        (WatchedCollection::Messages, ChangeOperation::Delete) => {
            let channel = event.channel();
            let payload = json!({
                "id": event.document_id,
                "chat_id": channel,
            });
            // Without a pre-image the original channel is unrecoverable; the
            // delete goes to everyone rather than to no one.
            let route = channel.map_or(Route::Global, Route::Channel);
            Some((EventFrame::new(EventKind::DeleteMessage, payload), route))
        }
        (WatchedCollection::ChatActivations, ChangeOperation::Insert) => Some((
            EventFrame::new(EventKind::NewGroup, entity_payload(event)),
            Route::Global,
        )),
        (WatchedCollection::ChatActivations, _) => None,
    }
}

fn route_by_channel(event: &ChangeEvent) -> Route {
    event.channel().map_or(Route::Global, Route::Channel)
}

/// Entity-shaped JSON payload: the full document with the store `_id`
/// replaced by the public `id` identity.
fn entity_payload(event: &ChangeEvent) -> Value {
    match &event.full_document {
        Some(doc) => {
            let mut doc: Document = doc.clone();
            doc.remove("_id");
            let mut value = Bson::Document(doc).into_relaxed_extjson();
            if let Value::Object(ref mut map) = value {
                map.insert("id".to_string(), Value::String(event.document_id.clone()));
            }
            value
        }
        None => json!({ "id": event.document_id }),
    }
}
