//! # Status Handlers
//!
//! Liveness probe and the degraded-state surface viewers poll. A viewer that
//! sees `resync_recommended` or a disconnected feed shows its "offline"
//! indicator instead of trusting the live stream.

use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use lib_core::model::event::WatchedCollection;
use serde::Serialize;

/// Connection state of the watched feeds.
#[derive(Debug, Serialize)]
pub struct FeedStates {
    pub messages: bool,
    pub chat_activations: bool,
}

/// Live stream health snapshot.
#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub feeds: FeedStates,
    /// True when the index may have missed events and a backfill is pending.
    pub resync_recommended: bool,
    /// Currently connected viewer sessions.
    pub sessions: usize,
    /// Frames delivered to viewers since startup.
    pub events_delivered: u64,
}

/// **Route**: `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// **Route**: `GET /api/stream/status`
pub async fn stream_status(State(state): State<AppState>) -> Json<StreamStatus> {
    Json(StreamStatus {
        feeds: FeedStates {
            messages: state.health.is_connected(WatchedCollection::Messages),
            chat_activations: state.health.is_connected(WatchedCollection::ChatActivations),
        },
        resync_recommended: state.health.resync_recommended(),
        sessions: state.hub.session_count().await,
        events_delivered: state.hub.events_delivered(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use lib_stream::{BroadcastHub, FeedHealth};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            hub: BroadcastHub::new(16),
            health: Arc::new(FeedHealth::new()),
        }
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/stream/status", get(stream_status))
            .with_state(state)
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app(test_state());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reports_disconnected_feeds_and_resync_flag() {
        // Arrange
        let state = test_state();
        state.health.set_connected(WatchedCollection::Messages, true);
        state.health.recommend_resync();
        let app = test_app(state);

        // Act
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/stream/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status["feeds"]["messages"], true);
        assert_eq!(status["feeds"]["chat_activations"], false);
        assert_eq!(status["resync_recommended"], true);
        assert_eq!(status["sessions"], 0);
    }

    #[tokio::test]
    async fn status_counts_registered_sessions() {
        let state = test_state();
        let _session = state.hub.register().await;
        let app = test_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/stream/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status["sessions"], 1);
    }
}
