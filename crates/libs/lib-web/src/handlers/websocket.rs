//! # WebSocket Handler
//!
//! HTTP endpoint for viewer WebSocket connections.
//!
//! ## Endpoints
//!
//! - `GET /api/ws/stream` - WebSocket connection for live store changes
//!
//! Each connection registers one session with the broadcast hub. Outbound
//! event frames flow in hub delivery order; inbound control frames mutate
//! only this session's subscriptions, in receipt order. When either
//! direction ends the session unregisters exactly once.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use lib_stream::BroadcastHub;
use shared::frames::ControlFrame;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// WebSocket handler for the live change stream.
///
/// **Route**: `GET /api/ws/stream`
///
/// Frames delivered to the client are JSON event frames:
///
/// ```json
/// { "type": "new_message", "payload": { "id": "...", "chat_id": 42, "text": "hi" } }
/// ```
///
/// The client steers its subscriptions with control frames:
///
/// ```json
/// { "type": "subscribe", "chatId": 42 }
/// ```
pub async fn stream_websocket(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<BroadcastHub>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, hub, addr))
}

/// Drive one viewer connection until either direction closes.
async fn handle_stream_socket(socket: WebSocket, hub: Arc<BroadcastHub>, addr: SocketAddr) {
    let mut session = hub.register().await;
    let session_id = session.id().clone();
    let connection_start = Instant::now();

    info!(
        session_id = %session_id,
        client = %addr,
        "[WS] CONNECTED session={} client={}",
        session_id,
        addr
    );

    let (mut sender, mut receiver) = socket.split();

    // Outbound: frames the hub routed to this session, in delivery order.
    let send_session_id = session_id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut sent: u64 = 0;
        while let Some(frame) = session.next_frame().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!(
                        session_id = %send_session_id,
                        error = %e,
                        "[WS] SERIALIZE_ERROR session={}",
                        send_session_id
                    );
                    continue;
                }
            };

            if let Err(e) = sender.send(Message::Text(json.into())).await {
                warn!(
                    session_id = %send_session_id,
                    error = %e,
                    frames_sent = sent,
                    "[WS] SEND_ERROR session={}",
                    send_session_id
                );
                break;
            }
            sent += 1;
        }

        // The hub dropped the queue (eviction or shutdown); close politely.
        let _ = sender.send(Message::Close(None)).await;
        sent
    });

    // Inbound: control frames mutate only this session's subscriptions.
    let recv_hub = Arc::clone(&hub);
    let recv_session_id = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ControlFrame>(&text) {
                    Ok(frame) => recv_hub.apply_control(&recv_session_id, &frame).await,
                    Err(e) => {
                        // Malformed control frames are ignored, not fatal.
                        warn!(
                            session_id = %recv_session_id,
                            error = %e,
                            "[WS] BAD_CONTROL_FRAME session={}",
                            recv_session_id
                        );
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(
                        session_id = %recv_session_id,
                        "[WS] CLOSE_RECEIVED session={}",
                        recv_session_id
                    );
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Pings are answered by the websocket layer.
                }
                Ok(Message::Binary(_)) => {
                    debug!(
                        session_id = %recv_session_id,
                        "[WS] BINARY_IGNORED session={}",
                        recv_session_id
                    );
                }
                Err(e) => {
                    warn!(
                        session_id = %recv_session_id,
                        error = %e,
                        "[WS] RECV_ERROR session={}",
                        recv_session_id
                    );
                    break;
                }
            }
        }
    });

    // Either direction ending tears the connection down.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Idempotent: dispatch may already have evicted this session.
    hub.unregister(&session_id).await;

    let duration = connection_start.elapsed();
    info!(
        session_id = %session_id,
        client = %addr,
        duration_secs = duration.as_secs_f64(),
        "[WS] DISCONNECTED session={} client={} duration={:.2}s",
        session_id,
        addr,
        duration.as_secs_f64()
    );
}
