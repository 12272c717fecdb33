//! # Server Setup
//!
//! Server initialization, route registration, background task wiring, and
//! HTTP server startup.
//!
//! Startup order matters: the event bus receivers are taken before the feed
//! tasks start so neither consumer path can miss the first notification, and
//! shutdown runs in reverse dependency order (feeds stop producing, viewer
//! connections close, then the index client goes away).

// region:    --- Imports
use crate::handlers;
use crate::middleware::{log_requests, stamp_req};
use axum::{routing::get, Router};
use lib_core::model::store::{CursorRepository, MessageRepository, MongoStore};
use lib_core::Config;
use lib_index::{IndexSynchronizer, MeiliIndexStore};
use lib_stream::bus::DEFAULT_BUS_CAPACITY;
use lib_stream::hub::DEFAULT_SESSION_QUEUE;
use lib_stream::{BroadcastHub, ChangeFeedSubscriber, EventBus, FeedHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
// endregion: --- Imports

// region:    --- AppState
/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    pub health: Arc<FeedHealth>,
}

impl axum::extract::FromRef<AppState> for Arc<BroadcastHub> {
    fn from_ref(state: &AppState) -> Self {
        state.hub.clone()
    }
}

impl axum::extract::FromRef<AppState> for Arc<FeedHealth> {
    fn from_ref(state: &AppState) -> Self {
        state.health.clone()
    }
}
// endregion: --- AppState

// region:    --- Server Configuration
/// Server configuration
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:3001")
    pub bind_address: String,
    /// Allowed CORS origins
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3001".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
                "http://localhost:8080".to_string(),
                "http://127.0.0.1:8080".to_string(),
            ],
        }
    }
}
// endregion: --- Server Configuration

// region:    --- Server Setup
/// Initialize and start the HTTP server and every background task.
///
/// # Errors
///
/// This function will return an error if:
/// - Configuration loading fails
/// - The document store is unreachable
/// - The index store client cannot be constructed
/// - Server binding fails
pub async fn start_server(server_config: ServerConfig) -> anyhow::Result<()> {
    init_tracing();

    info!("LIVE STREAM BACKEND STARTING");

    dotenvy::dotenv().ok();

    info!("Loading configuration...");
    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    info!("Connecting to document store: {}", config.mongodb_database);
    let store = MongoStore::connect(&config.mongodb_uri, &config.mongodb_database).await?;
    let cursors = CursorRepository::new(&store);

    let health = Arc::new(FeedHealth::new());
    let bus = EventBus::new(DEFAULT_BUS_CAPACITY);

    // Take both consumer receivers before the feeds can publish anything.
    let hub_events = bus.subscribe();
    let sync_events = bus.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("Starting change feed subscriber...");
    let subscriber = ChangeFeedSubscriber::new(
        store.clone(),
        cursors.clone(),
        bus.clone(),
        Arc::clone(&health),
    );
    subscriber.spawn(shutdown_rx.clone());

    info!("Starting broadcast hub...");
    let hub = BroadcastHub::new(DEFAULT_SESSION_QUEUE);
    spawn_hub_dispatch(Arc::clone(&hub), hub_events, shutdown_rx.clone());

    info!("Connecting to search index: {}", config.meilisearch_index);
    let index_store = MeiliIndexStore::connect(
        &config.meilisearch_url,
        config.meilisearch_api_key.as_deref(),
        &config.meilisearch_index,
    )?;
    let synchronizer = Arc::new(IndexSynchronizer::new(
        index_store,
        cursors,
        config.backfill_batch_size,
        Arc::clone(&health),
    ));

    info!("Starting index synchronizer...");
    spawn_index_sync(Arc::clone(&synchronizer), sync_events, shutdown_rx.clone());

    if config.backfill_on_start {
        info!("Backfill requested at startup");
        health.recommend_resync();
    }
    spawn_backfill_supervisor(
        Arc::clone(&synchronizer),
        store.clone(),
        Arc::clone(&health),
        config.backfill_batch_size,
        shutdown_rx.clone(),
    );

    let state = AppState {
        hub: Arc::clone(&hub),
        health: Arc::clone(&health),
    };

    let app = create_router(state, server_config.allowed_origins.clone());

    let listener = tokio::net::TcpListener::bind(&server_config.bind_address).await?;

    info!("SERVER READY: http://{}", server_config.bind_address);
    log_server_info();

    // ConnectInfo is required by the WebSocket handler for client addresses.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_tx, Arc::clone(&hub)))
    .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let log_level = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();

    let filter = match log_level.as_str() {
        "trace" => tracing_subscriber::EnvFilter::new("trace"),
        "debug" => tracing_subscriber::EnvFilter::new("debug"),
        "warn" => tracing_subscriber::EnvFilter::new("warn"),
        "error" => tracing_subscriber::EnvFilter::new("error"),
        _ => tracing_subscriber::EnvFilter::new("info"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global tracing subscriber");

    info!("Log level: {}", log_level);
}

/// Consume the event bus and fan out to viewer sessions.
fn spawn_hub_dispatch(
    hub: Arc<BroadcastHub>,
    mut events: broadcast::Receiver<lib_core::ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => hub.dispatch(&event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Live delivery is best-effort; viewers re-fetch
                        // through the REST layer if they care about the gap.
                        warn!(missed, "hub dispatch lagged behind the feed");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        info!("hub dispatch stopped");
    });
}

/// Apply index settings, then run incremental sync until shutdown.
fn spawn_index_sync(
    synchronizer: Arc<IndexSynchronizer<MeiliIndexStore, CursorRepository>>,
    events: broadcast::Receiver<lib_core::ChangeEvent>,
    shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        if let Err(e) = synchronizer.ensure_index().await {
            error!(error = %e, "failed to apply index settings; writes will keep retrying");
        }
        synchronizer.run_incremental(events, shutdown).await;
    });
}

/// Run a backfill whenever one is recommended (startup request, unresumable
/// cursor, or a lagged sync consumer).
fn spawn_backfill_supervisor(
    synchronizer: Arc<IndexSynchronizer<MeiliIndexStore, CursorRepository>>,
    store: MongoStore,
    health: Arc<FeedHealth>,
    batch_size: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if !health.resync_recommended() {
                        continue;
                    }
                    info!("resync recommended, starting index backfill");
                    match MessageRepository::open_backfill(&store, batch_size).await {
                        Ok(mut source) => match synchronizer.backfill(&mut source).await {
                            Ok(report) => info!(
                                batches = report.batches,
                                indexed = report.indexed,
                                skipped = report.skipped,
                                "index backfill finished"
                            ),
                            Err(e) => error!(error = %e, "index backfill failed, will retry"),
                        },
                        Err(e) => error!(error = %e, "could not open backfill enumeration"),
                    }
                }
            }
        }
        info!("backfill supervisor stopped");
    });
}

/// Create the main application router with all routes
fn create_router(state: AppState, allowed_origins: Vec<String>) -> Router {
    use axum::http::{HeaderValue, Method};

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(handlers::status::health))
        .route("/api/stream/status", get(handlers::status::stream_status))
        .route("/api/ws/stream", get(handlers::websocket::stream_websocket))
        .fallback(|| async {
            (axum::http::StatusCode::NOT_FOUND, "Route not found")
        })
        .with_state(state)
        // Request/response logging
        .layer(axum::middleware::from_fn(log_requests))
        // Tower HTTP trace layer for spans
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    let request_id = request
                        .extensions()
                        .get::<crate::middleware::mw_req_stamp::RequestStamp>()
                        .map(|s| s.id.clone())
                        .unwrap_or_else(|| "unknown".to_string());
                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            ),
        )
        // Request stamping (adds request ID); outermost of the logging
        // layers so both see the stamp
        .layer(axum::middleware::from_fn(stamp_req))
        .layer(cors)
}

/// Resolve on SIGINT/SIGTERM, then run the ordered teardown: feeds stop
/// producing, viewer connections close; the index client is dropped with the
/// runtime after serve returns.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>, hub: Arc<BroadcastHub>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    hub.close_all().await;
}

/// Log server information
fn log_server_info() {
    info!("STREAM:");
    info!("   • GET  /api/ws/stream (WebSocket)");
    info!("   • GET  /api/stream/status");
    info!("HEALTH:");
    info!("   • GET  /health");
}
// endregion: --- Server Setup
