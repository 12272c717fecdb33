//! # Web Library
//!
//! HTTP/WebSocket surface and service wiring: the viewer WebSocket endpoint,
//! the operational status endpoints, middleware, and server startup.

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{start_server, AppState, ServerConfig};
