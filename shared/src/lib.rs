//! # Shared Wire Types
//!
//! This library defines the WebSocket wire contract between the live stream
//! backend and dashboard clients.
//!
//! ## Structure
//!
//! - **[`frames`]**: event frames pushed to viewers and control frames
//!   received from them
//!
//! ## Wire Format
//!
//! All frames serialize to JSON using `serde`:
//! - The discriminating `type` field uses the snake_case names clients expect
//!   (`new_message`, `update_message`, `delete_message`, `new_group`,
//!   `subscribe`, `unsubscribe`)
//! - Event payloads are entity-shaped JSON objects; viewers must tolerate
//!   fields they do not know about
//!
//! ## Usage
//!
//! ```rust
//! use shared::frames::{ControlFrame, ControlKind};
//!
//! let frame: ControlFrame =
//!     serde_json::from_str(r#"{"type":"subscribe","chatId":42}"#).unwrap();
//! assert_eq!(frame.kind, ControlKind::Subscribe);
//! assert_eq!(frame.chat_id, 42);
//! ```

pub mod frames;

pub use frames::{ControlFrame, ControlKind, EventFrame, EventKind};
