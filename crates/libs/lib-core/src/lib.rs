//! # Core Library
//!
//! Core models, document store access, configuration, and error handling for
//! the live stream service.

pub mod config;
pub mod error;
pub mod model;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, Result};
pub use model::event::{ChangeEvent, ChangeOperation, WatchedCollection};
pub use model::store::MongoStore;
