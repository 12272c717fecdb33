//! # Stream Library
//!
//! The change-propagation core: watches the authoritative store's change
//! streams, normalizes notifications into [`ChangeEvent`]s, and fans them out
//! to the two independent consumer paths (the viewer broadcast hub here, the
//! index synchronizer in `lib-index`).
//!
//! ## Components
//!
//! - **[`feed`]**: one resumable change stream task per watched collection
//! - **[`bus`]**: in-process broadcast bus both consumers read from
//! - **[`hub`]**: session registry and subscription-filtered dispatch
//! - **[`health`]**: per-feed degraded-state flags consumers may poll
//!
//! [`ChangeEvent`]: lib_core::model::event::ChangeEvent

pub mod bus;
pub mod feed;
pub mod health;
pub mod hub;
pub mod session;

pub use bus::EventBus;
pub use feed::ChangeFeedSubscriber;
pub use health::FeedHealth;
pub use hub::BroadcastHub;
pub use session::{SessionId, ViewerSession};
