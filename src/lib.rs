//! Wayside - an offline-resilience gateway for map clients.
//!
//! This library provides the persistent local store, the per-route
//! caching/queueing proxy, the replay coordinator and the offline search
//! fallback shared by the gateway binary.

pub mod error;
pub mod export;
pub mod geo;
pub mod models;
pub mod proxy;
pub mod remote;
pub mod replay;
pub mod search;
pub mod store;

pub use error::WaysideError;
pub use models::{ActionKind, GazetteerPlace, QueuedAction, RecentSearch, UserPreferences};
pub use store::{LocalStore, Partition};
