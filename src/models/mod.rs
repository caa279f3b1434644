//! Core data models for the offline-resilience layer.

pub mod action;
pub mod place;

pub use action::{ActionKind, QueuedAction, UserPreferences, QUEUE_RETENTION_MINUTES};
pub use place::{CachedEntrance, GazetteerPlace, GazetteerRecord, RecentSearch, Suggestion};
