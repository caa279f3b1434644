//! Error kinds for the offline-resilience layer.
//!
//! Nothing here is fatal to the application: every variant maps to a
//! degradation (serve stale, serve local, queue for later) rather than an
//! aborted user flow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaysideError {
    /// The remote suggestion/geocoding provider returned a non-200 status,
    /// unparseable payload, or timed out. Callers fall back to local search.
    #[error("suggestion provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The durable backend rejected a write (quota exceeded, disabled).
    /// The store degrades to a no-op and the caller continues.
    #[error("durable store write rejected: {0}")]
    QuotaExceeded(String),

    /// A queued action could not be replayed because the network is still
    /// down. The action is retained for the next drain cycle.
    #[error("queued action replay failed: {0}")]
    QueueReplayFailed(String),

    /// A queued action aged past the retention window and was discarded
    /// without replay.
    #[error("queued action expired after {0} minutes")]
    RetentionExpired(i64),
}
