//! Replay coordinator for the write queue.
//!
//! Drains queued confirm/correct actions through the network once
//! connectivity returns. The drain is strictly serial: one in-flight replay
//! at a time, in created_at order, so the server observes corrections in the
//! order the user made them.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::WaysideError;
use crate::models::{QueuedAction, QUEUE_RETENTION_MINUTES};
use crate::proxy::{RouteTable, NETWORK_TIMEOUT};
use crate::store::{LocalStore, Partition};

/// Signals broadcast to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Restored,
}

/// What one drain pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Successfully replayed and removed.
    pub replayed: usize,
    /// Permanently rejected by the server and dropped.
    pub dropped: usize,
    /// Discarded without replay after the retention window.
    pub expired: usize,
    /// Left in the queue because the network is still down.
    pub remaining: usize,
}

/// Idle until a connectivity-restored signal (or process activation), then
/// drains the queue and returns to idle.
#[derive(Clone)]
pub struct ReplayCoordinator {
    store: LocalStore,
    client: Client,
    routes: RouteTable,
    /// Held for the duration of a drain; guarantees no two drains overlap.
    drain_lock: Arc<Mutex<()>>,
}

impl ReplayCoordinator {
    pub fn new(store: LocalStore, client: Client, routes: RouteTable) -> Self {
        Self {
            store,
            client,
            routes,
            drain_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run the coordinator: one drain on activation, then one per
    /// connectivity-restored event.
    pub fn spawn(self, mut events: broadcast::Receiver<ConnectivityEvent>) {
        tokio::spawn(async move {
            info!("Replay coordinator started");
            self.drain().await;
            loop {
                match events.recv().await {
                    Ok(ConnectivityEvent::Restored) => {
                        self.drain().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Coalesced signals still mean "drain once".
                        debug!("Connectivity events lagged by {}", n);
                        self.drain().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("Replay coordinator stopped");
        });
    }

    /// Drain the queue in strict FIFO order. Stops at the first network
    /// failure, leaving the remainder intact for the next cycle.
    pub async fn drain(&self) -> DrainReport {
        let _guard = self.drain_lock.lock().await;

        let mut actions: Vec<QueuedAction> = self.store.get_all(Partition::WriteQueue).await;
        actions.sort_by_key(|a| a.created_at);
        if actions.is_empty() {
            return DrainReport::default();
        }

        info!("Draining {} queued actions", actions.len());
        let now = Utc::now();
        let mut report = DrainReport::default();
        let total = actions.len();

        for (index, action) in actions.into_iter().enumerate() {
            // Stale corrections are not worth an out-of-order server write.
            if action.is_expired(now) {
                debug!(
                    "Dropping action {}: {}",
                    action.id,
                    WaysideError::RetentionExpired(QUEUE_RETENTION_MINUTES)
                );
                self.store.delete(Partition::WriteQueue, &action.id).await;
                report.expired += 1;
                continue;
            }

            match self.replay_one(&action).await {
                ReplayResult::Delivered => {
                    self.store.delete(Partition::WriteQueue, &action.id).await;
                    report.replayed += 1;
                }
                ReplayResult::Rejected(status) => {
                    // The server answered but refused the action. Retrying
                    // cannot help; drop it and keep going.
                    warn!("Action {} rejected with {}, dropping", action.id, status);
                    self.store.delete(Partition::WriteQueue, &action.id).await;
                    report.dropped += 1;
                }
                ReplayResult::NetworkDown(reason) => {
                    warn!(
                        "{}; pausing drain with {} left",
                        WaysideError::QueueReplayFailed(format!("{}: {}", action.id, reason)),
                        total - index
                    );
                    report.remaining = total - index;
                    break;
                }
            }
        }

        info!(
            "Drain finished: {} replayed, {} dropped, {} expired, {} remaining",
            report.replayed, report.dropped, report.expired, report.remaining
        );
        report
    }

    async fn replay_one(&self, action: &QueuedAction) -> ReplayResult {
        let url = self.routes.write_endpoint(action.kind);
        let attempt = tokio::time::timeout(
            NETWORK_TIMEOUT,
            self.client.post(url).json(&action.payload).send(),
        )
        .await;

        match attempt {
            Ok(Ok(response)) if response.status().is_success() => ReplayResult::Delivered,
            // 5xx: the server is reachable but unwell; treat like the
            // network being down and retry next cycle.
            Ok(Ok(response)) if response.status().is_server_error() => {
                ReplayResult::NetworkDown(format!("status {}", response.status()))
            }
            Ok(Ok(response)) => ReplayResult::Rejected(response.status().as_u16()),
            Ok(Err(e)) => ReplayResult::NetworkDown(e.to_string()),
            Err(_) => ReplayResult::NetworkDown("timed out".to_string()),
        }
    }
}

enum ReplayResult {
    Delivered,
    Rejected(u16),
    NetworkDown(String),
}
