//! Offline export of locally persisted corrections.
//!
//! Builds a standalone JSON document from the write queue without touching
//! the network, so users can extract their pending corrections even when
//! everything upstream is gone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::QueuedAction;
use crate::store::{LocalStore, Partition};

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportDocument {
    pub generated_at: DateTime<Utc>,
    pub actions: Vec<QueuedAction>,
}

/// Serialize every queued action, oldest first.
pub async fn export_corrections(store: &LocalStore) -> ExportDocument {
    let mut actions: Vec<QueuedAction> = store.get_all(Partition::WriteQueue).await;
    actions.sort_by_key(|a| a.created_at);
    ExportDocument {
        generated_at: Utc::now(),
        actions,
    }
}
