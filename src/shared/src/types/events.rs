//! Inventory change events
//!
//! Every mutation of the inventory index publishes one event on the internal
//! bus. Consumers (the live push channel, metrics) subscribe independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::core::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEvent {
    /// Strictly increasing across the whole index
    pub sequence: u64,
    pub subscription_id: String,
    pub change: InventoryChange,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum InventoryChange {
    Refreshed {
        snapshot_count: usize,
    },
    Created {
        snapshot_id: SnapshotId,
    },
    Deleted {
        snapshot_id: SnapshotId,
    },
    FavoriteToggled {
        snapshot_id: SnapshotId,
        favorite: bool,
    },
    /// Activity-only entry (failed deletion, lock warning); no snapshot changed
    ActivityRecorded {
        kind: ActivityKind,
    },
}
