//! Shared type definitions for the snapshot lifecycle manager
//!
//! This module provides the domain records owned by the inventory, the
//! request/response shapes of the dashboard API, and the change events that
//! flow from the inventory to the live push channel.

pub mod api;
pub mod core;
pub mod events;

pub use self::api::{
    AgeBand, BatchOutcome, ClientMessage, CreateSnapshotRequest, DashboardUpdate,
    DeleteOldSnapshotsRequest, DeleteOldSnapshotsResponse, LockWarning, SearchQuery,
    ServerMessage, SnapshotListItem, SummaryQuery, ToggleFavoriteRequest,
    ToggleFavoriteResponse,
};
pub use self::core::{
    ActivityEntry, ActivityKind, AgeBucket, DeletionAttempt, DeletionOutcome, EnvironmentClass,
    FailureReason, LockLevel, ResourceLock, SizeBucket, Snapshot, SnapshotId, SnapshotStatus,
    SubscriptionInfo, SummarySnapshot,
};
pub use self::events::{InventoryChange, InventoryEvent};
