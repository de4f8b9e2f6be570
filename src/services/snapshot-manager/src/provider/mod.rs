//! Cloud provider boundary
//!
//! The manager never talks to a cloud SDK directly; everything goes through
//! [`CloudProvider`]. Two implementations ship with the service:
//! - [`InMemoryProvider`]: deterministic, fault-injectable, used for tests and demo mode
//! - [`AzureCliProvider`]: drives the `az` command line

pub mod azure_cli;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snapshot_shared::{ResourceLock, Snapshot, SnapshotId, SubscriptionInfo};

pub use azure_cli::AzureCliProvider;
pub use memory::{InMemoryProvider, LockAction, LockJournalEntry, SnapshotFault};

/// Handle for a deletion issued to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOperation {
    pub operation_id: String,
    pub snapshot_id: SnapshotId,
    pub subscription_id: String,
}

/// Provider-side progress of a deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

/// Operations consumed from the cloud provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>>;

    async fn list_snapshots(&self, subscription_id: &str) -> Result<Vec<Snapshot>>;

    /// All management locks on a resource group, of any level
    async fn list_locks(&self, subscription_id: &str, resource_group: &str)
        -> Result<Vec<ResourceLock>>;

    async fn remove_lock(&self, lock: &ResourceLock) -> Result<()>;

    /// Recreate a previously removed lock with the same name, level and notes
    async fn restore_lock(&self, lock: &ResourceLock) -> Result<()>;

    /// Issue an asynchronous deletion; completion is observed with [`CloudProvider::poll_delete`]
    async fn begin_delete(&self, snapshot: &Snapshot) -> Result<DeleteOperation>;

    async fn poll_delete(&self, operation: &DeleteOperation) -> Result<DeleteStatus>;

    async fn create_snapshot(
        &self,
        subscription_id: &str,
        resource_group: &str,
        disk_name: &str,
    ) -> Result<Snapshot>;
}
