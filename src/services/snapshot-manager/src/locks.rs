//! Lock coordination
//!
//! [`LockCoordinator::with_unlocked`] lifts every `CanNotDelete` lock on a
//! resource group, runs an operation, and puts the same locks back whatever
//! the operation did. Restoration runs on its own task, so dropping the
//! caller's future cannot interrupt it half way. If the scope is dropped
//! before the operation finishes, [`RestoreGuard`] schedules the restoration.
//!
//! Callers serialize scopes for the same resource group; this type does not.

use crate::error::{Result, SnapshotError};
use crate::inventory::InventoryIndex;
use crate::metrics::SnapshotMetrics;
use crate::provider::CloudProvider;
use crate::retry::{with_retry, RetryPolicy};

use snapshot_shared::{ActivityKind, LockLevel, LockWarning, ResourceLock};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Output of a lock scope
#[derive(Debug)]
pub struct Unlocked<T> {
    /// `Err` only when the locks could not be lifted; the operation did not run
    pub result: Result<T>,
    /// Locks that could not be put back
    pub warnings: Vec<LockWarning>,
}

#[derive(Clone)]
pub struct LockCoordinator {
    provider: Arc<dyn CloudProvider>,
    index: Arc<InventoryIndex>,
    metrics: SnapshotMetrics,
    retry: RetryPolicy,
}

impl LockCoordinator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        index: Arc<InventoryIndex>,
        metrics: SnapshotMetrics,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            index,
            metrics,
            retry,
        }
    }

    pub async fn with_unlocked<T, Fut>(
        &self,
        subscription_id: &str,
        resource_group: &str,
        operation: Fut,
    ) -> Unlocked<T>
    where
        Fut: Future<Output = T>,
    {
        let listed = with_retry(&self.retry, "list_locks", || {
            self.provider.list_locks(subscription_id, resource_group)
        })
        .await;
        let locks: Vec<ResourceLock> = match listed.result {
            Ok(locks) => locks
                .into_iter()
                .filter(|l| l.level == LockLevel::CanNotDelete)
                .collect(),
            Err(e) => {
                error!(resource_group, "Failed to list locks: {}", e);
                return Unlocked {
                    result: Err(e),
                    warnings: Vec::new(),
                };
            }
        };

        if locks.is_empty() {
            debug!(resource_group, "No delete lock present");
            return Unlocked {
                result: Ok(operation.await),
                warnings: Vec::new(),
            };
        }

        let mut guard = RestoreGuard::new(self.clone(), subscription_id);
        for lock in locks {
            let removed = with_retry(&self.retry, "remove_lock", || self.provider.remove_lock(&lock)).await;
            self.metrics.record_lock_operation("remove", removed.result.is_ok());
            match removed.result {
                Ok(()) => {
                    info!(resource_group, lock = %lock.name, "Removed delete lock");
                    let mut owned = lock;
                    owned.owned_by_operation = true;
                    guard.locks.push(owned);
                }
                Err(e) => {
                    error!(resource_group, lock = %lock.name, "Failed to remove delete lock: {}", e);
                    let warnings = guard.restore().await;
                    return Unlocked {
                        result: Err(e),
                        warnings,
                    };
                }
            }
        }

        let value = operation.await;
        let warnings = guard.restore().await;
        Unlocked {
            result: Ok(value),
            warnings,
        }
    }

    async fn restore_locks(self, subscription_id: String, locks: Vec<ResourceLock>) -> Vec<LockWarning> {
        let mut warnings = Vec::new();
        for lock in locks {
            let restored = with_retry(&self.retry, "restore_lock", || self.provider.restore_lock(&lock)).await;
            self.metrics.record_lock_operation("restore", restored.result.is_ok());
            match restored.result {
                Ok(()) => {
                    info!(resource_group = %lock.resource_group, lock = %lock.name, "Restored delete lock");
                }
                Err(e) => {
                    let failure = SnapshotError::lock_restoration(&lock.resource_group, &lock.name, e.to_string());
                    error!(
                        severity = "high",
                        resource_group = %lock.resource_group,
                        lock = %lock.name,
                        "Resource group left unprotected: {}",
                        failure
                    );
                    self.index.record_activity(
                        &subscription_id,
                        ActivityKind::LockRestoreFailed,
                        None,
                        format!(
                            "Lock {} on {} could not be restored",
                            lock.name, lock.resource_group
                        ),
                    );
                    warnings.push(LockWarning {
                        resource_group: lock.resource_group.clone(),
                        lock_name: lock.name.clone(),
                        message: failure.to_string(),
                        severity: "high".to_string(),
                    });
                }
            }
        }
        warnings
    }
}

/// Owes a restoration for every lock it holds
pub struct RestoreGuard {
    coordinator: LockCoordinator,
    subscription_id: String,
    locks: Vec<ResourceLock>,
}

impl RestoreGuard {
    fn new(coordinator: LockCoordinator, subscription_id: &str) -> Self {
        Self {
            coordinator,
            subscription_id: subscription_id.to_string(),
            locks: Vec::new(),
        }
    }

    /// Restore on a detached task and wait for it
    async fn restore(&mut self) -> Vec<LockWarning> {
        let locks = std::mem::take(&mut self.locks);
        if locks.is_empty() {
            return Vec::new();
        }
        let task = tokio::spawn(
            self.coordinator
                .clone()
                .restore_locks(self.subscription_id.clone(), locks.clone()),
        );
        match task.await {
            Ok(warnings) => warnings,
            Err(e) => {
                error!(severity = "high", "Lock restoration task failed: {}", e);
                locks
                    .into_iter()
                    .map(|lock| LockWarning {
                        message: format!("restoration task failed: {}", e),
                        resource_group: lock.resource_group,
                        lock_name: lock.name,
                        severity: "high".to_string(),
                    })
                    .collect()
            }
        }
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }
        let locks = std::mem::take(&mut self.locks);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                info!(count = locks.len(), "Lock scope dropped, restoring locks in background");
                handle.spawn(
                    self.coordinator
                        .clone()
                        .restore_locks(self.subscription_id.clone(), locks),
                );
            }
            Err(_) => {
                for lock in locks {
                    error!(
                        severity = "high",
                        resource_group = %lock.resource_group,
                        lock = %lock.name,
                        "No runtime available to restore lock"
                    );
                }
            }
        }
    }
}
