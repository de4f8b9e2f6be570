//! In-memory cloud provider
//!
//! Holds subscriptions, snapshots and locks in process. Faults can be injected
//! per snapshot and per resource group, and every lock call is journaled so
//! callers can check that removals and restorations pair up.

use super::{CloudProvider, DeleteOperation, DeleteStatus};
use crate::error::{Result, SnapshotError};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use snapshot_shared::{
    LockLevel, ResourceLock, Snapshot, SnapshotId, SnapshotStatus, SubscriptionInfo,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Fault returned by the provider for one snapshot's deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotFault {
    /// Every delete call fails with an authorization error
    Authorization,
    /// The first `n` delete calls fail transiently, later calls succeed
    TransientTimes(u32),
    /// Every delete call fails transiently
    AlwaysTransient,
    /// The snapshot vanished before the delete was issued
    NotFound,
    /// The deletion is accepted but never completes
    Stuck,
    /// The deletion is accepted and completes as failed
    CompletesFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Remove,
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockJournalEntry {
    pub resource_group: String,
    pub lock_name: String,
    pub action: LockAction,
    pub succeeded: bool,
}

#[derive(Default)]
struct MemoryState {
    subscriptions: Vec<SubscriptionInfo>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    locks: HashMap<String, Vec<ResourceLock>>,
    faults: HashMap<SnapshotId, SnapshotFault>,
    delete_calls: HashMap<SnapshotId, u32>,
    pending: HashMap<String, SnapshotId>,
    failing_lock_removal: HashSet<String>,
    failing_lock_restore: HashSet<String>,
    journal: Vec<LockJournalEntry>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Deterministic provider backed by process memory
pub struct InMemoryProvider {
    state: Mutex<MemoryState>,
    delete_latency: Mutex<Duration>,
}

fn lock_key(subscription_id: &str, resource_group: &str) -> String {
    format!("{}/{}", subscription_id, resource_group.to_lowercase())
}

pub(crate) fn snapshot_resource_id(subscription_id: &str, resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/snapshots/{}",
        subscription_id, resource_group, name
    )
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            delete_latency: Mutex::new(Duration::ZERO),
        }
    }

    /// Provider pre-filled with a small, fixed inventory per subscription
    pub fn with_demo_data(subscriptions: &[SubscriptionInfo], now: DateTime<Utc>) -> Self {
        let provider = Self::new();
        for subscription in subscriptions {
            provider.add_subscription(subscription.clone());
            let groups = ["rg-app", "rg-data"];
            for (i, age) in [1i64, 4, 12, 45, 120].iter().enumerate() {
                let group = groups[i % groups.len()];
                let name = format!("snap-{}-{}d", group, age);
                provider.insert_snapshot(Snapshot {
                    id: snapshot_resource_id(&subscription.id, group, &name),
                    name,
                    resource_group: group.to_string(),
                    subscription_id: subscription.id.clone(),
                    created_at: now - ChronoDuration::days(*age),
                    size_gb: [0u64, 4, 32, 128, 512][i],
                    status: SnapshotStatus::Ready,
                    favorite: false,
                    environment: Default::default(),
                    created_by: Some("demo@snapshot-manager.dev".to_string()),
                });
            }
            provider.add_lock(&subscription.id, "rg-data", "protect-data", LockLevel::CanNotDelete);
        }
        provider
    }

    pub fn add_subscription(&self, subscription: SubscriptionInfo) {
        self.state.lock().subscriptions.push(subscription);
    }

    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        self.state.lock().snapshots.insert(snapshot.id.clone(), snapshot);
    }

    pub fn add_lock(&self, subscription_id: &str, resource_group: &str, name: &str, level: LockLevel) {
        let lock = ResourceLock {
            id: format!(
                "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Authorization/locks/{}",
                subscription_id, resource_group, name
            ),
            name: name.to_string(),
            resource_group: resource_group.to_string(),
            subscription_id: subscription_id.to_string(),
            level,
            notes: None,
            owned_by_operation: false,
        };
        self.state
            .lock()
            .locks
            .entry(lock_key(subscription_id, resource_group))
            .or_default()
            .push(lock);
    }

    pub fn inject_fault(&self, snapshot_id: &str, fault: SnapshotFault) {
        self.state.lock().faults.insert(snapshot_id.to_string(), fault);
    }

    pub fn fail_lock_removal(&self, subscription_id: &str, resource_group: &str) {
        self.state
            .lock()
            .failing_lock_removal
            .insert(lock_key(subscription_id, resource_group));
    }

    pub fn fail_lock_restore(&self, subscription_id: &str, resource_group: &str) {
        self.state
            .lock()
            .failing_lock_restore
            .insert(lock_key(subscription_id, resource_group));
    }

    /// Simulated time each delete call spends at the provider
    pub fn set_delete_latency(&self, latency: Duration) {
        *self.delete_latency.lock() = latency;
    }

    pub fn lock_journal(&self) -> Vec<LockJournalEntry> {
        self.state.lock().journal.clone()
    }

    /// (locks actually removed, restore calls) for a resource group
    pub fn lock_calls(&self, resource_group: &str) -> (usize, usize) {
        let state = self.state.lock();
        let entries = || {
            state
                .journal
                .iter()
                .filter(|e| e.resource_group.eq_ignore_ascii_case(resource_group))
        };
        let removed = entries()
            .filter(|e| e.action == LockAction::Remove && e.succeeded)
            .count();
        let restores = entries().filter(|e| e.action == LockAction::Restore).count();
        (removed, restores)
    }

    pub fn locks_on(&self, subscription_id: &str, resource_group: &str) -> Vec<ResourceLock> {
        self.state
            .lock()
            .locks
            .get(&lock_key(subscription_id, resource_group))
            .cloned()
            .unwrap_or_default()
    }

    pub fn delete_calls(&self, snapshot_id: &str) -> u32 {
        self.state.lock().delete_calls.get(snapshot_id).copied().unwrap_or(0)
    }

    pub fn total_delete_calls(&self) -> u32 {
        self.state.lock().delete_calls.values().sum()
    }

    pub fn max_concurrent_deletes(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn contains_snapshot(&self, snapshot_id: &str) -> bool {
        self.state.lock().snapshots.contains_key(snapshot_id)
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloudProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        Ok(self.state.lock().subscriptions.clone())
    }

    async fn list_snapshots(&self, subscription_id: &str) -> Result<Vec<Snapshot>> {
        let state = self.state.lock();
        if !state.subscriptions.iter().any(|s| s.id == subscription_id) {
            return Err(SnapshotError::not_found(format!("subscription {}", subscription_id)));
        }
        Ok(state
            .snapshots
            .values()
            .filter(|s| s.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn list_locks(&self, subscription_id: &str, resource_group: &str) -> Result<Vec<ResourceLock>> {
        Ok(self.locks_on(subscription_id, resource_group))
    }

    async fn remove_lock(&self, lock: &ResourceLock) -> Result<()> {
        let key = lock_key(&lock.subscription_id, &lock.resource_group);
        let mut state = self.state.lock();
        let fails = state.failing_lock_removal.contains(&key);
        state.journal.push(LockJournalEntry {
            resource_group: lock.resource_group.clone(),
            lock_name: lock.name.clone(),
            action: LockAction::Remove,
            succeeded: !fails,
        });
        if fails {
            return Err(SnapshotError::authorization(format!(
                "not permitted to delete lock {}",
                lock.name
            )));
        }
        if let Some(locks) = state.locks.get_mut(&key) {
            locks.retain(|l| l.id != lock.id);
        }
        debug!("Removed lock {} on {}", lock.name, lock.resource_group);
        Ok(())
    }

    async fn restore_lock(&self, lock: &ResourceLock) -> Result<()> {
        let key = lock_key(&lock.subscription_id, &lock.resource_group);
        let mut state = self.state.lock();
        let fails = state.failing_lock_restore.contains(&key);
        state.journal.push(LockJournalEntry {
            resource_group: lock.resource_group.clone(),
            lock_name: lock.name.clone(),
            action: LockAction::Restore,
            succeeded: !fails,
        });
        if fails {
            return Err(SnapshotError::provider("restore_lock", "lock create rejected"));
        }
        let mut restored = lock.clone();
        restored.owned_by_operation = false;
        state.locks.entry(key).or_default().push(restored);
        debug!("Restored lock {} on {}", lock.name, lock.resource_group);
        Ok(())
    }

    async fn begin_delete(&self, snapshot: &Snapshot) -> Result<DeleteOperation> {
        let fault = {
            let mut state = self.state.lock();
            let calls = state.delete_calls.entry(snapshot.id.clone()).or_insert(0);
            *calls += 1;
            let call_number = *calls;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.faults.get(&snapshot.id).cloned().map(|f| (f, call_number))
        };

        let latency = *self.delete_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;

        match fault {
            Some((SnapshotFault::Authorization, _)) => {
                return Err(SnapshotError::authorization(format!(
                    "AuthorizationFailed: cannot delete {}",
                    snapshot.name
                )))
            }
            Some((SnapshotFault::TransientTimes(n), call)) if call <= n => {
                return Err(SnapshotError::transient("begin_delete", "TooManyRequests"))
            }
            Some((SnapshotFault::AlwaysTransient, _)) => {
                return Err(SnapshotError::transient("begin_delete", "OperationTimedOut"))
            }
            Some((SnapshotFault::NotFound, _)) => {
                state.snapshots.remove(&snapshot.id);
                return Err(SnapshotError::not_found(snapshot.id.clone()));
            }
            _ => {}
        }

        if !state.snapshots.contains_key(&snapshot.id) {
            return Err(SnapshotError::not_found(snapshot.id.clone()));
        }

        let operation_id = Uuid::new_v4().to_string();
        state.pending.insert(operation_id.clone(), snapshot.id.clone());
        Ok(DeleteOperation {
            operation_id,
            snapshot_id: snapshot.id.clone(),
            subscription_id: snapshot.subscription_id.clone(),
        })
    }

    async fn poll_delete(&self, operation: &DeleteOperation) -> Result<DeleteStatus> {
        let mut state = self.state.lock();
        match state.faults.get(&operation.snapshot_id).cloned() {
            Some(SnapshotFault::Stuck) => return Ok(DeleteStatus::InProgress),
            Some(SnapshotFault::CompletesFailed(reason)) => {
                state.pending.remove(&operation.operation_id);
                return Ok(DeleteStatus::Failed(reason));
            }
            _ => {}
        }
        if state.pending.remove(&operation.operation_id).is_none() {
            return Err(SnapshotError::not_found(format!(
                "delete operation {}",
                operation.operation_id
            )));
        }
        state.snapshots.remove(&operation.snapshot_id);
        Ok(DeleteStatus::Succeeded)
    }

    async fn create_snapshot(
        &self,
        subscription_id: &str,
        resource_group: &str,
        disk_name: &str,
    ) -> Result<Snapshot> {
        let mut state = self.state.lock();
        if !state.subscriptions.iter().any(|s| s.id == subscription_id) {
            return Err(SnapshotError::not_found(format!("subscription {}", subscription_id)));
        }
        let now = Utc::now();
        let name = format!("{}-snapshot-{}", disk_name, now.format("%Y%m%d%H%M%S%3f"));
        let snapshot = Snapshot {
            id: snapshot_resource_id(subscription_id, resource_group, &name),
            name,
            resource_group: resource_group.to_string(),
            subscription_id: subscription_id.to_string(),
            created_at: now,
            size_gb: 32,
            status: SnapshotStatus::Ready,
            favorite: false,
            environment: Default::default(),
            created_by: None,
        };
        state.snapshots.insert(snapshot.id.clone(), snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription() -> SubscriptionInfo {
        SubscriptionInfo {
            id: "sub-1".to_string(),
            name: "contoso-nonprod".to_string(),
        }
    }

    #[tokio::test]
    async fn test_demo_data_seeds_each_subscription() {
        let provider = InMemoryProvider::with_demo_data(&[subscription()], Utc::now());
        let snapshots = provider.list_snapshots("sub-1").await.unwrap();
        assert_eq!(snapshots.len(), 5);
        assert_eq!(provider.locks_on("sub-1", "rg-data").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_lifecycle() {
        let provider = InMemoryProvider::with_demo_data(&[subscription()], Utc::now());
        let snapshot = provider.list_snapshots("sub-1").await.unwrap().remove(0);

        let operation = provider.begin_delete(&snapshot).await.unwrap();
        assert_eq!(provider.poll_delete(&operation).await.unwrap(), DeleteStatus::Succeeded);
        assert!(!provider.contains_snapshot(&snapshot.id));
        assert_eq!(provider.delete_calls(&snapshot.id), 1);
    }

    #[tokio::test]
    async fn test_transient_fault_clears_after_n_calls() {
        let provider = InMemoryProvider::with_demo_data(&[subscription()], Utc::now());
        let snapshot = provider.list_snapshots("sub-1").await.unwrap().remove(0);
        provider.inject_fault(&snapshot.id, SnapshotFault::TransientTimes(1));

        let first = provider.begin_delete(&snapshot).await;
        assert!(matches!(first, Err(SnapshotError::TransientProvider { .. })));
        assert!(provider.begin_delete(&snapshot).await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_journal_counts_failed_restores() {
        let provider = InMemoryProvider::with_demo_data(&[subscription()], Utc::now());
        provider.fail_lock_restore("sub-1", "rg-data");
        let lock = provider.locks_on("sub-1", "rg-data").remove(0);

        provider.remove_lock(&lock).await.unwrap();
        assert!(provider.restore_lock(&lock).await.is_err());
        assert_eq!(provider.lock_calls("rg-data"), (1, 1));
        assert!(provider.locks_on("sub-1", "rg-data").is_empty());
    }
}
