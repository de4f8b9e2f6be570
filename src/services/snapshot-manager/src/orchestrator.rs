//! Deletion orchestration
//!
//! Snapshots are partitioned by resource group. Each group runs on its own
//! task inside one lock scope, after taking the group's gate so a second
//! batch touching the same group waits for the first to restore its locks.
//! Provider calls across all groups share one semaphore. Every input id
//! yields exactly one [`DeletionAttempt`], returned in input order.

use crate::error::SnapshotError;
use crate::inventory::InventoryIndex;
use crate::locks::LockCoordinator;
use crate::metrics::SnapshotMetrics;
use crate::provider::{CloudProvider, DeleteOperation, DeleteStatus};
use crate::retry::{with_retry, RetryPolicy};

use dashmap::DashMap;
use futures::future::join_all;
use snapshot_shared::{
    ActivityKind, BatchOutcome, DeleteOldSnapshotsResponse, DeletionAttempt, FailureReason,
    LockWarning, Snapshot, SnapshotId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything a batch produced. Handed to the caller, never retained.
#[derive(Debug, Clone, Default)]
pub struct DeletionReport {
    pub attempts: Vec<DeletionAttempt>,
    pub lock_warnings: Vec<LockWarning>,
}

impl DeletionReport {
    pub fn outcome(&self) -> BatchOutcome {
        let succeeded = self.attempts.iter().filter(|a| a.is_success()).count();
        BatchOutcome::from_counts(succeeded, self.attempts.len())
    }

    pub fn deleted(&self) -> Vec<SnapshotId> {
        self.attempts
            .iter()
            .filter(|a| a.is_success())
            .map(|a| a.snapshot_id.clone())
            .collect()
    }

    /// Failed and skipped items alike
    pub fn failed(&self) -> Vec<SnapshotId> {
        self.attempts
            .iter()
            .filter(|a| !a.is_success())
            .map(|a| a.snapshot_id.clone())
            .collect()
    }

    pub fn into_response(self) -> DeleteOldSnapshotsResponse {
        DeleteOldSnapshotsResponse {
            outcome: self.outcome(),
            deleted: self.deleted(),
            failed: self.failed(),
            attempts: self.attempts,
            lock_warnings: self.lock_warnings,
        }
    }
}

/// Timing of the provider's asynchronous deletions
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

type Positioned = (usize, DeletionAttempt);

struct GroupResult {
    attempts: Vec<Positioned>,
    warnings: Vec<LockWarning>,
}

#[derive(Clone)]
pub struct DeletionOrchestrator {
    provider: Arc<dyn CloudProvider>,
    index: Arc<InventoryIndex>,
    locks: LockCoordinator,
    metrics: SnapshotMetrics,
    permits: Arc<Semaphore>,
    group_gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
    retry: RetryPolicy,
    poll: PollSettings,
}

impl DeletionOrchestrator {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        index: Arc<InventoryIndex>,
        locks: LockCoordinator,
        metrics: SnapshotMetrics,
        concurrency: usize,
        retry: RetryPolicy,
        poll: PollSettings,
    ) -> Self {
        Self {
            provider,
            index,
            locks,
            metrics,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            group_gates: Arc::new(DashMap::new()),
            retry,
            poll,
        }
    }

    /// Attempt deletion of every id. Duplicate ids collapse to their first occurrence.
    pub async fn delete(&self, snapshot_ids: Vec<SnapshotId>, cancel: CancellationToken) -> DeletionReport {
        let mut seen = HashSet::new();
        let ids: Vec<SnapshotId> = snapshot_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        if ids.is_empty() {
            debug!("Nothing to delete");
            return DeletionReport::default();
        }

        let mut attempts: Vec<Positioned> = Vec::with_capacity(ids.len());
        let mut groups: BTreeMap<(String, String), Vec<(usize, Snapshot)>> = BTreeMap::new();
        let mut owners: HashMap<SnapshotId, String> = HashMap::new();
        for (position, id) in ids.into_iter().enumerate() {
            match self.index.get(&id) {
                Some(snapshot) => {
                    owners.insert(snapshot.id.clone(), snapshot.subscription_id.clone());
                    groups
                        .entry((
                            snapshot.subscription_id.clone(),
                            snapshot.resource_group.to_lowercase(),
                        ))
                        .or_default()
                        .push((position, snapshot));
                }
                None => attempts.push((
                    position,
                    DeletionAttempt::skipped(
                        id,
                        None,
                        FailureReason::NotInInventory,
                        "snapshot is not in the inventory",
                    ),
                )),
            }
        }

        info!(
            groups = groups.len(),
            snapshots = groups.values().map(Vec::len).sum::<usize>(),
            "Starting deletion batch"
        );

        let mut tasks = Vec::with_capacity(groups.len());
        for (_, items) in groups {
            let positions: Vec<(usize, SnapshotId, String)> = items
                .iter()
                .map(|(p, s)| (*p, s.id.clone(), s.resource_group.clone()))
                .collect();
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move { orchestrator.run_group(items, cancel).await });
            tasks.push((positions, handle));
        }

        let (position_sets, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let mut lock_warnings = Vec::new();
        for (positions, joined) in position_sets.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(group) => {
                    attempts.extend(group.attempts);
                    lock_warnings.extend(group.warnings);
                }
                Err(e) => {
                    error!("Deletion group task failed: {}", e);
                    attempts.extend(positions.into_iter().map(|(position, id, rg)| {
                        (
                            position,
                            DeletionAttempt::failed(
                                id,
                                Some(rg),
                                FailureReason::Provider,
                                format!("deletion task failed: {}", e),
                                0,
                            ),
                        )
                    }));
                }
            }
        }

        attempts.sort_by_key(|(position, _)| *position);
        let report = DeletionReport {
            attempts: attempts.into_iter().map(|(_, a)| a).collect(),
            lock_warnings,
        };
        self.log_batch(&report, &owners);
        report
    }

    async fn run_group(&self, items: Vec<(usize, Snapshot)>, cancel: CancellationToken) -> GroupResult {
        let Some((_, first)) = items.first() else {
            return GroupResult {
                attempts: Vec::new(),
                warnings: Vec::new(),
            };
        };
        let subscription_id = first.subscription_id.clone();
        let resource_group = first.resource_group.clone();
        let gate_key = format!("{}/{}", subscription_id, resource_group.to_lowercase());

        let gate = self
            .group_gates
            .entry(gate_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let held = tokio::select! {
            held = gate.clone().lock_owned() => held,
            _ = cancel.cancelled() => {
                warn!(resource_group = %resource_group, "Batch cancelled while waiting for resource group");
                return GroupResult {
                    attempts: items
                        .into_iter()
                        .map(|(p, s)| (p, self.cancelled_attempt(&s, 0, "unlocking the resource group")))
                        .collect(),
                    warnings: Vec::new(),
                };
            }
        };
        debug!(resource_group = %resource_group, count = items.len(), "Resource group gate acquired");

        let item_meta: Vec<(usize, Snapshot)> = items.clone();
        let unlocked = self
            .locks
            .with_unlocked(&subscription_id, &resource_group, self.delete_items(items, &cancel))
            .await;

        drop(held);
        drop(gate);
        self.group_gates
            .remove_if(&gate_key, |_, g| Arc::strong_count(g) == 1);

        let attempts = match unlocked.result {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(
                    resource_group = %resource_group,
                    "Lock removal failed, skipping {} snapshot(s): {}",
                    item_meta.len(),
                    e
                );
                self.index.record_activity(
                    &subscription_id,
                    ActivityKind::DeletionFailed,
                    None,
                    format!(
                        "Skipped {} snapshot(s) in {}: lock could not be removed",
                        item_meta.len(),
                        resource_group
                    ),
                );
                item_meta
                    .into_iter()
                    .map(|(p, s)| {
                        let attempt = DeletionAttempt::skipped(
                            s.id,
                            Some(s.resource_group),
                            FailureReason::LockRemoval,
                            e.to_string(),
                        );
                        self.metrics.record_attempt(&attempt, 0.0);
                        (p, attempt)
                    })
                    .collect()
            }
        };

        GroupResult {
            attempts,
            warnings: unlocked.warnings,
        }
    }

    async fn delete_items(&self, items: Vec<(usize, Snapshot)>, cancel: &CancellationToken) -> Vec<Positioned> {
        join_all(items.into_iter().map(|(position, snapshot)| async move {
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => permit,
                _ = cancel.cancelled() => {
                    return (position, self.cancelled_attempt(&snapshot, 0, "waiting for a deletion worker"));
                }
            };
            let attempt = match permit {
                Ok(_permit) => self.delete_one(&snapshot, cancel).await,
                Err(e) => DeletionAttempt::failed(
                    snapshot.id.clone(),
                    Some(snapshot.resource_group.clone()),
                    FailureReason::Provider,
                    format!("worker pool closed: {}", e),
                    0,
                ),
            };
            (position, attempt)
        }))
        .await
    }

    async fn delete_one(&self, snapshot: &Snapshot, cancel: &CancellationToken) -> DeletionAttempt {
        let started = Instant::now();
        let calls = AtomicU32::new(0);

        let issued = tokio::select! {
            retried = with_retry(&self.retry, "begin_delete", || {
                calls.fetch_add(1, Ordering::SeqCst);
                self.provider.begin_delete(snapshot)
            }) => retried,
            _ = cancel.cancelled() => {
                return self.finish(snapshot, started, self.cancelled_attempt(
                    snapshot,
                    calls.load(Ordering::SeqCst),
                    "issuing the deletion; outcome unknown",
                ));
            }
        };
        self.metrics.record_retries(issued.attempts.saturating_sub(1));

        let attempt = match issued.result {
            Ok(operation) => self.await_completion(snapshot, operation, &calls, cancel).await,
            Err(SnapshotError::NotFound { .. }) => {
                debug!(snapshot_id = %snapshot.id, "Snapshot already gone at the provider");
                self.index.remove(&snapshot.id);
                DeletionAttempt::succeeded(
                    snapshot.id.clone(),
                    snapshot.resource_group.clone(),
                    calls.load(Ordering::SeqCst),
                )
            }
            Err(e) => DeletionAttempt::failed(
                snapshot.id.clone(),
                Some(snapshot.resource_group.clone()),
                e.failure_reason(),
                e.to_string(),
                calls.load(Ordering::SeqCst),
            ),
        };
        self.finish(snapshot, started, attempt)
    }

    async fn await_completion(
        &self,
        snapshot: &Snapshot,
        operation: DeleteOperation,
        calls: &AtomicU32,
        cancel: &CancellationToken,
    ) -> DeletionAttempt {
        let deadline = Instant::now() + self.poll.timeout;
        let failed = |reason: FailureReason, detail: String| {
            DeletionAttempt::failed(
                snapshot.id.clone(),
                Some(snapshot.resource_group.clone()),
                reason,
                detail,
                calls.load(Ordering::SeqCst),
            )
        };

        loop {
            let polled = with_retry(&self.retry, "poll_delete", || self.provider.poll_delete(&operation)).await;
            match polled.result {
                Ok(DeleteStatus::Succeeded) | Err(SnapshotError::NotFound { .. }) => {
                    self.index.remove(&snapshot.id);
                    return DeletionAttempt::succeeded(
                        snapshot.id.clone(),
                        snapshot.resource_group.clone(),
                        calls.load(Ordering::SeqCst),
                    );
                }
                Ok(DeleteStatus::Failed(reason)) => {
                    return failed(FailureReason::Provider, format!("provider reported failure: {}", reason));
                }
                Ok(DeleteStatus::InProgress) => {}
                Err(e) => return failed(e.failure_reason(), e.to_string()),
            }

            if Instant::now() >= deadline {
                return failed(
                    FailureReason::TransientProvider,
                    format!("deletion did not complete within {:?}", self.poll.timeout),
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll.interval) => {}
                _ = cancel.cancelled() => {
                    return self.cancelled_attempt(
                        snapshot,
                        calls.load(Ordering::SeqCst),
                        "waiting for the deletion; outcome unknown",
                    );
                }
            }
        }
    }

    fn cancelled_attempt(&self, snapshot: &Snapshot, calls: u32, stage: &str) -> DeletionAttempt {
        let error = SnapshotError::cancelled(stage);
        DeletionAttempt::failed(
            snapshot.id.clone(),
            Some(snapshot.resource_group.clone()),
            error.failure_reason(),
            error.to_string(),
            calls,
        )
    }

    fn finish(&self, snapshot: &Snapshot, started: Instant, attempt: DeletionAttempt) -> DeletionAttempt {
        self.metrics
            .record_attempt(&attempt, started.elapsed().as_secs_f64());
        if attempt.is_success() {
            debug!(snapshot_id = %snapshot.id, "Snapshot deleted");
        } else {
            error!(
                snapshot_id = %snapshot.id,
                resource_group = %snapshot.resource_group,
                reason = ?attempt.reason,
                "Snapshot deletion failed: {}",
                attempt.detail.as_deref().unwrap_or_default()
            );
            self.index.record_activity(
                &snapshot.subscription_id,
                ActivityKind::DeletionFailed,
                Some(&snapshot.id),
                format!(
                    "Failed to delete {}: {}",
                    snapshot.name,
                    attempt.detail.as_deref().unwrap_or_default()
                ),
            );
        }
        attempt
    }

    /// Deleted ids grouped by subscription and resource group
    fn log_batch(&self, report: &DeletionReport, owners: &HashMap<SnapshotId, String>) {
        let mut grouped: BTreeMap<(String, String), Vec<&str>> = BTreeMap::new();
        for attempt in report.attempts.iter().filter(|a| a.is_success()) {
            let subscription = owners.get(&attempt.snapshot_id).cloned().unwrap_or_default();
            let resource_group = attempt.resource_group.clone().unwrap_or_default();
            grouped
                .entry((subscription, resource_group))
                .or_default()
                .push(&attempt.snapshot_id);
        }
        for ((subscription, resource_group), mut ids) in grouped {
            ids.sort_unstable();
            info!(
                subscription = %subscription,
                resource_group = %resource_group,
                "Deleted snapshots: {}",
                ids.join(", ")
            );
        }

        let deleted = report.attempts.iter().filter(|a| a.is_success()).count();
        info!(
            outcome = ?report.outcome(),
            deleted,
            failed = report.attempts.len() - deleted,
            lock_warnings = report.lock_warnings.len(),
            "Deletion batch finished"
        );
    }
}
