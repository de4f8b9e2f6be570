//! Inventory index
//!
//! Single owner of every [`Snapshot`] record. All mutations go through the
//! methods below; each one takes the write lock, applies the change, appends
//! to the subscription's recent-activity ring and publishes an
//! [`InventoryEvent`] before the lock is released, so readers never see a
//! mutation without its activity entry. Reads hand out clones.

use crate::error::{Result, SnapshotError};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use snapshot_shared::{
    ActivityEntry, ActivityKind, InventoryChange, InventoryEvent, Snapshot, SnapshotId,
    SubscriptionInfo,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::debug;

/// Consistent read of one subscription taken under a single lock acquisition
#[derive(Debug, Clone)]
pub struct SubscriptionView {
    /// Sequence of the newest event applied when the view was taken
    pub sequence: u64,
    pub snapshots: Vec<Snapshot>,
    /// Newest first
    pub recent_activity: Vec<ActivityEntry>,
    /// When the subscription last changed; snapshot ages are measured against it
    pub as_of: DateTime<Utc>,
}

#[derive(Default)]
struct IndexState {
    sequence: u64,
    subscriptions: BTreeMap<String, SubscriptionInfo>,
    snapshots: BTreeMap<String, BTreeMap<SnapshotId, Snapshot>>,
    owners: HashMap<SnapshotId, String>,
    activity: HashMap<String, VecDeque<ActivityEntry>>,
    changed_at: HashMap<String, DateTime<Utc>>,
}

pub struct InventoryIndex {
    state: RwLock<IndexState>,
    events: broadcast::Sender<InventoryEvent>,
    activity_capacity: usize,
}

struct Activity<'a> {
    kind: ActivityKind,
    snapshot_id: Option<&'a str>,
    message: String,
}

impl InventoryIndex {
    pub fn new(activity_capacity: usize, event_buffer_size: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer_size.max(1));
        Self {
            state: RwLock::new(IndexState::default()),
            events,
            activity_capacity: activity_capacity.max(1),
        }
    }

    /// Receiver for every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<InventoryEvent> {
        self.events.subscribe()
    }

    pub fn sequence(&self) -> u64 {
        self.state.read().sequence
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.state.read().subscriptions.values().cloned().collect()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.state.read().subscriptions.get(subscription_id).cloned()
    }

    pub fn get(&self, snapshot_id: &str) -> Option<Snapshot> {
        let state = self.state.read();
        let owner = state.owners.get(snapshot_id)?;
        state.snapshots.get(owner)?.get(snapshot_id).cloned()
    }

    pub fn snapshots(&self, subscription_id: &str) -> Vec<Snapshot> {
        self.state
            .read()
            .snapshots
            .get(subscription_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Case-insensitive substring match on the snapshot name
    pub fn search(&self, subscription_id: &str, keyword: &str) -> Vec<Snapshot> {
        let needle = keyword.trim().to_lowercase();
        let mut found: Vec<Snapshot> = self
            .snapshots(subscription_id)
            .into_iter()
            .filter(|s| needle.is_empty() || s.name.to_lowercase().contains(&needle))
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub fn favorites(&self, subscription_id: &str) -> Vec<Snapshot> {
        let mut found: Vec<Snapshot> = self
            .snapshots(subscription_id)
            .into_iter()
            .filter(|s| s.favorite)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }

    /// Newest first
    pub fn recent_activity(&self, subscription_id: &str) -> Vec<ActivityEntry> {
        self.state
            .read()
            .activity
            .get(subscription_id)
            .map(|ring| ring.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    /// Time of the subscription's last mutation, or now if it never changed
    pub fn as_of(&self, subscription_id: &str) -> DateTime<Utc> {
        self.state
            .read()
            .changed_at
            .get(subscription_id)
            .copied()
            .unwrap_or_else(Utc::now)
    }

    pub fn view(&self, subscription_id: &str) -> SubscriptionView {
        let state = self.state.read();
        SubscriptionView {
            as_of: state
                .changed_at
                .get(subscription_id)
                .copied()
                .unwrap_or_else(Utc::now),
            sequence: state.sequence,
            snapshots: state
                .snapshots
                .get(subscription_id)
                .map(|s| s.values().cloned().collect())
                .unwrap_or_default(),
            recent_activity: state
                .activity
                .get(subscription_id)
                .map(|ring| ring.iter().rev().cloned().collect())
                .unwrap_or_default(),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Replace the known subscription set; snapshots of vanished subscriptions are dropped
    pub fn set_subscriptions(&self, subscriptions: Vec<SubscriptionInfo>) {
        let mut state = self.state.write();
        state.subscriptions = subscriptions
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let known: Vec<String> = state.subscriptions.keys().cloned().collect();
        state.snapshots.retain(|sub, _| known.contains(sub));
        let IndexState { owners, snapshots, .. } = &mut *state;
        owners.retain(|_, sub| snapshots.contains_key(sub));
    }

    /// Replace a subscription's snapshots with a fresh provider listing.
    /// Favorite flags survive for snapshots still present.
    pub fn replace_subscription(&self, subscription_id: &str, listing: Vec<Snapshot>) -> Result<usize> {
        let mut state = self.state.write();
        if !state.subscriptions.contains_key(subscription_id) {
            return Err(SnapshotError::not_found(format!("subscription {}", subscription_id)));
        }

        let previous = state.snapshots.remove(subscription_id).unwrap_or_default();
        for id in previous.keys() {
            state.owners.remove(id);
        }

        let mut fresh = BTreeMap::new();
        for mut snapshot in listing {
            if let Some(old) = previous.get(&snapshot.id) {
                snapshot.favorite = old.favorite;
            }
            state.owners.insert(snapshot.id.clone(), subscription_id.to_string());
            fresh.insert(snapshot.id.clone(), snapshot);
        }
        let count = fresh.len();
        state.snapshots.insert(subscription_id.to_string(), fresh);

        self.publish(
            &mut state,
            subscription_id,
            InventoryChange::Refreshed { snapshot_count: count },
            Activity {
                kind: ActivityKind::InventoryRefreshed,
                snapshot_id: None,
                message: format!("Inventory refreshed: {} snapshots", count),
            },
        );
        Ok(count)
    }

    pub fn insert(&self, snapshot: Snapshot) -> Result<()> {
        let mut state = self.state.write();
        let subscription_id = snapshot.subscription_id.clone();
        if !state.subscriptions.contains_key(&subscription_id) {
            return Err(SnapshotError::not_found(format!("subscription {}", subscription_id)));
        }
        let id = snapshot.id.clone();
        let message = format!("Snapshot {} created in {}", snapshot.name, snapshot.resource_group);
        state.owners.insert(id.clone(), subscription_id.clone());
        state
            .snapshots
            .entry(subscription_id.clone())
            .or_default()
            .insert(id.clone(), snapshot);

        self.publish(
            &mut state,
            &subscription_id,
            InventoryChange::Created { snapshot_id: id.clone() },
            Activity {
                kind: ActivityKind::SnapshotCreated,
                snapshot_id: Some(&id),
                message,
            },
        );
        Ok(())
    }

    /// Drop a snapshot the provider confirmed as deleted
    pub fn remove(&self, snapshot_id: &str) -> Option<Snapshot> {
        let mut state = self.state.write();
        let subscription_id = state.owners.remove(snapshot_id)?;
        let removed = state
            .snapshots
            .get_mut(&subscription_id)
            .and_then(|s| s.remove(snapshot_id))?;

        self.publish(
            &mut state,
            &subscription_id,
            InventoryChange::Deleted {
                snapshot_id: snapshot_id.to_string(),
            },
            Activity {
                kind: ActivityKind::SnapshotDeleted,
                snapshot_id: Some(snapshot_id),
                message: format!("Snapshot {} deleted from {}", removed.name, removed.resource_group),
            },
        );
        Some(removed)
    }

    /// Flip the favorite flag and return the new value
    pub fn toggle_favorite(&self, snapshot_id: &str) -> Result<bool> {
        let mut state = self.state.write();
        let subscription_id = state
            .owners
            .get(snapshot_id)
            .cloned()
            .ok_or_else(|| SnapshotError::not_found(snapshot_id.to_string()))?;
        let snapshot = state
            .snapshots
            .get_mut(&subscription_id)
            .and_then(|s| s.get_mut(snapshot_id))
            .ok_or_else(|| SnapshotError::not_found(snapshot_id.to_string()))?;
        snapshot.favorite = !snapshot.favorite;
        let favorite = snapshot.favorite;
        let name = snapshot.name.clone();

        self.publish(
            &mut state,
            &subscription_id,
            InventoryChange::FavoriteToggled {
                snapshot_id: snapshot_id.to_string(),
                favorite,
            },
            Activity {
                kind: ActivityKind::FavoriteToggled,
                snapshot_id: Some(snapshot_id),
                message: if favorite {
                    format!("Snapshot {} added to favorites", name)
                } else {
                    format!("Snapshot {} removed from favorites", name)
                },
            },
        );
        Ok(favorite)
    }

    /// Activity entry with no snapshot change (failed deletion, lock warning)
    pub fn record_activity(
        &self,
        subscription_id: &str,
        kind: ActivityKind,
        snapshot_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let mut state = self.state.write();
        self.publish(
            &mut state,
            subscription_id,
            InventoryChange::ActivityRecorded { kind },
            Activity {
                kind,
                snapshot_id,
                message: message.into(),
            },
        );
    }

    fn publish(
        &self,
        state: &mut IndexState,
        subscription_id: &str,
        change: InventoryChange,
        activity: Activity<'_>,
    ) {
        state.sequence += 1;
        let sequence = state.sequence;
        let at = Utc::now();
        state.changed_at.insert(subscription_id.to_string(), at);

        let ring = state
            .activity
            .entry(subscription_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.activity_capacity));
        if ring.len() == self.activity_capacity {
            ring.pop_front();
        }
        ring.push_back(ActivityEntry {
            sequence,
            subscription_id: subscription_id.to_string(),
            kind: activity.kind,
            snapshot_id: activity.snapshot_id.map(str::to_string),
            message: activity.message,
            at,
        });

        // No receivers is fine; the publisher may not be running
        let _ = self.events.send(InventoryEvent {
            sequence,
            subscription_id: subscription_id.to_string(),
            change,
            at,
        });
        debug!(sequence, subscription_id, "Inventory event published");
    }
}
