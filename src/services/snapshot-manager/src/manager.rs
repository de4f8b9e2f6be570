//! Snapshot Manager
//!
//! The core component that wires the engine together:
//! - Inventory loading from the cloud provider
//! - Retention evaluation and batch deletion
//! - Dashboard queries (summary, activity, search, favorites)
//! - The live sync publisher's lifecycle

use crate::config::{ProviderKind, SnapshotManagerConfig};
use crate::error::{Result, SnapshotError};
use crate::inventory::InventoryIndex;
use crate::live_sync::LiveSyncPublisher;
use crate::locks::LockCoordinator;
use crate::metrics::SnapshotMetrics;
use crate::orchestrator::{DeletionOrchestrator, DeletionReport, PollSettings};
use crate::provider::{AzureCliProvider, CloudProvider, InMemoryProvider};
use crate::retention::RetentionEvaluator;
use crate::retry::{with_retry, RetryPolicy};
use crate::summary::{self, TimeWindow};

use snapshot_shared::{
    ActivityEntry, CreateSnapshotRequest, DeleteOldSnapshotsRequest, DeleteOldSnapshotsResponse,
    Snapshot, SnapshotId, SnapshotListItem, SubscriptionInfo, SummaryQuery, SummarySnapshot,
    ToggleFavoriteRequest, ToggleFavoriteResponse,
};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use validator::Validate;

/// Main snapshot manager that coordinates all lifecycle operations
pub struct SnapshotManager {
    config: SnapshotManagerConfig,
    provider: Arc<dyn CloudProvider>,
    index: Arc<InventoryIndex>,
    retention: RetentionEvaluator,
    orchestrator: DeletionOrchestrator,
    publisher: LiveSyncPublisher,
    metrics: SnapshotMetrics,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Provider selected by configuration
pub fn build_provider(config: &SnapshotManagerConfig) -> Arc<dyn CloudProvider> {
    match config.provider.kind {
        ProviderKind::AzureCli => Arc::new(AzureCliProvider::new(&config.provider)),
        ProviderKind::InMemory => {
            let mut subscriptions = config.provider.seed_subscriptions.clone();
            if subscriptions.is_empty() {
                subscriptions = vec![
                    SubscriptionInfo {
                        id: "00000000-0000-0000-0000-000000000001".to_string(),
                        name: "contoso-prod".to_string(),
                    },
                    SubscriptionInfo {
                        id: "00000000-0000-0000-0000-000000000002".to_string(),
                        name: "contoso-nonprod".to_string(),
                    },
                ];
            }
            Arc::new(InMemoryProvider::with_demo_data(&subscriptions, Utc::now()))
        }
    }
}

impl SnapshotManager {
    /// Create a manager with the provider named in the configuration
    pub async fn new(config: SnapshotManagerConfig) -> Result<Self> {
        let provider = build_provider(&config);
        Self::with_provider(config, provider).await
    }

    /// Create a manager over an explicit provider and load its inventory
    pub async fn with_provider(config: SnapshotManagerConfig, provider: Arc<dyn CloudProvider>) -> Result<Self> {
        config.validate().map_err(SnapshotError::config)?;
        info!("Initializing snapshot manager with provider {}", provider.name());

        let metrics = SnapshotMetrics::new()?;
        let index = Arc::new(InventoryIndex::new(
            config.live_sync.activity_capacity,
            config.live_sync.event_buffer_size,
        ));
        let retention = RetentionEvaluator::new(&config.retention)?;
        let retry = RetryPolicy::from(&config.deletion.retry);
        let locks = LockCoordinator::new(provider.clone(), index.clone(), metrics.clone(), retry.clone());
        let orchestrator = DeletionOrchestrator::new(
            provider.clone(),
            index.clone(),
            locks,
            metrics.clone(),
            config.deletion.concurrency,
            retry.clone(),
            PollSettings {
                interval: Duration::from_millis(config.provider.poll_interval_ms),
                timeout: config.get_timeout("poll"),
            },
        );
        let publisher = LiveSyncPublisher::new(index.clone(), metrics.clone());

        let manager = Self {
            config,
            provider,
            index,
            retention,
            orchestrator,
            publisher,
            metrics,
            retry,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        };

        manager.refresh_subscriptions().await?;
        for subscription in manager.index.subscriptions() {
            if let Err(e) = manager.refresh_subscription(&subscription.id).await {
                warn!("Initial inventory load failed for {}: {}", subscription.id, e);
            }
        }

        info!(
            "Snapshot manager initialized with {} subscriptions",
            manager.index.subscriptions().len()
        );
        Ok(manager)
    }

    /// Start the live sync publisher
    pub fn start(&self) -> JoinHandle<()> {
        self.publisher.start(self.shutdown.child_token())
    }

    /// Cancel background work and in-flight batches; lock restorations still run
    pub fn shutdown(&self) {
        info!("Snapshot manager shutting down");
        self.shutdown.cancel();
    }

    pub fn config(&self) -> &SnapshotManagerConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<InventoryIndex> {
        &self.index
    }

    pub fn publisher(&self) -> &LiveSyncPublisher {
        &self.publisher
    }

    pub fn metrics(&self) -> &SnapshotMetrics {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Inventory loading
    // ------------------------------------------------------------------

    pub async fn refresh_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        let listed = with_retry(&self.retry, "list_subscriptions", || self.provider.list_subscriptions()).await;
        let subscriptions = listed.result?;
        self.index.set_subscriptions(subscriptions.clone());
        Ok(subscriptions)
    }

    /// Reload one subscription's snapshots from the provider
    pub async fn refresh_subscription(&self, subscription_id: &str) -> Result<usize> {
        let subscription = self.require_subscription(subscription_id)?;
        let listed = with_retry(&self.retry, "list_snapshots", || self.provider.list_snapshots(subscription_id)).await;

        let snapshots: Vec<Snapshot> = listed
            .result?
            .into_iter()
            .map(|mut snapshot| {
                snapshot.environment = self
                    .retention
                    .classifier()
                    .classify(&subscription.name, &snapshot.resource_group);
                snapshot
            })
            .collect();

        let count = self.index.replace_subscription(subscription_id, snapshots)?;
        info!("Loaded {} snapshots for subscription {}", count, subscription.name);
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn list_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.index.subscriptions()
    }

    pub fn summary(&self, subscription_id: &str, query: &SummaryQuery) -> Result<SummarySnapshot> {
        self.require_subscription(subscription_id)?;
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(SnapshotError::validation("from", "window start is after its end"));
            }
        }
        Ok(summary::compute(
            &self.index,
            subscription_id,
            TimeWindow::new(query.from, query.to),
        ))
    }

    pub fn recent_activity(&self, subscription_id: &str) -> Result<Vec<ActivityEntry>> {
        self.require_subscription(subscription_id)?;
        Ok(self.index.recent_activity(subscription_id))
    }

    pub fn search(&self, subscription_id: &str, keyword: Option<&str>) -> Result<Vec<SnapshotListItem>> {
        self.require_subscription(subscription_id)?;
        let now = Utc::now();
        Ok(self
            .index
            .search(subscription_id, keyword.unwrap_or_default())
            .into_iter()
            .map(|s| SnapshotListItem::new(s, now))
            .collect())
    }

    pub fn favorites(&self, subscription_id: &str) -> Result<Vec<SnapshotListItem>> {
        self.require_subscription(subscription_id)?;
        let now = Utc::now();
        Ok(self
            .index
            .favorites(subscription_id)
            .into_iter()
            .map(|s| SnapshotListItem::new(s, now))
            .collect())
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub async fn create_snapshot(&self, request: CreateSnapshotRequest) -> Result<Snapshot> {
        request.validate()?;
        let subscription = self.require_subscription(&request.subscription_id)?;

        let mut snapshot = self
            .provider
            .create_snapshot(&request.subscription_id, &request.resource_group, &request.disk_name)
            .await
            .map_err(|e| {
                error!("Failed to create snapshot of {}: {}", request.disk_name, e);
                e
            })?;
        snapshot.environment = self
            .retention
            .classifier()
            .classify(&subscription.name, &snapshot.resource_group);

        self.index.insert(snapshot.clone())?;
        info!("Created snapshot {} in {}", snapshot.name, snapshot.resource_group);
        Ok(snapshot)
    }

    /// Delete every snapshot of a subscription old enough under the retention policy
    pub async fn delete_old_snapshots(
        &self,
        request: DeleteOldSnapshotsRequest,
    ) -> Result<DeleteOldSnapshotsResponse> {
        request.validate()?;
        self.require_subscription(&request.subscription_id)?;

        let eligible = self.retention.eligible(
            &self.index,
            &request.subscription_id,
            Some(request.age_in_days),
            Utc::now(),
        )?;
        info!(
            "{} snapshot(s) in {} eligible for deletion (requested age {} days)",
            eligible.len(),
            request.subscription_id,
            request.age_in_days
        );

        Ok(self.delete_snapshots(eligible).await.into_response())
    }

    /// Delete an explicit set of snapshots
    pub async fn delete_snapshots(&self, snapshot_ids: Vec<SnapshotId>) -> DeletionReport {
        self.orchestrator
            .delete(snapshot_ids, self.shutdown.child_token())
            .await
    }

    pub fn toggle_favorite(&self, request: ToggleFavoriteRequest) -> Result<ToggleFavoriteResponse> {
        request.validate()?;
        let favorite = self.index.toggle_favorite(&request.snapshot_id)?;
        Ok(ToggleFavoriteResponse {
            snapshot_id: request.snapshot_id,
            favorite,
        })
    }

    /// Service health
    pub fn health_check(&self) -> serde_json::Value {
        serde_json::json!({
            "service": "snapshot-manager",
            "version": crate::VERSION,
            "status": "healthy",
            "timestamp": Utc::now(),
            "uptime_seconds": (Utc::now() - self.started_at).num_seconds(),
            "components": {
                "provider": self.provider.name(),
                "subscriptions": self.index.subscriptions().len(),
                "live_subscribers": self.publisher.subscriber_count(),
                "inventory_sequence": self.index.sequence(),
            }
        })
    }

    fn require_subscription(&self, subscription_id: &str) -> Result<SubscriptionInfo> {
        self.index
            .subscription(subscription_id)
            .ok_or_else(|| SnapshotError::not_found(format!("subscription {}", subscription_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_shared::BatchOutcome;

    fn config() -> SnapshotManagerConfig {
        let mut config = SnapshotManagerConfig::default();
        config.provider.seed_subscriptions = vec![SubscriptionInfo {
            id: "sub-1".to_string(),
            name: "contoso-nonprod".to_string(),
        }];
        config.provider.poll_interval_ms = 5;
        config.deletion.retry.initial_delay_ms = 1;
        config.deletion.retry.max_delay_ms = 2;
        config
    }

    #[tokio::test]
    async fn test_manager_loads_demo_inventory() {
        let manager = SnapshotManager::new(config()).await.unwrap();
        assert_eq!(manager.list_subscriptions().len(), 1);
        let snapshots = manager.search("sub-1", None).unwrap();
        assert_eq!(snapshots.len(), 5);
        assert!(snapshots
            .iter()
            .all(|s| s.snapshot.environment == snapshot_shared::EnvironmentClass::NonProduction));
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_not_found() {
        let manager = SnapshotManager::new(config()).await.unwrap();
        assert!(matches!(
            manager.summary("nope", &SummaryQuery::default()),
            Err(SnapshotError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_inverted_window_is_rejected() {
        let manager = SnapshotManager::new(config()).await.unwrap();
        let now = Utc::now();
        let query = SummaryQuery {
            from: Some(now),
            to: Some(now - chrono::Duration::days(1)),
        };
        assert!(matches!(
            manager.summary("sub-1", &query),
            Err(SnapshotError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_old_uses_retention_policy() {
        let manager = SnapshotManager::new(config()).await.unwrap();
        let response = manager
            .delete_old_snapshots(DeleteOldSnapshotsRequest {
                subscription_id: "sub-1".to_string(),
                age_in_days: 3,
            })
            .await
            .unwrap();

        // demo ages are 1, 4, 12, 45 and 120 days
        assert_eq!(response.deleted.len(), 4);
        assert_eq!(response.outcome, BatchOutcome::FullySucceeded);
        assert_eq!(manager.search("sub-1", None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_and_toggle_favorite() {
        let manager = SnapshotManager::new(config()).await.unwrap();
        let created = manager
            .create_snapshot(CreateSnapshotRequest {
                subscription_id: "sub-1".to_string(),
                resource_group: "rg-app".to_string(),
                disk_name: "vm-disk-01".to_string(),
            })
            .await
            .unwrap();
        assert!(created.name.starts_with("vm-disk-01-snapshot-"));

        let toggled = manager
            .toggle_favorite(ToggleFavoriteRequest {
                snapshot_id: created.id.clone(),
            })
            .unwrap();
        assert!(toggled.favorite);
        assert_eq!(manager.favorites("sub-1").unwrap().len(), 1);
    }
}
