//! # Snapshot Manager
//!
//! Lifecycle engine for cloud disk snapshots:
//! - Inventory index of snapshots per subscription
//! - Environment-aware retention evaluation
//! - Lock coordination around deletions (remove, delete, always restore)
//! - Bounded-concurrency batch deletion with retry and status polling
//! - Distribution summaries and recent activity for the dashboard
//! - Live push of dashboard updates over WebSocket
//!
//! ## Usage
//!
//! ```rust,no_run
//! use snapshot_manager::{SnapshotManager, SnapshotManagerConfig};
//! use snapshot_shared::DeleteOldSnapshotsRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = SnapshotManager::new(SnapshotManagerConfig::default()).await?;
//!
//!     let response = manager
//!         .delete_old_snapshots(DeleteOldSnapshotsRequest {
//!             subscription_id: "00000000-0000-0000-0000-000000000002".to_string(),
//!             age_in_days: 3,
//!         })
//!         .await?;
//!     println!("{:?}: {} deleted", response.outcome, response.deleted.len());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod inventory;
pub mod live_sync;
pub mod locks;
pub mod manager;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod retention;
pub mod retry;
pub mod routes;
pub mod summary;
pub mod websocket;

pub use config::SnapshotManagerConfig;
pub use error::{Result, SnapshotError};
pub use inventory::InventoryIndex;
pub use live_sync::{LiveSyncPublisher, SubscriberState};
pub use locks::LockCoordinator;
pub use manager::SnapshotManager;
pub use orchestrator::{DeletionOrchestrator, DeletionReport};
pub use provider::{AzureCliProvider, CloudProvider, InMemoryProvider};
pub use retention::{EnvironmentClassifier, RetentionEvaluator};
pub use routes::create_router;

/// Service version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
