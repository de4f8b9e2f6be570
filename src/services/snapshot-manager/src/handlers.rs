//! Request handlers for the snapshot manager
//!
//! - Subscription queries (summary, activity, search, favorites, refresh)
//! - Snapshot commands (create, delete-old, favorite toggle)
//! - Live sync WebSocket upgrade
//! - Health and metrics

use crate::error::Result;
use crate::extract::{ApiJson, ApiQuery};
use crate::manager::SnapshotManager;
use crate::websocket;
use snapshot_shared::{
    CreateSnapshotRequest, DeleteOldSnapshotsRequest, SearchQuery, SummaryQuery,
    ToggleFavoriteRequest,
};

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

pub mod subscriptions_handler {
    use super::*;

    /// List known subscriptions
    pub async fn list_subscriptions(
        State(manager): State<Arc<SnapshotManager>>,
    ) -> Result<impl IntoResponse> {
        Ok(Json(manager.list_subscriptions()))
    }

    /// Reload a subscription's inventory from the provider
    pub async fn refresh_subscription(
        State(manager): State<Arc<SnapshotManager>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        info!("Refreshing inventory for subscription: {}", id);

        match manager.refresh_subscription(&id).await {
            Ok(count) => Ok(Json(serde_json::json!({
                "subscription_id": id,
                "snapshot_count": count,
            }))),
            Err(e) => {
                error!("Failed to refresh subscription {}: {}", id, e);
                Err(e)
            }
        }
    }

    /// Distribution summary, optionally restricted to a creation-time window
    pub async fn get_summary(
        State(manager): State<Arc<SnapshotManager>>,
        Path(id): Path<String>,
        ApiQuery(query): ApiQuery<SummaryQuery>,
    ) -> Result<impl IntoResponse> {
        Ok(Json(manager.summary(&id, &query)?))
    }

    /// Recent activity, newest first
    pub async fn get_activity(
        State(manager): State<Arc<SnapshotManager>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        Ok(Json(manager.recent_activity(&id)?))
    }

    /// Keyword search over snapshot names
    pub async fn search_snapshots(
        State(manager): State<Arc<SnapshotManager>>,
        Path(id): Path<String>,
        ApiQuery(query): ApiQuery<SearchQuery>,
    ) -> Result<impl IntoResponse> {
        let results = manager.search(&id, query.keyword.as_deref())?;
        info!("Search in {} returned {} snapshots", id, results.len());
        Ok(Json(results))
    }

    pub async fn get_favorites(
        State(manager): State<Arc<SnapshotManager>>,
        Path(id): Path<String>,
    ) -> Result<impl IntoResponse> {
        Ok(Json(manager.favorites(&id)?))
    }
}

pub mod snapshots_handler {
    use super::*;

    /// Create a snapshot of a managed disk
    pub async fn create_snapshot(
        State(manager): State<Arc<SnapshotManager>>,
        ApiJson(request): ApiJson<CreateSnapshotRequest>,
    ) -> Result<impl IntoResponse> {
        info!(
            "Creating snapshot of disk {} in {}",
            request.disk_name, request.resource_group
        );

        match manager.create_snapshot(request).await {
            Ok(snapshot) => {
                info!("Snapshot created successfully: {}", snapshot.id);
                Ok((StatusCode::CREATED, Json(snapshot)))
            }
            Err(e) => {
                error!("Failed to create snapshot: {}", e);
                Err(e)
            }
        }
    }

    /// Delete every snapshot past its retention threshold
    pub async fn delete_old_snapshots(
        State(manager): State<Arc<SnapshotManager>>,
        ApiJson(request): ApiJson<DeleteOldSnapshotsRequest>,
    ) -> Result<impl IntoResponse> {
        info!(
            "Deleting snapshots older than {} days in subscription {}",
            request.age_in_days, request.subscription_id
        );

        match manager.delete_old_snapshots(request).await {
            Ok(response) => {
                info!(
                    "Delete-old completed: {} deleted, {} failed, {} lock warnings",
                    response.deleted.len(),
                    response.failed.len(),
                    response.lock_warnings.len()
                );
                Ok(Json(response))
            }
            Err(e) => {
                error!("Failed to delete old snapshots: {}", e);
                Err(e)
            }
        }
    }

    pub async fn toggle_favorite(
        State(manager): State<Arc<SnapshotManager>>,
        ApiJson(request): ApiJson<ToggleFavoriteRequest>,
    ) -> Result<impl IntoResponse> {
        Ok(Json(manager.toggle_favorite(request)?))
    }
}

pub mod websocket_handler {
    use super::*;

    /// Upgrade to a live sync session
    pub async fn websocket_handler(
        ws: WebSocketUpgrade,
        State(manager): State<Arc<SnapshotManager>>,
    ) -> Response {
        info!("New live sync connection");

        let publisher = manager.publisher().clone();
        let ping_interval = manager.config().live_sync.ping_interval_seconds;
        ws.on_upgrade(move |socket| websocket::serve_session(socket, publisher, ping_interval))
    }
}

/// Health check handler
pub async fn health_handler(State(manager): State<Arc<SnapshotManager>>) -> impl IntoResponse {
    Json(manager.health_check())
}

/// Prometheus text exposition
pub async fn metrics_handler(
    State(manager): State<Arc<SnapshotManager>>,
) -> Result<impl IntoResponse> {
    let body = manager.metrics().export_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
