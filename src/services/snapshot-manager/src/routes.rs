//! Routes for the snapshot manager
//!
//! - Subscription queries and inventory refresh, under the request timeout
//! - Snapshot commands, which always answer with their outcome
//! - WebSocket live sync
//! - Health and metrics endpoints

use crate::handlers::{
    health_handler, metrics_handler, snapshots_handler, subscriptions_handler, websocket_handler,
};
use crate::manager::SnapshotManager;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Build the main router for the snapshot manager
///
/// Command routes sit outside the request timeout: a deletion batch always
/// runs to its structured outcome, bounded per item by the provider poll
/// deadline.
pub fn create_router(manager: Arc<SnapshotManager>) -> Router {
    let timeout = manager.config().get_timeout("server");
    let query_router = create_query_router(Arc::clone(&manager));
    let command_router = create_command_router(Arc::clone(&manager));
    let websocket_router = create_websocket_router(Arc::clone(&manager));
    let health_router = create_health_router(manager);

    Router::new()
        .merge(query_router.merge(health_router).layer(TimeoutLayer::new(timeout)))
        .merge(command_router)
        .merge(websocket_router)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
}

fn create_query_router(manager: Arc<SnapshotManager>) -> Router {
    Router::new()
        .route(
            "/api/v1/subscriptions",
            get(subscriptions_handler::list_subscriptions),
        )
        .route(
            "/api/v1/subscriptions/:id/refresh",
            post(subscriptions_handler::refresh_subscription),
        )
        .route(
            "/api/v1/subscriptions/:id/summary",
            get(subscriptions_handler::get_summary),
        )
        .route(
            "/api/v1/subscriptions/:id/activity",
            get(subscriptions_handler::get_activity),
        )
        .route(
            "/api/v1/subscriptions/:id/snapshots",
            get(subscriptions_handler::search_snapshots),
        )
        .route(
            "/api/v1/subscriptions/:id/favorites",
            get(subscriptions_handler::get_favorites),
        )
        .with_state(manager)
}

fn create_command_router(manager: Arc<SnapshotManager>) -> Router {
    Router::new()
        .route("/api/v1/snapshots", post(snapshots_handler::create_snapshot))
        .route(
            "/api/v1/snapshots/delete-old",
            post(snapshots_handler::delete_old_snapshots),
        )
        .route(
            "/api/v1/snapshots/favorite",
            post(snapshots_handler::toggle_favorite),
        )
        .with_state(manager)
}

fn create_websocket_router(manager: Arc<SnapshotManager>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler::websocket_handler))
        .with_state(manager)
}

fn create_health_router(manager: Arc<SnapshotManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotManagerConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app() -> Router {
        let manager = SnapshotManager::new(SnapshotManagerConfig::default())
            .await
            .unwrap();
        create_router(Arc::new(manager))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_exist() {
        let response = app()
            .await
            .oneshot(
                Request::builder()
                    .uri("/api/v1/subscriptions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
