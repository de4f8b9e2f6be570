//! End-to-end tests for the dashboard API over the in-memory provider

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use snapshot_manager::provider::{LockAction, SnapshotFault};
use snapshot_manager::{create_router, InMemoryProvider, SnapshotManager, SnapshotManagerConfig};
use snapshot_shared::{
    ActivityKind, BatchOutcome, DeleteOldSnapshotsResponse, FailureReason, LockLevel, ServerMessage, Snapshot,
    SnapshotStatus, SubscriptionInfo,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const SUB: &str = "sub-nonprod";
const GROUP: &str = "rg-dev";

fn snapshot_id(index: usize) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/snapshots/vm-dev-0{}-snap",
        SUB, GROUP, index
    )
}

fn test_config() -> SnapshotManagerConfig {
    let mut config = SnapshotManagerConfig::default();
    config.provider.poll_interval_ms = 5;
    config.provider.poll_timeout_seconds = 5;
    config.deletion.retry.initial_delay_ms = 1;
    config.deletion.retry.max_delay_ms = 5;
    config
}

async fn setup() -> (Arc<SnapshotManager>, Arc<InMemoryProvider>, Router) {
    setup_with(test_config()).await
}

fn created_at() -> chrono::DateTime<Utc> {
    Utc::now() - ChronoDuration::days(4) - ChronoDuration::hours(1)
}

/// Five non-production snapshots aged four days behind one delete lock
async fn setup_with(config: SnapshotManagerConfig) -> (Arc<SnapshotManager>, Arc<InMemoryProvider>, Router) {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_subscription(SubscriptionInfo {
        id: SUB.to_string(),
        name: "contoso-nonprod".to_string(),
    });

    let created_at = created_at();
    for i in 0..5 {
        provider.insert_snapshot(Snapshot {
            id: snapshot_id(i),
            name: format!("vm-dev-0{}-snap", i),
            resource_group: GROUP.to_string(),
            subscription_id: SUB.to_string(),
            created_at,
            size_gb: 16,
            status: SnapshotStatus::Ready,
            favorite: false,
            environment: Default::default(),
            created_by: None,
        });
    }
    provider.add_lock(SUB, GROUP, "dev-lock", LockLevel::CanNotDelete);

    let manager = Arc::new(
        SnapshotManager::with_provider(config, provider.clone())
            .await
            .unwrap(),
    );
    let app = create_router(manager.clone());
    (manager, provider, app)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn delete_old(app: &Router, age_in_days: u32) -> DeleteOldSnapshotsResponse {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/snapshots/delete-old",
        Some(json!({ "subscription_id": SUB, "age_in_days": age_in_days })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn test_delete_old_removes_eligible_and_restores_lock() {
    let (_manager, provider, app) = setup().await;

    let response = delete_old(&app, 3).await;

    assert_eq!(response.outcome, BatchOutcome::FullySucceeded);
    assert_eq!(response.deleted.len(), 5);
    assert!(response.failed.is_empty());
    assert!(response.lock_warnings.is_empty());

    // one removal and one restoration for the whole group
    assert_eq!(provider.lock_calls(GROUP), (1, 1));
    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);

    let (_, snapshots) = send(&app, Method::GET, &format!("/api/v1/subscriptions/{}/snapshots", SUB), None).await;
    assert_eq!(snapshots.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_requested_age_above_threshold_leaves_inventory() {
    let (_manager, provider, app) = setup().await;

    let response = delete_old(&app, 30).await;

    assert_eq!(response.outcome, BatchOutcome::NothingToDo);
    assert_eq!(provider.total_delete_calls(), 0);
    assert_eq!(provider.lock_calls(GROUP), (0, 0));
}

#[tokio::test]
async fn test_authorization_failure_is_isolated_and_lock_restored() {
    let (_manager, provider, app) = setup().await;
    provider.inject_fault(&snapshot_id(2), SnapshotFault::Authorization);

    let response = delete_old(&app, 3).await;

    assert_eq!(response.outcome, BatchOutcome::PartiallySucceeded);
    assert_eq!(response.deleted.len(), 4);
    assert_eq!(response.failed, vec![snapshot_id(2)]);

    let attempt = response
        .attempts
        .iter()
        .find(|a| a.snapshot_id == snapshot_id(2))
        .unwrap();
    assert_eq!(attempt.reason, Some(FailureReason::Authorization));
    assert_eq!(attempt.provider_calls, 1);

    assert_eq!(provider.lock_calls(GROUP), (1, 1));
    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);
}

#[tokio::test]
async fn test_lock_restore_failure_is_reported_in_response() {
    let (manager, provider, app) = setup().await;
    provider.fail_lock_restore(SUB, GROUP);

    let response = delete_old(&app, 3).await;

    assert_eq!(response.outcome, BatchOutcome::FullySucceeded);
    assert_eq!(response.deleted.len(), 5);
    assert_eq!(response.lock_warnings.len(), 1);
    assert_eq!(response.lock_warnings[0].resource_group, GROUP);
    assert_eq!(response.lock_warnings[0].lock_name, "dev-lock");
    assert_eq!(response.lock_warnings[0].severity, "high");

    assert_eq!(provider.lock_calls(GROUP), (1, 1));
    assert!(provider.locks_on(SUB, GROUP).is_empty());
    assert!(manager
        .index()
        .recent_activity(SUB)
        .iter()
        .any(|entry| entry.kind == ActivityKind::LockRestoreFailed));
}

#[tokio::test]
async fn test_repeated_delete_old_is_idempotent() {
    let (_manager, provider, app) = setup().await;

    let first = delete_old(&app, 3).await;
    let second = delete_old(&app, 3).await;

    assert_eq!(first.outcome, BatchOutcome::FullySucceeded);
    assert_eq!(first.deleted.len(), 5);
    assert_eq!(second.outcome, BatchOutcome::NothingToDo);
    assert!(second.attempts.is_empty());
    assert!(second.lock_warnings.is_empty());

    assert_eq!(provider.total_delete_calls(), 5);
    assert_eq!(provider.lock_calls(GROUP), (1, 1));
    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);
}

#[tokio::test]
async fn test_slow_delete_batch_outlives_request_timeout() {
    let mut config = test_config();
    config.server.timeout_seconds = 1;
    config.provider.command_timeout_seconds = 0;
    config.provider.poll_timeout_seconds = 0;
    let (_manager, provider, app) = setup_with(config).await;
    provider.set_delete_latency(Duration::from_millis(1_500));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/snapshots/delete-old",
        Some(json!({ "subscription_id": SUB, "age_in_days": 3 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let response: DeleteOldSnapshotsResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.outcome, BatchOutcome::FullySucceeded);
    assert_eq!(response.deleted.len(), 5);
    assert_eq!(provider.lock_calls(GROUP), (1, 1));
}

#[tokio::test]
async fn test_lock_removal_failure_skips_group() {
    let (_manager, provider, app) = setup().await;
    provider.fail_lock_removal(SUB, GROUP);

    let response = delete_old(&app, 3).await;

    assert_eq!(response.outcome, BatchOutcome::FullyFailed);
    assert_eq!(response.failed.len(), 5);
    assert!(response
        .attempts
        .iter()
        .all(|a| a.reason == Some(FailureReason::LockRemoval)));
    assert_eq!(provider.total_delete_calls(), 0);
    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_on_same_group_do_not_interleave() {
    let (manager, provider, app) = setup().await;
    provider.set_delete_latency(Duration::from_millis(20));

    let (first, second) = tokio::join!(delete_old(&app, 3), delete_old(&app, 3));

    let mut deleted: Vec<String> = first.deleted.into_iter().chain(second.deleted).collect();
    deleted.sort();
    deleted.dedup();
    assert_eq!(deleted.len(), 5);

    let actions: Vec<LockAction> = provider
        .lock_journal()
        .into_iter()
        .filter(|entry| entry.resource_group == GROUP)
        .map(|entry| entry.action)
        .collect();
    assert!(!actions.is_empty());
    for pair in actions.chunks(2) {
        assert_eq!(pair, [LockAction::Remove, LockAction::Restore]);
    }

    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);
    assert!(manager.index().snapshots(SUB).is_empty());
}

#[tokio::test]
async fn test_summary_with_empty_window_is_all_zero() {
    let (_manager, _provider, app) = setup().await;

    let (status, summary) = send(
        &app,
        Method::GET,
        &format!(
            "/api/v1/subscriptions/{}/summary?from=2000-01-01T00:00:00Z&to=2000-01-02T00:00:00Z",
            SUB
        ),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_count"], 0);
    assert_eq!(summary["total_size_gb"], 0);
    for buckets in ["age_buckets", "status_buckets", "size_buckets"] {
        let values = summary[buckets].as_object().unwrap();
        assert!(!values.is_empty());
        assert!(values.values().all(|v| v == 0));
    }
}

#[tokio::test]
async fn test_summary_accepts_date_only_window() {
    let (_manager, _provider, app) = setup().await;
    let day = created_at().format("%Y-%m-%d").to_string();

    let (status, summary) = send(
        &app,
        Method::GET,
        &format!("/api/v1/subscriptions/{}/summary?from={}&to={}", SUB, day, day),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_count"], 5);
    assert!(summary["window_to"].as_str().unwrap().contains("23:59:59"));
}

#[tokio::test]
async fn test_malformed_summary_window_is_a_json_error() {
    let (_manager, _provider, app) = setup().await;

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/subscriptions/{}/summary?from=last-week", SUB),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["status"], 400);
}

#[tokio::test]
async fn test_malformed_command_body_is_a_json_error() {
    let (_manager, provider, app) = setup().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/snapshots/delete-old",
        Some(json!({ "subscription_id": SUB, "age_in_days": "three" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(provider.total_delete_calls(), 0);
}

#[tokio::test]
async fn test_summary_counts_inventory() {
    let (_manager, _provider, app) = setup().await;

    let (status, summary) =
        send(&app, Method::GET, &format!("/api/v1/subscriptions/{}/summary", SUB), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_count"], 5);
    assert_eq!(summary["total_size_gb"], 80);
}

#[tokio::test]
async fn test_search_is_case_insensitive() {
    let (_manager, _provider, app) = setup().await;

    let (status, results) = send(
        &app,
        Method::GET,
        &format!("/api/v1/subscriptions/{}/snapshots?keyword=DEV-03", SUB),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], "vm-dev-03-snap");
    assert_eq!(results[0]["age_band"], "green");
}

#[tokio::test]
async fn test_favorite_toggle_round_trip() {
    let (_manager, _provider, app) = setup().await;
    let body = json!({ "snapshot_id": snapshot_id(1) });

    let (status, toggled) = send(&app, Method::POST, "/api/v1/snapshots/favorite", Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["favorite"], true);

    let (_, favorites) =
        send(&app, Method::GET, &format!("/api/v1/subscriptions/{}/favorites", SUB), None).await;
    assert_eq!(favorites.as_array().map(Vec::len), Some(1));

    let (_, toggled) = send(&app, Method::POST, "/api/v1/snapshots/favorite", Some(body)).await;
    assert_eq!(toggled["favorite"], false);

    let (_, activity) =
        send(&app, Method::GET, &format!("/api/v1/subscriptions/{}/activity", SUB), None).await;
    assert_eq!(activity[0]["kind"], "favorite_toggled");
}

#[tokio::test]
async fn test_invalid_create_request_is_rejected() {
    let (_manager, provider, app) = setup().await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/snapshots",
        Some(json!({ "subscription_id": SUB, "resource_group": GROUP, "disk_name": "" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(provider.locks_on(SUB, GROUP).len(), 1);
}

#[tokio::test]
async fn test_create_snapshot_adds_to_inventory() {
    let (_manager, _provider, app) = setup().await;

    let (status, created) = send(
        &app,
        Method::POST,
        "/api/v1/snapshots",
        Some(json!({ "subscription_id": SUB, "resource_group": GROUP, "disk_name": "vm-dev-09-osdisk" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["environment"], "non_production");

    let (_, summary) =
        send(&app, Method::GET, &format!("/api/v1/subscriptions/{}/summary", SUB), None).await;
    assert_eq!(summary["total_count"], 6);
}

#[tokio::test]
async fn test_unknown_subscription_returns_not_found() {
    let (_manager, _provider, app) = setup().await;

    let (status, body) =
        send(&app, Method::GET, "/api/v1/subscriptions/missing/summary", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_live_subscriber_sees_deletions() {
    let (manager, _provider, app) = setup().await;
    let publisher_task = manager.start();

    let (subscriber_id, mut rx) = manager.publisher().connect();
    assert!(matches!(rx.recv().await, Some(ServerMessage::Connected { .. })));
    manager.publisher().subscribe(&subscriber_id, SUB).unwrap();

    match rx.recv().await {
        Some(ServerMessage::DashboardUpdate(update)) => assert_eq!(update.summary.total_count, 5),
        other => panic!("expected initial update, got {:?}", other),
    }

    delete_old(&app, 3).await;

    let mut last_sequence = 0;
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = rx.recv().await {
            if let ServerMessage::DashboardUpdate(update) = message {
                assert!(update.sequence > last_sequence);
                last_sequence = update.sequence;
                if update.summary.total_count == 0 {
                    return true;
                }
            }
        }
        false
    })
    .await;
    assert_eq!(drained, Ok(true));

    manager.shutdown();
    publisher_task.await.unwrap();
}
