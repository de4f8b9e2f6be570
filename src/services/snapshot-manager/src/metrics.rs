//! Metrics collection module for the snapshot manager
//!
//! This module provides Prometheus metrics for:
//! - Deletion attempts by outcome and failure reason
//! - Lock removals and restorations
//! - Provider retries
//! - Connected live dashboard subscribers

use crate::error::{Result, SnapshotError};
use snapshot_shared::DeletionAttempt;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "snapshot_manager";

/// Metrics collector for the snapshot manager
#[derive(Clone)]
pub struct SnapshotMetrics {
    registry: Arc<Registry>,

    // Counters
    deletion_attempts: IntCounterVec,
    lock_operations: IntCounterVec,
    provider_retries: IntCounter,

    // Gauges
    live_subscribers: IntGauge,

    // Histograms
    deletion_duration: HistogramVec,
}

fn metric_error(name: &str, e: prometheus::Error) -> SnapshotError {
    SnapshotError::internal(format!("Failed to set up metric {}: {}", name, e))
}

impl SnapshotMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        info!("Initializing snapshot manager metrics");

        let registry = Registry::new();

        let deletion_attempts = IntCounterVec::new(
            Opts::new("deletion_attempts_total", "Snapshot deletion attempts by outcome")
                .namespace(NAMESPACE),
            &["outcome", "reason"],
        )
        .map_err(|e| metric_error("deletion_attempts_total", e))?;

        let lock_operations = IntCounterVec::new(
            Opts::new("lock_operations_total", "Resource lock removals and restorations")
                .namespace(NAMESPACE),
            &["operation", "result"],
        )
        .map_err(|e| metric_error("lock_operations_total", e))?;

        let provider_retries = IntCounter::with_opts(
            Opts::new("provider_retries_total", "Provider calls retried after a transient error")
                .namespace(NAMESPACE),
        )
        .map_err(|e| metric_error("provider_retries_total", e))?;

        let live_subscribers = IntGauge::with_opts(
            Opts::new("live_subscribers", "Connected live dashboard sessions").namespace(NAMESPACE),
        )
        .map_err(|e| metric_error("live_subscribers", e))?;

        let deletion_duration = HistogramVec::new(
            HistogramOpts::new(
                "deletion_duration_seconds",
                "Time from issuing a deletion until its outcome is known",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["outcome"],
        )
        .map_err(|e| metric_error("deletion_duration_seconds", e))?;

        registry
            .register(Box::new(deletion_attempts.clone()))
            .map_err(|e| metric_error("deletion_attempts_total", e))?;
        registry
            .register(Box::new(lock_operations.clone()))
            .map_err(|e| metric_error("lock_operations_total", e))?;
        registry
            .register(Box::new(provider_retries.clone()))
            .map_err(|e| metric_error("provider_retries_total", e))?;
        registry
            .register(Box::new(live_subscribers.clone()))
            .map_err(|e| metric_error("live_subscribers", e))?;
        registry
            .register(Box::new(deletion_duration.clone()))
            .map_err(|e| metric_error("deletion_duration_seconds", e))?;

        Ok(Self {
            registry: Arc::new(registry),
            deletion_attempts,
            lock_operations,
            provider_retries,
            live_subscribers,
            deletion_duration,
        })
    }

    pub fn record_attempt(&self, attempt: &DeletionAttempt, elapsed_seconds: f64) {
        let outcome = serde_json::to_value(attempt.outcome)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        let reason = attempt
            .reason
            .and_then(|r| serde_json::to_value(r).ok())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "none".to_string());

        self.deletion_attempts
            .with_label_values(&[&outcome, &reason])
            .inc();
        self.deletion_duration
            .with_label_values(&[&outcome])
            .observe(elapsed_seconds);
    }

    /// `operation` is "remove" or "restore"
    pub fn record_lock_operation(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.lock_operations
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_retries(&self, retries: u32) {
        self.provider_retries.inc_by(u64::from(retries));
    }

    pub fn set_live_subscribers(&self, count: usize) {
        self.live_subscribers.set(count as i64);
    }

    /// Export all metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .map_err(|e| SnapshotError::internal(format!("Failed to encode metrics: {}", e)))
    }
}
