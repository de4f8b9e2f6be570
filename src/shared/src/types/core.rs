//! Core type definitions for the snapshot lifecycle manager
//!
//! These records are produced by the cloud provider boundary, owned by the
//! inventory index, and read by every other component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque provider identity of a snapshot
pub type SnapshotId = String;

// ============================================================================
// SNAPSHOT TYPES
// ============================================================================

/// Provider-reported snapshot state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Creating,
    Ready,
    Error,
}

impl SnapshotStatus {
    pub const ALL: [SnapshotStatus; 3] = [
        SnapshotStatus::Creating,
        SnapshotStatus::Ready,
        SnapshotStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Creating => "creating",
            SnapshotStatus::Ready => "ready",
            SnapshotStatus::Error => "error",
        }
    }
}

impl Default for SnapshotStatus {
    fn default() -> Self {
        SnapshotStatus::Ready
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotStatus {
    type Err = String;

    /// Accepts both the dashboard vocabulary and Azure provisioning states.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "creating" | "updating" | "inprogress" => Ok(SnapshotStatus::Creating),
            "ready" | "succeeded" => Ok(SnapshotStatus::Ready),
            "error" | "failed" | "canceled" => Ok(SnapshotStatus::Error),
            _ => Err(format!("Invalid snapshot status: {}", s)),
        }
    }
}

/// Environment class derived from subscription and resource-group naming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentClass {
    Production,
    NonProduction,
}

impl Default for EnvironmentClass {
    fn default() -> Self {
        EnvironmentClass::Production
    }
}

impl fmt::Display for EnvironmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvironmentClass::Production => f.write_str("production"),
            EnvironmentClass::NonProduction => f.write_str("non_production"),
        }
    }
}

/// A storage snapshot as tracked by the inventory index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub created_at: DateTime<Utc>,
    pub size_gb: u64,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub environment: EnvironmentClass,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Snapshot {
    /// Whole days elapsed since creation, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }
}

/// Subscription (account) visible to the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub name: String,
}

// ============================================================================
// LOCK TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockLevel {
    CanNotDelete,
    ReadOnly,
}

impl FromStr for LockLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CanNotDelete" => Ok(LockLevel::CanNotDelete),
            "ReadOnly" => Ok(LockLevel::ReadOnly),
            _ => Err(format!("Invalid lock level: {}", s)),
        }
    }
}

/// Deletion-prevention lock on a resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    pub id: String,
    pub name: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub level: LockLevel,
    pub notes: Option<String>,
    /// Set once this operation has removed the lock and owes a restore
    #[serde(default)]
    pub owned_by_operation: bool,
}

// ============================================================================
// DELETION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionOutcome {
    Succeeded,
    Failed,
    Skipped,
}

/// Why a deletion attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    #[serde(rename = "TransientProviderError")]
    TransientProvider,
    #[serde(rename = "AuthorizationError")]
    Authorization,
    #[serde(rename = "LockRemovalError")]
    LockRemoval,
    #[serde(rename = "ProviderError")]
    Provider,
    #[serde(rename = "Cancelled")]
    Cancelled,
    #[serde(rename = "NotInInventory")]
    NotInInventory,
}

/// Outcome of one snapshot deletion. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionAttempt {
    pub snapshot_id: SnapshotId,
    pub resource_group: Option<String>,
    pub outcome: DeletionOutcome,
    pub reason: Option<FailureReason>,
    pub detail: Option<String>,
    /// Provider calls issued for this item, retries included
    pub provider_calls: u32,
}

impl DeletionAttempt {
    pub fn succeeded(snapshot_id: SnapshotId, resource_group: String, provider_calls: u32) -> Self {
        Self {
            snapshot_id,
            resource_group: Some(resource_group),
            outcome: DeletionOutcome::Succeeded,
            reason: None,
            detail: None,
            provider_calls,
        }
    }

    pub fn failed(
        snapshot_id: SnapshotId,
        resource_group: Option<String>,
        reason: FailureReason,
        detail: impl Into<String>,
        provider_calls: u32,
    ) -> Self {
        Self {
            snapshot_id,
            resource_group,
            outcome: DeletionOutcome::Failed,
            reason: Some(reason),
            detail: Some(detail.into()),
            provider_calls,
        }
    }

    pub fn skipped(
        snapshot_id: SnapshotId,
        resource_group: Option<String>,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            snapshot_id,
            resource_group,
            outcome: DeletionOutcome::Skipped,
            reason: Some(reason),
            detail: Some(detail.into()),
            provider_calls: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == DeletionOutcome::Succeeded
    }
}

// ============================================================================
// SUMMARY TYPES
// ============================================================================

/// Fixed age ranges, in whole days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "0-7d")]
    UpToWeek,
    #[serde(rename = "8-30d")]
    UpToMonth,
    #[serde(rename = "31-90d")]
    UpToQuarter,
    #[serde(rename = "90d+")]
    OverQuarter,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 4] = [
        AgeBucket::UpToWeek,
        AgeBucket::UpToMonth,
        AgeBucket::UpToQuarter,
        AgeBucket::OverQuarter,
    ];

    pub fn for_age_days(days: i64) -> Self {
        match days {
            d if d <= 7 => AgeBucket::UpToWeek,
            d if d <= 30 => AgeBucket::UpToMonth,
            d if d <= 90 => AgeBucket::UpToQuarter,
            _ => AgeBucket::OverQuarter,
        }
    }
}

/// Fixed size ranges, lower bound inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeBucket {
    #[serde(rename = "0-1GB")]
    UpToOne,
    #[serde(rename = "1-10GB")]
    UpToTen,
    #[serde(rename = "10-100GB")]
    UpToHundred,
    #[serde(rename = "100+GB")]
    OverHundred,
}

impl SizeBucket {
    pub const ALL: [SizeBucket; 4] = [
        SizeBucket::UpToOne,
        SizeBucket::UpToTen,
        SizeBucket::UpToHundred,
        SizeBucket::OverHundred,
    ];

    pub fn for_size_gb(size_gb: u64) -> Self {
        match size_gb {
            0 => SizeBucket::UpToOne,
            1..=9 => SizeBucket::UpToTen,
            10..=99 => SizeBucket::UpToHundred,
            _ => SizeBucket::OverHundred,
        }
    }
}

/// Distribution statistics for one subscription, always derived fresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub subscription_id: String,
    pub total_count: u64,
    pub total_size_gb: u64,
    pub age_buckets: BTreeMap<AgeBucket, u64>,
    pub status_buckets: BTreeMap<SnapshotStatus, u64>,
    pub size_buckets: BTreeMap<SizeBucket, u64>,
    pub window_from: Option<DateTime<Utc>>,
    pub window_to: Option<DateTime<Utc>>,
}

impl SummarySnapshot {
    /// A summary with every bucket present and zeroed
    pub fn empty(
        subscription_id: impl Into<String>,
        window_from: Option<DateTime<Utc>>,
        window_to: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            total_count: 0,
            total_size_gb: 0,
            age_buckets: AgeBucket::ALL.iter().map(|b| (*b, 0)).collect(),
            status_buckets: SnapshotStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            size_buckets: SizeBucket::ALL.iter().map(|b| (*b, 0)).collect(),
            window_from,
            window_to,
        }
    }
}

// ============================================================================
// ACTIVITY TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    InventoryRefreshed,
    SnapshotCreated,
    SnapshotDeleted,
    DeletionFailed,
    FavoriteToggled,
    LockRestoreFailed,
}

/// One entry of a subscription's recent-activity log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub sequence: u64,
    pub subscription_id: String,
    pub kind: ActivityKind,
    pub snapshot_id: Option<SnapshotId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_from_provider_values() {
        assert_eq!("Succeeded".parse::<SnapshotStatus>(), Ok(SnapshotStatus::Ready));
        assert_eq!("creating".parse::<SnapshotStatus>(), Ok(SnapshotStatus::Creating));
        assert_eq!("Failed".parse::<SnapshotStatus>(), Ok(SnapshotStatus::Error));
        assert!("bogus".parse::<SnapshotStatus>().is_err());
    }

    #[test]
    fn test_age_bucket_boundaries() {
        assert_eq!(AgeBucket::for_age_days(0), AgeBucket::UpToWeek);
        assert_eq!(AgeBucket::for_age_days(7), AgeBucket::UpToWeek);
        assert_eq!(AgeBucket::for_age_days(8), AgeBucket::UpToMonth);
        assert_eq!(AgeBucket::for_age_days(30), AgeBucket::UpToMonth);
        assert_eq!(AgeBucket::for_age_days(31), AgeBucket::UpToQuarter);
        assert_eq!(AgeBucket::for_age_days(90), AgeBucket::UpToQuarter);
        assert_eq!(AgeBucket::for_age_days(91), AgeBucket::OverQuarter);
    }

    #[test]
    fn test_size_bucket_boundaries() {
        assert_eq!(SizeBucket::for_size_gb(0), SizeBucket::UpToOne);
        assert_eq!(SizeBucket::for_size_gb(1), SizeBucket::UpToTen);
        assert_eq!(SizeBucket::for_size_gb(10), SizeBucket::UpToHundred);
        assert_eq!(SizeBucket::for_size_gb(100), SizeBucket::OverHundred);
    }

    #[test]
    fn test_empty_summary_serializes_bucket_labels() {
        let summary = SummarySnapshot::empty("sub-1", None, None);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["age_buckets"]["0-7d"], 0);
        assert_eq!(json["age_buckets"]["90d+"], 0);
        assert_eq!(json["size_buckets"]["100+GB"], 0);
        assert_eq!(json["status_buckets"]["ready"], 0);
    }

    #[test]
    fn test_age_days_never_negative() {
        let now = Utc::now();
        let snapshot = Snapshot {
            id: "id".to_string(),
            name: "snap".to_string(),
            resource_group: "rg".to_string(),
            subscription_id: "sub".to_string(),
            created_at: now + Duration::hours(2),
            size_gb: 1,
            status: SnapshotStatus::Ready,
            favorite: false,
            environment: EnvironmentClass::Production,
            created_by: None,
        };
        assert_eq!(snapshot.age_days(now), 0);
    }

    #[test]
    fn test_failure_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FailureReason::Authorization).unwrap(),
            "\"AuthorizationError\""
        );
    }
}
