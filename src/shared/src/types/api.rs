//! API request/response types for the dashboard client
//!
//! Covers the query and command endpoints plus the message envelopes of the
//! live push channel.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

use super::core::*;

// =============================================================================
// Queries
// =============================================================================

/// Optional creation-time window for summaries
///
/// Bounds are RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A date-only
/// `from` starts at 00:00:00 and a date-only `to` runs through 23:59:59.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryQuery {
    #[serde(default, deserialize_with = "start_of_window")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "end_of_window")]
    pub to: Option<DateTime<Utc>>,
}

/// Parse a window bound, widening a bare date to the start or end of that day
pub fn parse_window_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("'{}' is neither an RFC 3339 timestamp nor a YYYY-MM-DD date", raw))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| "invalid time of day".to_string())?;
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn window_bound<'de, D>(deserializer: D, end_of_day: bool) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.filter(|r| !r.trim().is_empty())
        .map(|r| parse_window_bound(&r, end_of_day).map_err(serde::de::Error::custom))
        .transpose()
}

fn start_of_window<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    window_bound(deserializer, false)
}

fn end_of_window<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    window_bound(deserializer, true)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
}

/// Age colour band shown next to each snapshot in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeBand {
    Green,
    Yellow,
    Red,
}

impl AgeBand {
    pub fn for_age_days(days: i64) -> Self {
        if days < 30 {
            AgeBand::Green
        } else if days < 90 {
            AgeBand::Yellow
        } else {
            AgeBand::Red
        }
    }
}

/// Snapshot row returned by search and favorites listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotListItem {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub age_days: i64,
    pub age_band: AgeBand,
}

impl SnapshotListItem {
    pub fn new(snapshot: Snapshot, now: DateTime<Utc>) -> Self {
        let age_days = snapshot.age_days(now);
        Self {
            snapshot,
            age_days,
            age_band: AgeBand::for_age_days(age_days),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateSnapshotRequest {
    #[validate(length(min = 1, max = 128))]
    pub subscription_id: String,
    #[validate(length(min = 1, max = 90))]
    pub resource_group: String,
    #[validate(length(min = 1, max = 80))]
    pub disk_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeleteOldSnapshotsRequest {
    #[validate(length(min = 1, max = 128))]
    pub subscription_id: String,
    #[validate(range(max = 36500))]
    pub age_in_days: u32,
}

/// Aggregate result classification of a command batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    NothingToDo,
    FullySucceeded,
    PartiallySucceeded,
    FullyFailed,
}

impl BatchOutcome {
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total == 0 {
            BatchOutcome::NothingToDo
        } else if succeeded == total {
            BatchOutcome::FullySucceeded
        } else if succeeded == 0 {
            BatchOutcome::FullyFailed
        } else {
            BatchOutcome::PartiallySucceeded
        }
    }
}

/// A lock that could not be restored; the resource group is left unprotected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockWarning {
    pub resource_group: String,
    pub lock_name: String,
    pub message: String,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOldSnapshotsResponse {
    pub outcome: BatchOutcome,
    pub deleted: Vec<SnapshotId>,
    pub failed: Vec<SnapshotId>,
    pub attempts: Vec<DeletionAttempt>,
    pub lock_warnings: Vec<LockWarning>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ToggleFavoriteRequest {
    #[validate(length(min = 1))]
    pub snapshot_id: String, // = SnapshotId; validator derive can't see through type aliases
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleFavoriteResponse {
    pub snapshot_id: SnapshotId,
    pub favorite: bool,
}

// =============================================================================
// Live push channel
// =============================================================================

/// Messages sent by the dashboard over the push connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { subscription_id: String },
    Unsubscribe,
    Ping,
}

/// Latest state of one subscription, pushed after every inventory change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardUpdate {
    pub subscription_id: String,
    /// Sequence of the newest inventory event folded into this update
    pub sequence: u64,
    pub summary: SummarySnapshot,
    pub recent_activity: Vec<ActivityEntry>,
}

/// Messages pushed to the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { subscriber_id: String },
    #[serde(rename = "dashboardUpdate")]
    DashboardUpdate(DashboardUpdate),
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { message: String },
}
