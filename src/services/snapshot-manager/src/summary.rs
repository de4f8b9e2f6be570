//! Summary aggregation
//!
//! Distribution statistics are always recomputed from the inventory index and
//! never patched incrementally. Ages are measured against the time the
//! subscription last changed, not the wall clock, so two computations over the
//! same index state compare equal even across a day boundary.

use crate::inventory::InventoryIndex;

use chrono::{DateTime, Utc};
use snapshot_shared::{AgeBucket, SizeBucket, Snapshot, SummarySnapshot};

/// Optional creation-time window, both bounds inclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

pub fn compute(index: &InventoryIndex, subscription_id: &str, window: TimeWindow) -> SummarySnapshot {
    let view = index.view(subscription_id);
    summarize(subscription_id, &view.snapshots, window, view.as_of)
}

/// Summary with ages measured against `now`
pub fn compute_at(
    index: &InventoryIndex,
    subscription_id: &str,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> SummarySnapshot {
    summarize(subscription_id, &index.snapshots(subscription_id), window, now)
}

/// Pure aggregation over an already captured set of snapshots
pub fn summarize(
    subscription_id: &str,
    snapshots: &[Snapshot],
    window: TimeWindow,
    now: DateTime<Utc>,
) -> SummarySnapshot {
    let mut summary = SummarySnapshot::empty(subscription_id, window.from, window.to);

    for snapshot in snapshots.iter().filter(|s| window.contains(s.created_at)) {
        summary.total_count += 1;
        summary.total_size_gb += snapshot.size_gb;
        *summary
            .age_buckets
            .entry(AgeBucket::for_age_days(snapshot.age_days(now)))
            .or_insert(0) += 1;
        *summary.status_buckets.entry(snapshot.status).or_insert(0) += 1;
        *summary
            .size_buckets
            .entry(SizeBucket::for_size_gb(snapshot.size_gb))
            .or_insert(0) += 1;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use snapshot_shared::{EnvironmentClass, SnapshotStatus, SubscriptionInfo};

    fn populated() -> (InventoryIndex, DateTime<Utc>) {
        let now = Utc::now();
        let index = InventoryIndex::new(10, 16);
        index.set_subscriptions(vec![SubscriptionInfo {
            id: "sub-1".to_string(),
            name: "contoso-prod".to_string(),
        }]);
        let make = |id: &str, days: i64, size_gb: u64, status: SnapshotStatus| Snapshot {
            id: id.to_string(),
            name: id.to_string(),
            resource_group: "rg-app".to_string(),
            subscription_id: "sub-1".to_string(),
            created_at: now - Duration::days(days),
            size_gb,
            status,
            favorite: false,
            environment: EnvironmentClass::Production,
            created_by: None,
        };
        index
            .replace_subscription(
                "sub-1",
                vec![
                    make("a", 1, 0, SnapshotStatus::Ready),
                    make("b", 10, 5, SnapshotStatus::Ready),
                    make("c", 45, 50, SnapshotStatus::Creating),
                    make("d", 200, 500, SnapshotStatus::Error),
                ],
            )
            .unwrap();
        (index, now)
    }

    #[test]
    fn test_buckets_and_totals() {
        let (index, now) = populated();
        let summary = compute_at(&index, "sub-1", TimeWindow::default(), now);

        assert_eq!(summary.total_count, 4);
        assert_eq!(summary.total_size_gb, 555);
        assert_eq!(summary.age_buckets[&AgeBucket::UpToWeek], 1);
        assert_eq!(summary.age_buckets[&AgeBucket::UpToMonth], 1);
        assert_eq!(summary.age_buckets[&AgeBucket::UpToQuarter], 1);
        assert_eq!(summary.age_buckets[&AgeBucket::OverQuarter], 1);
        assert_eq!(summary.status_buckets[&SnapshotStatus::Ready], 2);
        assert_eq!(summary.size_buckets[&SizeBucket::UpToOne], 1);
        assert_eq!(summary.size_buckets[&SizeBucket::OverHundred], 1);
    }

    #[test]
    fn test_repeated_calls_are_identical() {
        let (index, now) = populated();
        let first = compute_at(&index, "sub-1", TimeWindow::default(), now);
        let second = compute_at(&index, "sub-1", TimeWindow::default(), now);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_ages_follow_index_state_not_clock() {
        let (index, _) = populated();
        let first = compute(&index, "sub-1", TimeWindow::default());
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = compute(&index, "sub-1", TimeWindow::default());
        assert_eq!(first, second);

        let later = compute_at(&index, "sub-1", TimeWindow::default(), index.as_of("sub-1") + Duration::days(7));
        assert_eq!(later.age_buckets[&AgeBucket::UpToWeek], 0);
        assert_eq!(first.age_buckets[&AgeBucket::UpToWeek], 1);
    }

    #[test]
    fn test_window_restricts_counts() {
        let (index, now) = populated();
        let window = TimeWindow::new(Some(now - Duration::days(30)), None);
        let summary = compute_at(&index, "sub-1", window, now);
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.window_from, window.from);
    }

    #[test]
    fn test_window_excluding_everything_is_all_zero() {
        let (index, now) = populated();
        let window = TimeWindow::new(Some(now + Duration::days(1)), Some(now + Duration::days(2)));
        let summary = compute_at(&index, "sub-1", window, now);

        assert_eq!(summary, SummarySnapshot::empty("sub-1", window.from, window.to));
        assert!(summary.age_buckets.values().all(|c| *c == 0));
        assert!(summary.status_buckets.values().all(|c| *c == 0));
        assert!(summary.size_buckets.values().all(|c| *c == 0));
    }
}
