//! Retention policy evaluation
//!
//! Classifies snapshots into production and non-production from the naming of
//! their subscription and resource group, then selects the ones old enough to
//! delete. Nothing here has side effects.

use crate::config::RetentionConfig;
use crate::error::{Result, SnapshotError};
use crate::inventory::InventoryIndex;

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use snapshot_shared::{EnvironmentClass, Snapshot, SnapshotId};

/// Classification of a single name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameClass {
    Production,
    NonProduction,
    Unknown,
}

/// Pure mapping from resource naming to [`EnvironmentClass`]
#[derive(Debug, Clone)]
pub struct EnvironmentClassifier {
    non_production: Vec<Regex>,
    production: Vec<Regex>,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| SnapshotError::config(format!("Invalid environment pattern '{}': {}", p, e)))
        })
        .collect()
}

impl EnvironmentClassifier {
    pub fn new(config: &RetentionConfig) -> Result<Self> {
        Ok(Self {
            non_production: compile(&config.non_production_patterns)?,
            production: compile(&config.production_patterns)?,
        })
    }

    /// Non-production patterns win unless a production marker remains once
    /// their matches are cut out ("prod-nonprod-mirror" stays production).
    pub fn classify_name(&self, name: &str) -> NameClass {
        let mut residue = name.to_string();
        let mut non_production = false;
        for pattern in &self.non_production {
            if pattern.is_match(&residue) {
                non_production = true;
                residue = pattern.replace_all(&residue, " ").into_owned();
            }
        }

        let production = self.production.iter().any(|p| p.is_match(&residue));
        match (non_production, production) {
            (_, true) => NameClass::Production,
            (true, false) => NameClass::NonProduction,
            (false, false) => NameClass::Unknown,
        }
    }

    /// Any production signal wins; unclassifiable names are production.
    pub fn classify(&self, subscription_name: &str, resource_group: &str) -> EnvironmentClass {
        let classes = [
            self.classify_name(subscription_name),
            self.classify_name(resource_group),
        ];
        if classes.contains(&NameClass::Production) {
            EnvironmentClass::Production
        } else if classes.contains(&NameClass::NonProduction) {
            EnvironmentClass::NonProduction
        } else {
            EnvironmentClass::Production
        }
    }
}

/// Minimum age in days per environment class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionThresholds {
    pub production_days: u32,
    pub non_production_days: u32,
}

impl RetentionThresholds {
    pub fn for_class(&self, class: EnvironmentClass) -> u32 {
        match class {
            EnvironmentClass::Production => self.production_days,
            EnvironmentClass::NonProduction => self.non_production_days,
        }
    }
}

impl From<&RetentionConfig> for RetentionThresholds {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            production_days: config.production_days,
            non_production_days: config.non_production_days,
        }
    }
}

pub struct RetentionEvaluator {
    classifier: EnvironmentClassifier,
    thresholds: RetentionThresholds,
}

impl RetentionEvaluator {
    pub fn new(config: &RetentionConfig) -> Result<Self> {
        Ok(Self {
            classifier: EnvironmentClassifier::new(config)?,
            thresholds: RetentionThresholds::from(config),
        })
    }

    pub fn classifier(&self) -> &EnvironmentClassifier {
        &self.classifier
    }

    /// Threshold applied to a snapshot; a requested age can only make it stricter
    pub fn effective_threshold(&self, class: EnvironmentClass, requested_days: Option<u32>) -> u32 {
        let configured = self.thresholds.for_class(class);
        requested_days.map_or(configured, |r| r.max(configured))
    }

    pub fn is_eligible(
        &self,
        snapshot: &Snapshot,
        subscription_name: &str,
        requested_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> bool {
        let class = self.classifier.classify(subscription_name, &snapshot.resource_group);
        let threshold = self.effective_threshold(class, requested_days);
        now - snapshot.created_at >= Duration::days(i64::from(threshold))
    }

    /// Eligible snapshot ids of a subscription, oldest first
    pub fn eligible(
        &self,
        index: &InventoryIndex,
        subscription_id: &str,
        requested_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Vec<SnapshotId>> {
        let subscription = index
            .subscription(subscription_id)
            .ok_or_else(|| SnapshotError::not_found(format!("subscription {}", subscription_id)))?;

        let mut eligible: Vec<Snapshot> = index
            .snapshots(subscription_id)
            .into_iter()
            .filter(|s| self.is_eligible(s, &subscription.name, requested_days, now))
            .collect();
        eligible.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(eligible.into_iter().map(|s| s.id).collect())
    }
}
