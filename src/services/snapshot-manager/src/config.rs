//! Configuration module for the snapshot manager
//!
//! This module provides configuration structures and defaults for the HTTP
//! server, the cloud provider boundary, retention thresholds, the deletion
//! worker pool and the live dashboard feed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use snapshot_shared::SubscriptionInfo;
use std::time::Duration;

/// Main configuration structure for the snapshot manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManagerConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Cloud provider configuration
    pub provider: ProviderConfig,

    /// Retention thresholds and environment naming rules
    pub retention: RetentionConfig,

    /// Deletion worker pool and retry configuration
    pub deletion: DeletionConfig,

    /// Live dashboard feed configuration
    pub live_sync: LiveSyncConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    InMemory,
    AzureCli,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_memory" | "memory" => Ok(ProviderKind::InMemory),
            "azure_cli" | "azure" | "az" => Ok(ProviderKind::AzureCli),
            _ => Err(format!("Invalid provider kind: {}", s)),
        }
    }
}

/// Cloud provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Path of the `az` executable
    pub az_binary: String,
    pub command_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub poll_timeout_seconds: u64,
    /// Subscriptions known to the in-memory provider at startup
    pub seed_subscriptions: Vec<SubscriptionInfo>,
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub production_days: u32,
    pub non_production_days: u32,
    /// Checked first; "nonprod" would otherwise match a production pattern
    pub non_production_patterns: Vec<String>,
    pub production_patterns: Vec<String>,
}

/// Deletion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Global bound on in-flight provider deletions across all groups
    pub concurrency: usize,
    pub retry: RetryConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

/// Live dashboard feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSyncConfig {
    pub activity_capacity: usize,
    pub event_buffer_size: usize,
    pub ping_interval_seconds: u64,
}

impl Default for SnapshotManagerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            retention: RetentionConfig::default(),
            deletion: DeletionConfig::default(),
            live_sync: LiveSyncConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
            timeout_seconds: 300,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::InMemory,
            az_binary: "az".to_string(),
            command_timeout_seconds: 120,
            poll_interval_ms: 2_000,
            poll_timeout_seconds: 240,
            seed_subscriptions: Vec::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            production_days: 7,
            non_production_days: 3,
            non_production_patterns: vec![
                r"non-?prod".to_string(),
                r"(^|[-_.\s])(dev|test|qa|uat|staging)([-_.\s]|$)".to_string(),
                r"sandbox".to_string(),
            ],
            production_patterns: vec![r"prod".to_string()],
        }
    }
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Default for LiveSyncConfig {
    fn default() -> Self {
        Self {
            activity_capacity: 50,
            event_buffer_size: 1024,
            ping_interval_seconds: 30,
        }
    }
}

impl SnapshotManagerConfig {
    /// Load configuration from defaults, an optional file, and environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let mut cfg = config::Config::builder();

        // Start with default configuration
        cfg = cfg.add_source(config::Config::try_from(&SnapshotManagerConfig::default())?);

        // Add config file if it exists
        if let Ok(config_file) = std::env::var("SNAPSHOT_MANAGER_CONFIG_FILE") {
            cfg = cfg.add_source(config::File::with_name(&config_file).required(false));
        }

        // Environment variables win over the file
        cfg = cfg.add_source(
            config::Environment::with_prefix("SNAPSHOT_MANAGER")
                .separator("__")
                .try_parsing(true),
        );

        cfg.build()?.try_deserialize()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.deletion.concurrency == 0 {
            return Err("Deletion concurrency must be greater than 0".to_string());
        }

        if self.deletion.retry.max_attempts == 0 {
            return Err("Max retry attempts must be greater than 0".to_string());
        }

        if self.deletion.retry.backoff_multiplier <= 1.0 {
            return Err("Backoff multiplier must be greater than 1.0".to_string());
        }

        if self.retention.production_patterns.is_empty()
            && self.retention.non_production_patterns.is_empty()
        {
            return Err("At least one environment naming pattern is required".to_string());
        }

        for pattern in self
            .retention
            .non_production_patterns
            .iter()
            .chain(self.retention.production_patterns.iter())
        {
            if let Err(e) = Regex::new(pattern) {
                return Err(format!("Invalid environment pattern '{}': {}", pattern, e));
            }
        }

        if self.provider.poll_timeout_seconds >= self.server.timeout_seconds {
            return Err(format!(
                "Deletion poll timeout ({}s) must be shorter than the server request timeout ({}s)",
                self.provider.poll_timeout_seconds, self.server.timeout_seconds
            ));
        }

        if self.provider.command_timeout_seconds >= self.server.timeout_seconds {
            return Err(format!(
                "Provider command timeout ({}s) must be shorter than the server request timeout ({}s)",
                self.provider.command_timeout_seconds, self.server.timeout_seconds
            ));
        }

        if self.live_sync.activity_capacity == 0 {
            return Err("Activity capacity must be greater than 0".to_string());
        }

        if self.live_sync.event_buffer_size == 0 {
            return Err("Event buffer size must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get timeout duration for the specified operation
    pub fn get_timeout(&self, operation: &str) -> Duration {
        let seconds = match operation {
            "provider" => self.provider.command_timeout_seconds,
            "poll" => self.provider.poll_timeout_seconds,
            "server" => self.server.timeout_seconds,
            _ => 30,
        };
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SnapshotManagerConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8090);
        assert_eq!(config.provider.kind, ProviderKind::InMemory);
        assert_eq!(config.retention.production_days, 7);
        assert_eq!(config.retention.non_production_days, 3);
    }

    #[test]
    fn test_config_validation() {
        let config = SnapshotManagerConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid_config = config.clone();
        invalid_config.server.port = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config.clone();
        invalid_config.deletion.concurrency = 0;
        assert!(invalid_config.validate().is_err());

        let mut invalid_config = config;
        invalid_config.retention.production_patterns = vec!["(".to_string()];
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_poll_deadline_must_fit_request_timeout() {
        let mut config = SnapshotManagerConfig::default();
        config.server.timeout_seconds = 1;
        config.provider.command_timeout_seconds = 0;
        config.provider.poll_timeout_seconds = 3;
        let error = config.validate().unwrap_err();
        assert!(error.contains("poll timeout"));

        config.provider.poll_timeout_seconds = 1;
        assert!(config.validate().is_err());

        config.provider.poll_timeout_seconds = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_provider_command_timeout_must_fit_request_timeout() {
        let mut config = SnapshotManagerConfig::default();
        config.provider.command_timeout_seconds = config.server.timeout_seconds;
        assert!(config.validate().unwrap_err().contains("command timeout"));
    }

    #[test]
    fn test_timeout_getter() {
        let config = SnapshotManagerConfig::default();
        assert_eq!(config.get_timeout("provider"), Duration::from_secs(120));
        assert_eq!(config.get_timeout("unknown"), Duration::from_secs(30));
    }

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("azure-cli".parse::<ProviderKind>(), Ok(ProviderKind::AzureCli));
        assert_eq!("memory".parse::<ProviderKind>(), Ok(ProviderKind::InMemory));
        assert!("gcp".parse::<ProviderKind>().is_err());
    }
}
