//! Azure provider driven through the `az` command line
//!
//! Every call spawns `az` with JSON output and a bounded runtime. Failures are
//! classified from stderr by [`classify_cli_failure`].

use super::{CloudProvider, DeleteOperation, DeleteStatus};
use crate::config::ProviderConfig;
use crate::error::{Result, SnapshotError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snapshot_shared::{LockLevel, ResourceLock, Snapshot, SnapshotStatus, SubscriptionInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

const SNAPSHOT_QUERY: &str = "[].{id:id, name:name, resourceGroup:resourceGroup, \
    timeCreated:timeCreated, diskSizeGb:diskSizeGb, provisioningState:provisioningState, tags:tags}";

pub struct AzureCliProvider {
    binary: String,
    command_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliSubscription {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliSnapshot {
    id: String,
    name: String,
    resource_group: String,
    time_created: DateTime<Utc>,
    #[serde(default)]
    disk_size_gb: Option<u64>,
    #[serde(default)]
    provisioning_state: Option<String>,
    #[serde(default)]
    tags: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliLock {
    id: String,
    name: String,
    level: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    resource_group: Option<String>,
}

impl CliSnapshot {
    fn into_snapshot(self, subscription_id: &str) -> Snapshot {
        let status = self
            .provisioning_state
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(SnapshotStatus::Ready);
        Snapshot {
            id: self.id,
            name: self.name,
            resource_group: self.resource_group,
            subscription_id: subscription_id.to_string(),
            created_at: self.time_created,
            size_gb: self.disk_size_gb.unwrap_or(0),
            status,
            favorite: false,
            environment: Default::default(),
            created_by: self.tags.and_then(|t| t.get("CreatedByUserId").cloned()),
        }
    }
}

/// Map `az` stderr to the error taxonomy
pub fn classify_cli_failure(operation: &str, stderr: &str) -> SnapshotError {
    let text = stderr.trim();
    let lower = text.to_lowercase();
    if lower.contains("toomanyrequests")
        || lower.contains("throttl")
        || lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("retry after")
        || lower.contains("serviceunavailable")
    {
        SnapshotError::transient(operation, text)
    } else if lower.contains("authorizationfailed")
        || lower.contains("forbidden")
        || lower.contains("does not have authorization")
        || lower.contains("az login")
    {
        SnapshotError::authorization(text)
    } else if lower.contains("resourcenotfound")
        || lower.contains("resourcegroupnotfound")
        || lower.contains("notfound")
        || lower.contains("was not found")
    {
        SnapshotError::not_found(text)
    } else {
        SnapshotError::provider(operation, text)
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(operation: &str, output: &str) -> Result<T> {
    serde_json::from_str(output).map_err(|e| {
        SnapshotError::provider(operation, format!("unexpected az output: {}", e))
    })
}

fn parse_snapshots(subscription_id: &str, output: &str) -> Result<Vec<Snapshot>> {
    let listed: Vec<CliSnapshot> = parse_json("list_snapshots", output)?;
    Ok(listed
        .into_iter()
        .map(|s| s.into_snapshot(subscription_id))
        .collect())
}

fn parse_locks(subscription_id: &str, resource_group: &str, output: &str) -> Result<Vec<ResourceLock>> {
    let listed: Vec<CliLock> = parse_json("list_locks", output)?;
    Ok(listed
        .into_iter()
        .filter_map(|lock| {
            let level: LockLevel = match lock.level.parse() {
                Ok(level) => level,
                Err(e) => {
                    warn!("Ignoring lock {}: {}", lock.name, e);
                    return None;
                }
            };
            Some(ResourceLock {
                id: lock.id,
                name: lock.name,
                resource_group: lock.resource_group.unwrap_or_else(|| resource_group.to_string()),
                subscription_id: subscription_id.to_string(),
                level,
                notes: lock.notes,
                owned_by_operation: false,
            })
        })
        .collect())
}

fn delete_status(provisioning_state: &str) -> DeleteStatus {
    match provisioning_state.trim().to_lowercase().as_str() {
        "failed" => DeleteStatus::Failed("provisioning state Failed".to_string()),
        _ => DeleteStatus::InProgress,
    }
}

impl AzureCliProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            binary: config.az_binary.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
        }
    }

    async fn run(&self, operation: &str, args: &[&str]) -> Result<String> {
        debug!(operation, "az {}", args.join(" "));
        let output = tokio::time::timeout(
            self.command_timeout,
            Command::new(&self.binary).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| {
            SnapshotError::transient(
                operation,
                format!("az did not finish within {:?}", self.command_timeout),
            )
        })??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_cli_failure(
                operation,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

#[async_trait]
impl CloudProvider for AzureCliProvider {
    fn name(&self) -> &'static str {
        "azure_cli"
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>> {
        let output = self
            .run(
                "list_subscriptions",
                &["account", "list", "--query", "[].{name:name, id:id}", "-o", "json"],
            )
            .await?;
        let listed: Vec<CliSubscription> = parse_json("list_subscriptions", &output)?;
        Ok(listed
            .into_iter()
            .map(|s| SubscriptionInfo { id: s.id, name: s.name })
            .collect())
    }

    async fn list_snapshots(&self, subscription_id: &str) -> Result<Vec<Snapshot>> {
        let output = self
            .run(
                "list_snapshots",
                &[
                    "snapshot",
                    "list",
                    "--subscription",
                    subscription_id,
                    "--query",
                    SNAPSHOT_QUERY,
                    "-o",
                    "json",
                ],
            )
            .await?;
        parse_snapshots(subscription_id, &output)
    }

    async fn list_locks(&self, subscription_id: &str, resource_group: &str) -> Result<Vec<ResourceLock>> {
        let output = self
            .run(
                "list_locks",
                &[
                    "lock",
                    "list",
                    "--subscription",
                    subscription_id,
                    "--resource-group",
                    resource_group,
                    "-o",
                    "json",
                ],
            )
            .await?;
        parse_locks(subscription_id, resource_group, &output)
    }

    async fn remove_lock(&self, lock: &ResourceLock) -> Result<()> {
        self.run("remove_lock", &["lock", "delete", "--ids", lock.id.as_str()])
            .await
            .map(|_| ())
    }

    async fn restore_lock(&self, lock: &ResourceLock) -> Result<()> {
        let level = match lock.level {
            LockLevel::CanNotDelete => "CanNotDelete",
            LockLevel::ReadOnly => "ReadOnly",
        };
        let mut args = vec![
            "lock",
            "create",
            "--name",
            lock.name.as_str(),
            "--subscription",
            lock.subscription_id.as_str(),
            "--resource-group",
            lock.resource_group.as_str(),
            "--lock-type",
            level,
        ];
        if let Some(notes) = &lock.notes {
            args.push("--notes");
            args.push(notes.as_str());
        }
        self.run("restore_lock", &args).await.map(|_| ())
    }

    async fn begin_delete(&self, snapshot: &Snapshot) -> Result<DeleteOperation> {
        self.run(
            "begin_delete",
            &["snapshot", "delete", "--ids", snapshot.id.as_str(), "--no-wait"],
        )
        .await?;
        Ok(DeleteOperation {
            operation_id: Uuid::new_v4().to_string(),
            snapshot_id: snapshot.id.clone(),
            subscription_id: snapshot.subscription_id.clone(),
        })
    }

    async fn poll_delete(&self, operation: &DeleteOperation) -> Result<DeleteStatus> {
        let shown = self
            .run(
                "poll_delete",
                &[
                    "snapshot",
                    "show",
                    "--ids",
                    operation.snapshot_id.as_str(),
                    "--query",
                    "provisioningState",
                    "-o",
                    "tsv",
                ],
            )
            .await;
        match shown {
            Ok(state) => Ok(delete_status(&state)),
            Err(SnapshotError::NotFound { .. }) => Ok(DeleteStatus::Succeeded),
            Err(e) => Err(e),
        }
    }

    async fn create_snapshot(
        &self,
        subscription_id: &str,
        resource_group: &str,
        disk_name: &str,
    ) -> Result<Snapshot> {
        let name = format!("{}-snapshot-{}", disk_name, Utc::now().format("%Y%m%d%H%M%S"));
        let output = self
            .run(
                "create_snapshot",
                &[
                    "snapshot",
                    "create",
                    "--subscription",
                    subscription_id,
                    "--resource-group",
                    resource_group,
                    "--name",
                    name.as_str(),
                    "--source",
                    disk_name,
                    "-o",
                    "json",
                ],
            )
            .await?;
        let created: CliSnapshot = parse_json("create_snapshot", &output)?;
        Ok(created.into_snapshot(subscription_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_cli_failure() {
        assert!(matches!(
            classify_cli_failure("delete", "ERROR: (TooManyRequests) Please retry after 30s"),
            SnapshotError::TransientProvider { .. }
        ));
        assert!(matches!(
            classify_cli_failure("delete", "ERROR: (AuthorizationFailed) The client does not have authorization"),
            SnapshotError::Authorization { .. }
        ));
        assert!(matches!(
            classify_cli_failure("show", "ERROR: (ResourceNotFound) The Resource was not found"),
            SnapshotError::NotFound { .. }
        ));
        assert!(matches!(
            classify_cli_failure("delete", "ERROR: (Conflict) Disk is attached"),
            SnapshotError::Provider { .. }
        ));
    }

    #[test]
    fn test_parse_snapshots_carries_creator_tag() {
        let output = r#"[{
            "id": "/subscriptions/sub-1/resourceGroups/rg-app/providers/Microsoft.Compute/snapshots/s1",
            "name": "s1",
            "resourceGroup": "rg-app",
            "timeCreated": "2024-03-01T10:00:00+00:00",
            "diskSizeGb": 128,
            "provisioningState": "Succeeded",
            "tags": {"CreatedByUserId": "alice@contoso.com"}
        }]"#;
        let snapshots = parse_snapshots("sub-1", output).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].size_gb, 128);
        assert_eq!(snapshots[0].status, SnapshotStatus::Ready);
        assert_eq!(snapshots[0].created_by.as_deref(), Some("alice@contoso.com"));
        assert_eq!(snapshots[0].subscription_id, "sub-1");
    }

    #[test]
    fn test_parse_locks_keeps_level() {
        let output = r#"[
            {"id": "lock-1", "name": "no-delete", "level": "CanNotDelete", "notes": null},
            {"id": "lock-2", "name": "read-only", "level": "ReadOnly"}
        ]"#;
        let locks = parse_locks("sub-1", "rg-app", output).unwrap();
        assert_eq!(locks.len(), 2);
        assert_eq!(locks[0].level, LockLevel::CanNotDelete);
        assert_eq!(locks[1].resource_group, "rg-app");
    }

    #[test]
    fn test_delete_status_from_provisioning_state() {
        assert_eq!(delete_status("Deleting\n"), DeleteStatus::InProgress);
        assert!(matches!(delete_status("Failed"), DeleteStatus::Failed(_)));
    }

    #[test]
    fn test_malformed_output_is_a_provider_error() {
        assert!(matches!(
            parse_snapshots("sub-1", "not json"),
            Err(SnapshotError::Provider { .. })
        ));
    }
}
