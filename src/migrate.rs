//! Per-index migration: staging index -> destination index.
//!
//! Each step is gated on the previous one. A failure is logged, turned into the
//! matching [`OutcomeStatus`] and never propagated, so one bad index does not
//! stop the batch. The staging index is only deleted once its reindex task was
//! observed completed without error (and, by default, document counts agree).

use log::Level;
use logging_timer::stimer;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::conf::MigrationSettings;
use crate::error::WaitError;
use crate::es_client::ClusterApi;
use crate::health::{poll_until, Check};
use crate::models::index_meta::{index_settings_mut, StagingIndex};
use crate::models::task::{TaskState, TaskStatus};
use crate::shutdown::Shutdown;
use crate::utils::format_size;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded { staging_deleted: bool },
    FailedAtCreate { detail: String },
    FailedAtReindex { detail: String },
    FailedAtDelete { detail: String },
    /// Shutdown was requested while the reindex task was still running.
    Interrupted { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    pub staging: String,
    pub destination: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

impl MigrationOutcome {
    fn new(staging: &str, destination: &str) -> Self {
        Self {
            staging: staging.to_string(),
            destination: destination.to_string(),
            task_id: None,
            status: OutcomeStatus::Succeeded {
                staging_deleted: false,
            },
        }
    }

    fn finish(mut self, status: OutcomeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self.status {
            OutcomeStatus::Succeeded { .. } => "succeeded",
            OutcomeStatus::FailedAtCreate { .. } => "failed-at-create",
            OutcomeStatus::FailedAtReindex { .. } => "failed-at-reindex",
            OutcomeStatus::FailedAtDelete { .. } => "failed-at-delete",
            OutcomeStatus::Interrupted { .. } => "interrupted",
        }
    }
}

/// `staging` with `prefix` removed once from the start; `None` when it does not carry the prefix.
pub fn destination_name<'a>(staging: &'a str, prefix: &str) -> Option<&'a str> {
    staging
        .strip_prefix(prefix)
        .filter(|destination| !destination.is_empty())
}

/// Removes the denylisted keys from `settings.index`. Dotted entries address nested keys.
pub fn sanitize_settings(payload: &mut Value, denylist: &[String]) {
    let settings = match payload
        .pointer_mut("/settings/index")
        .and_then(Value::as_object_mut)
    {
        Some(settings) => settings,
        None => return,
    };
    for key in denylist {
        let key = key.strip_prefix("index.").unwrap_or(key);
        remove_path(settings, key);
    }
}

fn remove_path(map: &mut Map<String, Value>, key: &str) {
    if map.remove(key).is_some() {
        return;
    }
    if let Some((head, rest)) = key.split_once('.') {
        if let Some(Value::Object(child)) = map.get_mut(head) {
            remove_path(child, rest);
        }
    }
}

fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Applies the shard override and every settings override matching `destination`.
/// Returns a description of each change for the log.
pub fn apply_overrides(
    payload: &mut Value,
    destination: &str,
    settings: &MigrationSettings,
) -> Vec<String> {
    let mut applied = Vec::new();
    let index_settings = match index_settings_mut(payload) {
        Some(index_settings) => index_settings,
        None => return applied,
    };
    if let Some(shards) = settings.number_of_shards {
        index_settings.insert("number_of_shards".to_string(), Value::from(shards));
        applied.push(format!("Setting number of shards to {}", shards));
    }
    for item in settings
        .settings_overrides
        .iter()
        .filter(|item| item.matches(destination))
    {
        if let Some(patch) = item.settings.as_object() {
            deep_merge(index_settings, patch);
            applied.push(format!(
                "Applying settings override {} ({})",
                item.index, item.settings
            ));
        }
    }
    applied
}

enum TaskWait {
    Finished(TaskStatus),
    Lost(String),
    Interrupted,
}

pub struct IndexMigrator<'a, C: ?Sized> {
    cluster: &'a C,
    settings: &'a MigrationSettings,
    shutdown: &'a Shutdown,
}

impl<'a, C: ClusterApi + ?Sized> IndexMigrator<'a, C> {
    pub fn new(cluster: &'a C, settings: &'a MigrationSettings, shutdown: &'a Shutdown) -> Self {
        Self {
            cluster,
            settings,
            shutdown,
        }
    }

    pub async fn migrate(&self, staging: StagingIndex) -> MigrationOutcome {
        let _timer = stimer!(Level::Info; "MIGRATE_INDEX", "{}", staging.name);
        let StagingIndex { name, mut payload } = staging;

        let destination = match destination_name(&name, &self.settings.rename_prefix) {
            Some(destination) => destination.to_string(),
            None => {
                let detail = format!(
                    "index name does not start with the staging prefix {:?}",
                    self.settings.rename_prefix
                );
                error!(index = %name, "{}", detail);
                return MigrationOutcome::new(&name, &name)
                    .finish(OutcomeStatus::FailedAtCreate { detail });
            }
        };
        let mut outcome = MigrationOutcome::new(&name, &destination);
        self.log_staging_stats(&name).await;

        sanitize_settings(&mut payload, &self.settings.settings_denylist);
        for change in apply_overrides(&mut payload, &destination, self.settings) {
            info!(index = %destination, "{}", change);
        }

        info!(index = %destination, "Creating index {}...", destination);
        if let Err(err) = self.cluster.create_index(&destination, &payload).await {
            error!(
                index = %destination,
                status = ?err.status(),
                "Failed to create index {}. {}",
                destination,
                err
            );
            return outcome.finish(OutcomeStatus::FailedAtCreate {
                detail: err.to_string(),
            });
        }

        info!(index = %destination, "Reindexing {} to {}...", name, destination);
        let task_id = match self
            .cluster
            .submit_reindex(&name, &destination, &self.settings.reindex)
            .await
        {
            Ok(task_id) => task_id,
            Err(err) => {
                error!(
                    index = %destination,
                    status = ?err.status(),
                    "Failed to reindex {} to {}. {}",
                    name,
                    destination,
                    err
                );
                return outcome.finish(OutcomeStatus::FailedAtReindex {
                    detail: err.to_string(),
                });
            }
        };
        info!(index = %destination, task = %task_id, "Reindexing task submitted");
        outcome.task_id = Some(task_id.clone());

        let status = match self.await_task(&task_id).await {
            TaskWait::Finished(status) => status,
            TaskWait::Lost(detail) => {
                error!(task = %task_id, "Lost track of reindex task. {}", detail);
                return outcome.finish(OutcomeStatus::FailedAtReindex { detail });
            }
            TaskWait::Interrupted => {
                let detail = format!(
                    "shutdown requested while task {} was running; {} exists, {} kept",
                    task_id, destination, name
                );
                warn!(index = %destination, "{}", detail);
                return outcome.finish(OutcomeStatus::Interrupted { detail });
            }
        };

        if let TaskState::Failed(detail) = status.state() {
            error!(
                index = %destination,
                task = %task_id,
                "Reindexing failed, keeping {}. {}",
                name,
                detail
            );
            return outcome.finish(OutcomeStatus::FailedAtReindex { detail });
        }

        if self.settings.verify_doc_count {
            if let Err(detail) = self.verify_counts(&name, &destination).await {
                error!(index = %destination, "Verification failed, keeping {}. {}", name, detail);
                return outcome.finish(OutcomeStatus::FailedAtReindex { detail });
            }
        }

        if !self.settings.delete_staging {
            info!(
                index = %destination,
                "Reindex completed. Keeping {} (staging deletion is disabled)",
                name
            );
            return outcome.finish(OutcomeStatus::Succeeded {
                staging_deleted: false,
            });
        }

        info!(index = %destination, "Reindex completed. Deleting {}...", name);
        match self.cluster.delete_index(&name).await {
            Ok(()) => outcome.finish(OutcomeStatus::Succeeded {
                staging_deleted: true,
            }),
            Err(err) => {
                error!(
                    index = %name,
                    status = ?err.status(),
                    "Failed to delete {}, it must be removed manually. {}",
                    name,
                    err
                );
                outcome.finish(OutcomeStatus::FailedAtDelete {
                    detail: err.to_string(),
                })
            }
        }
    }

    async fn log_staging_stats(&self, name: &str) {
        match self.cluster.index_stats(name).await {
            Ok(Some(stats)) => info!(
                index = %name,
                "Staging index holds {} docs, {}",
                stats
                    .docs()
                    .map(|docs| docs.to_string())
                    .unwrap_or_else(|| "n/a".to_string()),
                format_size(stats.store_bytes())
            ),
            Ok(None) => debug!(index = %name, "No stats for staging index"),
            Err(err) => debug!(index = %name, "Failed to read staging stats: {}", err),
        }
    }

    async fn await_task(&self, task_id: &str) -> TaskWait {
        let cluster = self.cluster;
        let condition = format!("reindex task {}", task_id);
        let result = poll_until(
            &condition,
            move || async move {
                match cluster.task_status(task_id).await {
                    Ok(status) if status.completed => Check::Ready(Ok(status)),
                    Ok(status) => Check::Pending(format!("Task status: {}", status.progress())),
                    Err(err) if err.is_not_found() => Check::Ready(Err(err)),
                    Err(err) => {
                        warn!(task = %task_id, "Task status unavailable: {}", err);
                        Check::Pending(format!("task status unavailable ({})", err))
                    }
                }
            },
            &self.settings.task_poll,
            self.shutdown,
        )
        .await;
        match result {
            Ok((Ok(status), report)) => {
                info!(
                    task = %task_id,
                    "Reindexing task finished after {} poll(s) in {:?}",
                    report.polls,
                    report.elapsed
                );
                TaskWait::Finished(status)
            }
            Ok((Err(err), _)) => TaskWait::Lost(err.to_string()),
            Err(WaitError::Cancelled { .. }) => TaskWait::Interrupted,
            Err(err) => TaskWait::Lost(err.to_string()),
        }
    }

    async fn verify_counts(&self, staging: &str, destination: &str) -> Result<u64, String> {
        let source_count = self
            .cluster
            .count_documents(staging, false)
            .await
            .map_err(|e| format!("could not count documents in {}: {}", staging, e))?;
        let destination_count = self
            .cluster
            .count_documents(destination, true)
            .await
            .map_err(|e| format!("could not count documents in {}: {}", destination, e))?;
        if source_count != destination_count {
            return Err(format!(
                "document count mismatch: {} has {}, {} has {}",
                staging, source_count, destination, destination_count
            ));
        }
        info!(index = %destination, "Verified {} documents", destination_count);
        Ok(destination_count)
    }
}
