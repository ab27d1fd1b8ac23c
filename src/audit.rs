use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

use crate::migrate::MigrationOutcome;

pub enum What {
    RunStarted,
    RepositoryEnsured,
    RestoreSubmitted,
    RestoreSettled,
    StagingDiscovered,
    IndexMigrated,
    RunFinished,
    RunAborted,
}

impl What {
    pub fn as_str(&self) -> &'static str {
        match self {
            What::RunStarted => "RunStarted",
            What::RepositoryEnsured => "RepositoryEnsured",
            What::RestoreSubmitted => "RestoreSubmitted",
            What::RestoreSettled => "RestoreSettled",
            What::StagingDiscovered => "StagingDiscovered",
            What::IndexMigrated => "IndexMigrated",
            What::RunFinished => "RunFinished",
            What::RunAborted => "RunAborted",
        }
    }
}

/// Append-only JSON-lines record of a run. Without a file every call is a no-op.
pub struct AuditTrail {
    file_handler: Mutex<Option<File>>,
}

impl AuditTrail {
    pub fn disabled() -> Self {
        Self {
            file_handler: Mutex::new(None),
        }
    }

    /// Opens `path` for appending, creating parent directories. An unusable
    /// path only disables the trail.
    pub async fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent).await;
        }

        let file_handler = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
        {
            Ok(file) => Some(file),
            Err(err) => {
                warn!("Audit file {:?} cannot be opened, audit disabled: {}", path, err);
                None
            }
        };

        Self {
            file_handler: Mutex::new(file_handler),
        }
    }

    pub async fn record(&self, what: What, data: Value) {
        let mut guard = self.file_handler.lock().await;
        let file = match guard.as_mut() {
            Some(file) => file,
            None => return,
        };
        let line = json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "what": what.as_str(),
            "data": data,
        });
        let result = async {
            file.write_all(format!("{}\n", line).as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = result {
            warn!("Failed to append to audit file: {}", err);
        }
    }

    pub async fn record_outcome(&self, outcome: &MigrationOutcome) {
        let data = serde_json::to_value(outcome).unwrap_or(Value::Null);
        self.record(What::IndexMigrated, data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_are_appended_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");

        let audit = AuditTrail::open(&path).await;
        audit
            .record(What::RestoreSubmitted, json!({ "snapshot": "snapshot_1" }))
            .await;
        audit.record(What::RunFinished, json!({ "succeeded": 2 })).await;
        drop(audit);

        let reopened = AuditTrail::open(&path).await;
        reopened.record(What::RunStarted, Value::Null).await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["what"], "RestoreSubmitted");
        assert_eq!(lines[0]["data"]["snapshot"], "snapshot_1");
        assert_eq!(lines[2]["what"], "RunStarted");
        assert!(lines[1]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn disabled_trail_writes_nothing() {
        let audit = AuditTrail::disabled();
        audit.record(What::RunStarted, json!({})).await;
        assert!(audit.file_handler.lock().await.is_none());
    }
}
