use serde::Serialize;
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// A registered snapshot repository, e.g. an Azure blob container.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRepository {
    pub name: String,
    pub repo_type: String,
    pub settings: Map<String, Value>,
    pub readonly: bool,
}

impl SnapshotRepository {
    /// Body of `PUT /_snapshot/<name>`.
    pub fn to_body(&self) -> Value {
        let mut settings = self.settings.clone();
        settings.insert("readonly".to_string(), Value::Bool(self.readonly));
        serde_json::json!({
            "type": self.repo_type,
            "settings": settings,
        })
    }
}

/// One restore invocation: which indices come out of the snapshot and how they are renamed.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub snapshot: String,
    pub indices: String,
    pub exclusions: Vec<String>,
    pub ignore_index_settings: Vec<String>,
    pub rename_prefix: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct RestoreBody {
    pub indices: String,
    pub ignore_index_settings: Option<Vec<String>>,
    pub rename_pattern: String,
    pub rename_replacement: String,
    pub include_global_state: bool,
}

impl RestoreRequest {
    /// Selector with every exclusion appended as `-<pattern>`.
    pub fn selector(&self) -> String {
        let mut parts: Vec<String> = self
            .indices
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect();
        if parts.is_empty() {
            parts.push("*".to_string());
        }
        for exclusion in &self.exclusions {
            let exclusion = exclusion.trim().trim_start_matches('-');
            if !exclusion.is_empty() {
                parts.push(format!("-{}", exclusion));
            }
        }
        parts.join(",")
    }

    pub fn to_body(&self) -> RestoreBody {
        RestoreBody {
            indices: self.selector(),
            ignore_index_settings: if self.ignore_index_settings.is_empty() {
                None
            } else {
                Some(self.ignore_index_settings.clone())
            },
            rename_pattern: "(.+)".to_string(),
            rename_replacement: format!("{}$1", self.rename_prefix),
            include_global_state: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> RestoreRequest {
        RestoreRequest {
            snapshot: "snapshot_1".to_string(),
            indices: "*".to_string(),
            exclusions: vec![".*".to_string()],
            ignore_index_settings: vec!["index.search*".to_string()],
            rename_prefix: "restored-".to_string(),
        }
    }

    #[test]
    fn restore_body_matches_operational_defaults() {
        let body = serde_json::to_value(request().to_body()).unwrap();
        assert_eq!(
            body,
            json!({
                "indices": "*,-.*",
                "ignore_index_settings": ["index.search*"],
                "rename_pattern": "(.+)",
                "rename_replacement": "restored-$1",
                "include_global_state": false
            })
        );
    }

    #[test]
    fn selector_keeps_multiple_patterns_and_normalises_exclusions() {
        let mut req = request();
        req.indices = "logs-*, metrics-*".to_string();
        req.exclusions = vec!["-.*".to_string(), "logs-old".to_string()];
        req.ignore_index_settings.clear();
        assert_eq!(req.selector(), "logs-*,metrics-*,-.*,-logs-old");
        let body = serde_json::to_value(req.to_body()).unwrap();
        assert!(body.get("ignore_index_settings").is_none());
    }

    #[test]
    fn repository_body_carries_readonly_flag() {
        let mut settings = Map::new();
        settings.insert("container".to_string(), json!("snapshots"));
        let repo = SnapshotRepository {
            name: "az_repo".to_string(),
            repo_type: "azure".to_string(),
            settings,
            readonly: true,
        };
        assert_eq!(
            repo.to_body(),
            json!({ "type": "azure", "settings": { "container": "snapshots", "readonly": true } })
        );
    }
}
