use serde::{Deserialize, Serialize};

/// One row of `GET /_cat/recovery?active_only=true&format=json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRow {
    pub index: String,
    #[serde(default)]
    pub shard: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(rename = "type", default)]
    pub recovery_type: Option<String>,
    #[serde(default)]
    pub bytes_percent: Option<String>,
}

impl RecoveryRow {
    pub fn describe(&self) -> String {
        format!(
            "{}[{}] {} {}",
            self.index,
            self.shard.as_deref().unwrap_or("?"),
            self.stage.as_deref().unwrap_or("unknown"),
            self.bytes_percent.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string()
    }
}

/// One row of `GET /_cat/indices/<index>?format=json&bytes=b`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub index: String,
    #[serde(rename = "docs.count", default)]
    pub docs_count: Option<String>,
    #[serde(rename = "store.size", default)]
    pub store_size: Option<String>,
}

impl IndexStats {
    pub fn docs(&self) -> Option<u64> {
        self.docs_count
            .as_deref()
            .and_then(|value| value.replace(',', "").parse::<u64>().ok())
    }

    pub fn store_bytes(&self) -> Option<u64> {
        self.store_size
            .as_deref()
            .and_then(|value| value.parse::<u64>().ok())
    }
}
