use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

/// Body of `POST /_reindex`.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexBody {
    pub source: IndexRef,
    pub dest: IndexRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRef {
    pub index: String,
}

impl ReindexBody {
    pub fn new(source: &str, dest: &str) -> Self {
        Self {
            source: IndexRef {
                index: source.to_string(),
            },
            dest: IndexRef {
                index: dest.to_string(),
            },
        }
    }
}

/// Query string of the reindex submission.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ReindexQuery {
    pub wait_for_completion: bool,
    pub slices: Option<String>,
    pub requests_per_second: Option<f64>,
}

/// Optional throttling/parallelism of the server-side copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReindexOptions {
    #[serde(default)]
    pub slices: Option<String>,
    #[serde(default)]
    pub requests_per_second: Option<f64>,
}

impl ReindexOptions {
    pub fn query(&self) -> ReindexQuery {
        ReindexQuery {
            wait_for_completion: false,
            slices: self.slices.clone(),
            requests_per_second: self.requests_per_second,
        }
    }
}

/// Acknowledgement of an asynchronous submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmitted {
    pub task: String,
}

/// Response of `GET /_tasks/<id>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStatus {
    pub completed: bool,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub task: Option<TaskInfo>,
    #[serde(default)]
    pub response: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Where a polled task stands.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    InProgress,
    Succeeded,
    Failed(String),
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        if !self.completed {
            return TaskState::InProgress;
        }
        if let Some(error) = self.error.as_ref().filter(|error| is_set(error)) {
            return TaskState::Failed(error.to_string());
        }
        let failures = self
            .response
            .as_ref()
            .and_then(|response| response.get("failures"))
            .and_then(Value::as_array)
            .filter(|failures| !failures.is_empty());
        if let Some(failures) = failures {
            return TaskState::Failed(format!(
                "{} document failure(s), first: {}",
                failures.len(),
                failures[0]
            ));
        }
        TaskState::Succeeded
    }

    /// One-line progress string taken from `task.status`.
    pub fn progress(&self) -> String {
        let status = match self.task.as_ref().and_then(|task| task.status.as_ref()) {
            Some(status) => status,
            None => return "unknown".to_string(),
        };
        let field = |name: &str| status.get(name).and_then(Value::as_u64);
        match field("total") {
            Some(total) => format!(
                "{}/{} docs (created={}, updated={}, deleted={})",
                field("created").unwrap_or(0)
                    + field("updated").unwrap_or(0)
                    + field("deleted").unwrap_or(0),
                total,
                field("created").unwrap_or(0),
                field("updated").unwrap_or(0),
                field("deleted").unwrap_or(0)
            ),
            None => status.to_string(),
        }
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
