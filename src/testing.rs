//! Scripted in-memory cluster for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};

use crate::error::ClusterError;
use crate::es_client::ClusterApi;
use crate::models::cluster_health::{ClusterHealth, HealthStatus};
use crate::models::recovery::{IndexStats, RecoveryRow};
use crate::models::snapshot::{RestoreRequest, SnapshotRepository};
use crate::models::task::{ReindexOptions, TaskStatus};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    health: VecDeque<Result<ClusterHealth, ClusterError>>,
    recoveries: VecDeque<Result<Vec<RecoveryRow>, ClusterError>>,
    repository_exists: Option<bool>,
    put_repository_failure: Option<u16>,
    restore_failure: Option<u16>,
    indices: Map<String, Value>,
    indices_failure: Option<u16>,
    create_failures: HashMap<String, u16>,
    created: Vec<(String, Value)>,
    reindex_failures: HashMap<String, u16>,
    tasks: HashMap<String, VecDeque<Result<TaskStatus, ClusterError>>>,
    counts: HashMap<String, u64>,
    delete_failures: HashMap<String, u16>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_error(method: &str, path: &str, status: u16) -> ClusterError {
        ClusterError::Status {
            method: Method::from_bytes(method.as_bytes()).unwrap(),
            path: path.to_string(),
            status,
            body: format!("{{\"status\":{}}}", status),
        }
    }

    pub fn task_id_for(source: &str) -> String {
        format!("node-1:{}", source)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls of one operation, e.g. `count("delete_index")`.
    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    pub fn created_body(&self, name: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .created
            .iter()
            .find(|(created, _)| created == name)
            .map(|(_, body)| body.clone())
    }

    pub fn push_health(&self, health: Result<ClusterHealth, ClusterError>) {
        self.state.lock().unwrap().health.push_back(health);
    }

    pub fn push_recoveries(&self, rows: Result<Vec<RecoveryRow>, ClusterError>) {
        self.state.lock().unwrap().recoveries.push_back(rows);
    }

    pub fn set_repository_exists(&self, exists: bool) {
        self.state.lock().unwrap().repository_exists = Some(exists);
    }

    pub fn fail_put_repository(&self, status: u16) {
        self.state.lock().unwrap().put_repository_failure = Some(status);
    }

    pub fn fail_restore(&self, status: u16) {
        self.state.lock().unwrap().restore_failure = Some(status);
    }

    pub fn add_index(&self, name: &str, payload: Value) {
        self.state
            .lock()
            .unwrap()
            .indices
            .insert(name.to_string(), payload);
    }

    pub fn fail_indices(&self, status: u16) {
        self.state.lock().unwrap().indices_failure = Some(status);
    }

    pub fn fail_create(&self, name: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .insert(name.to_string(), status);
    }

    pub fn fail_reindex(&self, source: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .reindex_failures
            .insert(source.to_string(), status);
    }

    /// Queues task answers; once drained the task reports completed without error.
    pub fn push_task(&self, task_id: &str, status: Result<TaskStatus, ClusterError>) {
        self.state
            .lock()
            .unwrap()
            .tasks
            .entry(task_id.to_string())
            .or_default()
            .push_back(status);
    }

    pub fn set_count(&self, index: &str, count: u64) {
        self.state
            .lock()
            .unwrap()
            .counts
            .insert(index.to_string(), count);
    }

    pub fn fail_delete(&self, name: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(name.to_string(), status);
    }
}

pub fn green() -> ClusterHealth {
    ClusterHealth {
        status: HealthStatus::Green,
        initializing_shards: 0,
        unassigned_shards: 0,
        relocating_shards: 0,
    }
}

pub fn task(completed: bool, error: Option<Value>) -> TaskStatus {
    TaskStatus {
        completed,
        error,
        task: None,
        response: None,
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn cluster_health(&self) -> Result<ClusterHealth, ClusterError> {
        self.record("cluster_health".to_string());
        self.state
            .lock()
            .unwrap()
            .health
            .pop_front()
            .unwrap_or_else(|| Ok(green()))
    }

    async fn active_recoveries(&self) -> Result<Vec<RecoveryRow>, ClusterError> {
        self.record("active_recoveries".to_string());
        self.state
            .lock()
            .unwrap()
            .recoveries
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn repository_exists(&self, name: &str) -> Result<bool, ClusterError> {
        self.record(format!("repository_exists {}", name));
        Ok(self.state.lock().unwrap().repository_exists.unwrap_or(true))
    }

    async fn put_repository(&self, repository: &SnapshotRepository) -> Result<(), ClusterError> {
        self.record(format!("put_repository {}", repository.name));
        match self.state.lock().unwrap().put_repository_failure {
            Some(status) => Err(Self::status_error(
                "PUT",
                &format!("/_snapshot/{}", repository.name),
                status,
            )),
            None => Ok(()),
        }
    }

    async fn restore_snapshot(
        &self,
        repository: &str,
        request: &RestoreRequest,
    ) -> Result<(), ClusterError> {
        self.record(format!("restore_snapshot {}/{}", repository, request.snapshot));
        match self.state.lock().unwrap().restore_failure {
            Some(status) => Err(Self::status_error("POST", "/_restore", status)),
            None => Ok(()),
        }
    }

    async fn get_indices(&self, pattern: &str) -> Result<Map<String, Value>, ClusterError> {
        self.record(format!("get_indices {}", pattern));
        let state = self.state.lock().unwrap();
        match state.indices_failure {
            Some(status) => Err(Self::status_error("GET", &format!("/{}", pattern), status)),
            None => Ok(state.indices.clone()),
        }
    }

    async fn index_stats(&self, index: &str) -> Result<Option<IndexStats>, ClusterError> {
        self.record(format!("index_stats {}", index));
        Ok(None)
    }

    async fn create_index(&self, name: &str, body: &Value) -> Result<(), ClusterError> {
        self.record(format!("create_index {}", name));
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.create_failures.get(name) {
            return Err(Self::status_error("PUT", &format!("/{}", name), *status));
        }
        state.created.push((name.to_string(), body.clone()));
        Ok(())
    }

    async fn submit_reindex(
        &self,
        source: &str,
        dest: &str,
        _options: &ReindexOptions,
    ) -> Result<String, ClusterError> {
        self.record(format!("submit_reindex {} {}", source, dest));
        match self.state.lock().unwrap().reindex_failures.get(source) {
            Some(status) => Err(Self::status_error("POST", "/_reindex", *status)),
            None => Ok(Self::task_id_for(source)),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError> {
        self.record(format!("task_status {}", task_id));
        self.state
            .lock()
            .unwrap()
            .tasks
            .get_mut(task_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(task(true, None)))
    }

    async fn count_documents(&self, index: &str, _refresh: bool) -> Result<u64, ClusterError> {
        self.record(format!("count_documents {}", index));
        Ok(*self.state.lock().unwrap().counts.get(index).unwrap_or(&10))
    }

    async fn delete_index(&self, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete_index {}", name));
        match self.state.lock().unwrap().delete_failures.get(name) {
            Some(status) => Err(Self::status_error("DELETE", &format!("/{}", name), *status)),
            None => Ok(()),
        }
    }
}
