use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Certificate, Client, ClientBuilder, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::conf::Endpoint;
use crate::error::ClusterError;
use crate::models::cluster_health::ClusterHealth;
use crate::models::recovery::{IndexStats, RecoveryRow};
use crate::models::server_info::ServerInfo;
use crate::models::snapshot::{RestoreRequest, SnapshotRepository};
use crate::models::task::{ReindexBody, ReindexOptions, TaskStatus, TaskSubmitted};

/// The cluster operations the migration consumes. One method per endpoint, no
/// retries: callers decide what a failure means.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn cluster_health(&self) -> Result<ClusterHealth, ClusterError>;

    /// Shard recoveries still in flight; empty when the cluster is idle.
    async fn active_recoveries(&self) -> Result<Vec<RecoveryRow>, ClusterError>;

    /// `Ok(false)` for any non-success answer, which the API uses for "absent".
    async fn repository_exists(&self, name: &str) -> Result<bool, ClusterError>;

    async fn put_repository(&self, repository: &SnapshotRepository) -> Result<(), ClusterError>;

    /// Submits the restore without waiting for it to finish.
    async fn restore_snapshot(
        &self,
        repository: &str,
        request: &RestoreRequest,
    ) -> Result<(), ClusterError>;

    /// `GET /<pattern>`: index name to `{settings, mappings, aliases}`.
    async fn get_indices(&self, pattern: &str) -> Result<Map<String, Value>, ClusterError>;

    async fn index_stats(&self, index: &str) -> Result<Option<IndexStats>, ClusterError>;

    async fn create_index(&self, name: &str, body: &Value) -> Result<(), ClusterError>;

    /// Submits an asynchronous reindex and returns its task id.
    async fn submit_reindex(
        &self,
        source: &str,
        dest: &str,
        options: &ReindexOptions,
    ) -> Result<String, ClusterError>;

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError>;

    /// Document count of `index`, refreshing it first when `refresh` is set.
    async fn count_documents(&self, index: &str, refresh: bool) -> Result<u64, ClusterError>;

    async fn delete_index(&self, name: &str) -> Result<(), ClusterError>;
}

#[derive(Debug, Clone)]
pub struct EsClient {
    endpoint: Endpoint,
    http_client: Client,
}

fn inject_auth(request_builder: RequestBuilder, endpoint: &Endpoint) -> RequestBuilder {
    if endpoint.has_basic_auth() {
        request_builder.basic_auth(endpoint.get_username(), endpoint.get_password())
    } else {
        request_builder
    }
}

pub fn build_reqwest_client(endpoint: &Endpoint) -> Result<Client, String> {
    let mut builder = ClientBuilder::new().timeout(endpoint.get_request_timeout());
    if endpoint.is_insecure() {
        warn!("--insecure disables TLS certificate verification for {}", endpoint.get_url());
        builder = builder.danger_accept_invalid_certs(true);
    }
    if let Some(path) = endpoint.get_root_certificates() {
        let certs = load_certificates(path)?;
        if certs.is_empty() {
            warn!("No PEM certificates found in {:?}; HTTPS may fail.", path);
        }
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }
    builder.build().map_err(|e| e.to_string())
}

fn load_certificates(path: &PathBuf) -> Result<Vec<Certificate>, String> {
    let mut certs = Vec::new();
    let entries = std::fs::read_dir(path)
        .map_err(|e| format!("failed to read certificates dir {:?}: {}", path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| e.to_string())?;
        let file_path = entry.path();
        if !file_path.is_file() {
            continue;
        }
        let content = match std::fs::read(&file_path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping certificate {:?}: {}", file_path, e);
                continue;
            }
        };
        if !String::from_utf8_lossy(&content).contains("-----BEGIN CERTIFICATE-----") {
            warn!("Skipping {:?}, no PEM certificate inside", file_path);
            continue;
        }
        match Certificate::from_pem(&content) {
            Ok(cert) => certs.push(cert),
            Err(e) => warn!("Skipping {:?}, not a PEM certificate: {}", file_path, e),
        }
    }
    Ok(certs)
}

impl EsClient {
    pub fn new(endpoint: Endpoint, http_client: Client) -> Self {
        Self {
            endpoint,
            http_client,
        }
    }

    pub fn from_endpoint(endpoint: Endpoint) -> Result<Self, String> {
        let http_client = build_reqwest_client(&endpoint)?;
        Ok(Self::new(endpoint, http_client))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request_builder = self
            .http_client
            .request(method, format!("{}{}", self.endpoint.get_url(), path));
        inject_auth(request_builder, &self.endpoint)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        request_builder: RequestBuilder,
    ) -> Result<Response, ClusterError> {
        debug!("{} {}", method, path);
        request_builder
            .send()
            .await
            .map_err(|source| ClusterError::Transport {
                method,
                path: path.to_string(),
                source,
            })
    }

    /// Sends the request and returns the body of a 2xx answer, or `ClusterError::Status`.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<String, ClusterError> {
        let mut request_builder = self.request(method.clone(), path);
        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }
        let response = self.send(method.clone(), path, request_builder).await?;
        read_success(method, path, response).await
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClusterError> {
        let text = self.call(method, path, body).await?;
        decode(path, &text)
    }

    pub async fn server_info(&self) -> Result<ServerInfo, ClusterError> {
        self.call_json(Method::GET, "/", None).await
    }

    pub async fn print_server_info(&self, prefix: &str) {
        match self.server_info().await {
            Ok(server_info) => {
                info!(
                    "{}: hostname={}, name={}, uuid={:?}, distribution={}, version={}, lucene={}",
                    prefix,
                    server_info.get_hostname(),
                    server_info.get_name(),
                    server_info.get_uuid(),
                    server_info.get_distribution(),
                    server_info.get_version(),
                    server_info.get_lucene_version()
                );
                if let Some(major) = server_info.get_version_major() {
                    if major < 6 && server_info.get_distribution() == "elasticsearch" {
                        warn!(
                            "{}: version {} is older than 6.x, task polling may not behave as expected",
                            prefix,
                            server_info.get_version()
                        );
                    }
                }
            }
            Err(err) => warn!("{}: failed to read server info: {}", prefix, err),
        }
    }
}

async fn read_success(
    method: Method,
    path: &str,
    response: Response,
) -> Result<String, ClusterError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|source| ClusterError::Transport {
            method: method.clone(),
            path: path.to_string(),
            source,
        })?;
    if !status.is_success() {
        return Err(ClusterError::Status {
            method,
            path: path.to_string(),
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

fn decode<T: DeserializeOwned>(path: &str, text: &str) -> Result<T, ClusterError> {
    serde_json::from_str(text).map_err(|e| ClusterError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl ClusterApi for EsClient {
    async fn cluster_health(&self) -> Result<ClusterHealth, ClusterError> {
        self.call_json(Method::GET, "/_cluster/health", None).await
    }

    async fn active_recoveries(&self) -> Result<Vec<RecoveryRow>, ClusterError> {
        let path = "/_cat/recovery?active_only=true&format=json";
        let text = self.call(Method::GET, path, None).await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        decode(path, &text)
    }

    async fn repository_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let path = format!("/_snapshot/{}", name);
        let request_builder = self.request(Method::GET, &path);
        let response = self.send(Method::GET, &path, request_builder).await?;
        let status = response.status();
        if !status.is_success() {
            debug!("Repository {} lookup answered {}", name, status);
        }
        Ok(status.is_success())
    }

    async fn put_repository(&self, repository: &SnapshotRepository) -> Result<(), ClusterError> {
        let path = format!("/_snapshot/{}", repository.name);
        self.call(Method::PUT, &path, Some(&repository.to_body()))
            .await
            .map(|_| ())
    }

    async fn restore_snapshot(
        &self,
        repository: &str,
        request: &RestoreRequest,
    ) -> Result<(), ClusterError> {
        let path = format!(
            "/_snapshot/{}/{}/_restore?wait_for_completion=false",
            repository, request.snapshot
        );
        let body = serde_json::to_value(request.to_body()).map_err(|e| ClusterError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        self.call(Method::POST, &path, Some(&body)).await.map(|_| ())
    }

    async fn get_indices(&self, pattern: &str) -> Result<Map<String, Value>, ClusterError> {
        self.call_json(Method::GET, &format!("/{}", pattern), None)
            .await
    }

    async fn index_stats(&self, index: &str) -> Result<Option<IndexStats>, ClusterError> {
        let path = format!(
            "/_cat/indices/{}?format=json&bytes=b&h=index,docs.count,store.size",
            index
        );
        let rows: Vec<IndexStats> = self.call_json(Method::GET, &path, None).await?;
        Ok(rows.into_iter().find(|row| row.index == index))
    }

    async fn create_index(&self, name: &str, body: &Value) -> Result<(), ClusterError> {
        self.call(Method::PUT, &format!("/{}", name), Some(body))
            .await
            .map(|_| ())
    }

    async fn submit_reindex(
        &self,
        source: &str,
        dest: &str,
        options: &ReindexOptions,
    ) -> Result<String, ClusterError> {
        let path = "/_reindex";
        let request_builder = self
            .request(Method::POST, path)
            .query(&options.query())
            .json(&ReindexBody::new(source, dest));
        let response = self.send(Method::POST, path, request_builder).await?;
        let text = read_success(Method::POST, path, response).await?;
        let submitted: TaskSubmitted = decode(path, &text)?;
        Ok(submitted.task)
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ClusterError> {
        self.call_json(Method::GET, &format!("/_tasks/{}", task_id), None)
            .await
    }

    async fn count_documents(&self, index: &str, refresh: bool) -> Result<u64, ClusterError> {
        if refresh {
            self.call(Method::POST, &format!("/{}/_refresh", index), None)
                .await?;
        }
        let path = format!("/{}/_count", index);
        let value: Value = self.call_json(Method::GET, &path, None).await?;
        value
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ClusterError::Decode {
                path,
                reason: "missing `count`".to_string(),
            })
    }

    async fn delete_index(&self, name: &str) -> Result<(), ClusterError> {
        self.call(Method::DELETE, &format!("/{}", name), None)
            .await
            .map(|_| ())
    }
}
