use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use twelf::{config, Layer};

use crate::error::MigrateError;
use crate::health::{PollPolicy, WaitFor};
use crate::models::snapshot::{RestoreRequest, SnapshotRepository};
use crate::models::task::ReindexOptions;
use crate::utils::{endpoint_url, wildcard_match};

pub const ENV_PREFIX: &str = "ES_MIGRATE_";
const REDACTED_VALUE: &str = "***";

/// Keys under `settings.index` that the server assigns itself and rejects on index creation.
pub const DEFAULT_SETTINGS_DENYLIST: [&str; 6] = [
    "creation_date",
    "provided_name",
    "uuid",
    "version",
    "blocks",
    "resize",
];

const DEFAULT_REPOSITORY: &str = "az_repo";
const DEFAULT_REPOSITORY_TYPE: &str = "azure";
const DEFAULT_CONTAINER: &str = "snapshots";
const DEFAULT_SNAPSHOT: &str = "snapshot_1";
const DEFAULT_RENAME_PREFIX: &str = "restored-";
const DEFAULT_SYSTEM_MARKER: &str = ".";
const DEFAULT_POLL_SECONDS: u64 = 60;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

#[derive(Parser, Debug, Default)]
#[command(
    name = "es-snapshot-migrate",
    version,
    about = "Restore a snapshot into staging indices and reindex them under their original names"
)]
pub struct Args {
    /// Optional TOML file with the full run configuration
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    #[arg(short = 'u', long = "user", env = "ES_USER")]
    pub user: Option<String>,
    #[arg(short = 'p', long = "password", env = "ES_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Cluster host (https://<host>:9200) or full URL
    #[arg(short = 'a', long = "address", value_name = "HOST")]
    pub address: Option<String>,
    /// Index selector restored from the snapshot
    #[arg(short = 'i', long = "indices", value_name = "WILDCARD")]
    pub indices: Option<String>,
    /// Override number_of_shards of every destination index
    #[arg(short = 's', long = "shards", value_name = "COUNT")]
    pub shards: Option<u64>,
    #[arg(long)]
    pub snapshot: Option<String>,
    #[arg(long)]
    pub repository: Option<String>,
    #[arg(long = "rename-prefix", value_name = "PREFIX")]
    pub rename_prefix: Option<String>,
    /// Disable TLS certificate verification
    #[arg(long)]
    pub insecure: bool,
    #[arg(long = "root-certificates", alias = "ca-path", value_name = "DIR")]
    pub root_certificates: Option<PathBuf>,
    /// Delete each staging index once its copy is complete
    #[arg(long = "delete-staging")]
    pub delete_staging: bool,
    /// Skip the document count comparison before deleting staging indices
    #[arg(long = "skip-verify")]
    pub skip_verify: bool,
    /// Do not restore; migrate staging indices that already exist
    #[arg(long = "skip-restore")]
    pub skip_restore: bool,
    #[arg(long = "audit-file", value_name = "PATH")]
    pub audit_file: Option<PathBuf>,
    #[arg(long = "health-interval", value_name = "SECONDS")]
    pub health_interval: Option<u64>,
    #[arg(long = "task-interval", value_name = "SECONDS")]
    pub task_interval: Option<u64>,
    #[arg(long = "max-health-wait", value_name = "SECONDS")]
    pub max_health_wait: Option<u64>,
    /// Condition that ends the post-restore wait: green, recovery_idle or both
    #[arg(long = "settle-on", value_name = "CONDITION")]
    pub settle_on: Option<WaitFor>,
}

/// Settings read from the TOML file and `ES_MIGRATE_*` environment variables.
#[config]
#[derive(Debug, Default)]
pub struct FileConfig {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    insecure: Option<bool>,
    #[serde(default)]
    root_certificates: Option<PathBuf>,
    #[serde(default)]
    request_timeout_secs: Option<u64>,
    #[serde(default)]
    repository_name: Option<String>,
    #[serde(default)]
    repository_type: Option<String>,
    #[serde(default)]
    repository_readonly: Option<bool>,
    #[serde(default)]
    repository_settings: Option<Map<String, Value>>,
    #[serde(default)]
    snapshot: Option<String>,
    #[serde(default)]
    indices: Option<String>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    ignore_index_settings: Option<Vec<String>>,
    #[serde(default)]
    rename_prefix: Option<String>,
    #[serde(default)]
    system_index_marker: Option<String>,
    #[serde(default)]
    number_of_shards: Option<u64>,
    #[serde(default)]
    settings_denylist: Option<Vec<String>>,
    #[serde(default)]
    settings_overrides: Vec<SettingsOverride>,
    #[serde(default)]
    delete_staging: Option<bool>,
    #[serde(default)]
    verify_doc_count: Option<bool>,
    #[serde(default)]
    skip_restore: Option<bool>,
    #[serde(default)]
    health_interval_secs: Option<u64>,
    #[serde(default)]
    task_interval_secs: Option<u64>,
    #[serde(default)]
    max_health_wait_secs: Option<u64>,
    #[serde(default)]
    settle_on: Option<WaitFor>,
    #[serde(default)]
    wait_before_index: Option<WaitFor>,
    #[serde(default)]
    reindex: Option<ReindexOptions>,
    #[serde(default)]
    audit_file: Option<PathBuf>,
}

/// Settings merged into `settings.index` of every destination whose name matches `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsOverride {
    pub index: String,
    pub settings: Value,
}

impl SettingsOverride {
    pub fn matches(&self, destination: &str) -> bool {
        wildcard_match(destination, &self.index)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BasicAuth {
    username: String,
    #[serde(default)]
    password: Option<String>,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| REDACTED_VALUE))
            .finish()
    }
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
    pub fn get_username(&self) -> &String {
        &self.username
    }
    pub fn get_password(&self) -> &Option<String> {
        &self.password
    }
}

/// Where the cluster lives and how to talk to it.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: String,
    basic_auth: Option<BasicAuth>,
    root_certificates: Option<PathBuf>,
    insecure: bool,
    request_timeout: Duration,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, basic_auth: Option<BasicAuth>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            basic_auth,
            root_certificates: None,
            insecure: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
        }
    }

    pub fn with_tls(mut self, root_certificates: Option<PathBuf>, insecure: bool) -> Self {
        self.root_certificates = root_certificates;
        self.insecure = insecure;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn get_url(&self) -> &String {
        &self.url
    }
    pub fn get_root_certificates(&self) -> &Option<PathBuf> {
        &self.root_certificates
    }
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
    pub fn get_request_timeout(&self) -> Duration {
        self.request_timeout
    }
    pub fn has_basic_auth(&self) -> bool {
        self.basic_auth.is_some()
    }
    pub fn get_username(&self) -> String {
        if let Some(basic_auth) = &self.basic_auth {
            basic_auth.get_username().clone()
        } else {
            String::default()
        }
    }
    pub fn get_password(&self) -> Option<String> {
        if let Some(basic_auth) = &self.basic_auth {
            return basic_auth.get_password().clone();
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub policy: PollPolicy,
    /// Ends the wait after the restore submission.
    pub settle_on: WaitFor,
    /// Checked before each index is migrated.
    pub before_each_index: WaitFor,
}

/// Everything the per-index step needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSettings {
    pub rename_prefix: String,
    pub settings_denylist: Vec<String>,
    pub number_of_shards: Option<u64>,
    pub settings_overrides: Vec<SettingsOverride>,
    pub delete_staging: bool,
    pub verify_doc_count: bool,
    pub task_poll: PollPolicy,
    pub reindex: ReindexOptions,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            rename_prefix: DEFAULT_RENAME_PREFIX.to_string(),
            settings_denylist: DEFAULT_SETTINGS_DENYLIST
                .iter()
                .map(|key| key.to_string())
                .collect(),
            number_of_shards: None,
            settings_overrides: Vec::new(),
            delete_staging: false,
            verify_doc_count: true,
            task_poll: PollPolicy::every(Duration::from_secs(DEFAULT_POLL_SECONDS)),
            reindex: ReindexOptions::default(),
        }
    }
}

/// The whole run, resolved once at startup.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub endpoint: Endpoint,
    pub repository: SnapshotRepository,
    pub restore: RestoreRequest,
    pub skip_restore: bool,
    pub system_index_marker: String,
    pub health: HealthSettings,
    pub migration: MigrationSettings,
    pub audit_file: Option<PathBuf>,
}

impl FileConfig {
    /// Loads the optional TOML file, then `ES_MIGRATE_*` variables on top.
    pub fn load(path: Option<&PathBuf>) -> Result<Self, MigrateError> {
        let mut layers = Vec::new();
        if let Some(path) = path {
            layers.push(Layer::Toml(path.clone()));
        }
        layers.push(Layer::Env(Some(ENV_PREFIX.to_string())));
        FileConfig::with_layers(&layers).map_err(|e| {
            MigrateError::Config(format!("failed to load configuration {:?}: {}", path, e))
        })
    }
}

fn seconds(value: u64, name: &str) -> Result<Duration, MigrateError> {
    if value == 0 {
        return Err(MigrateError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(Duration::from_secs(value))
}

fn required(value: Option<String>, what: &str) -> Result<String, MigrateError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(MigrateError::Config(format!("{} is required", what))),
    }
}

impl MigrationConfig {
    pub fn resolve(args: Args) -> Result<Self, MigrateError> {
        let file = FileConfig::load(args.config.as_ref())?;
        Self::from_sources(args, file)
    }

    /// Merges CLI arguments over file/env settings over defaults.
    pub fn from_sources(args: Args, file: FileConfig) -> Result<Self, MigrateError> {
        let url = match args.address.as_deref() {
            Some(address) => endpoint_url(address),
            None => required(file.url, "cluster address (-a/--address or url)")?,
        };
        let username = required(args.user.or(file.username), "user (-u/--user)")?;
        let password = required(args.password.or(file.password), "password (-p/--password)")?;
        let request_timeout = seconds(
            file.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            "request_timeout_secs",
        )?;
        let endpoint = Endpoint::new(url, Some(BasicAuth::new(username, Some(password))))
            .with_tls(
                args.root_certificates.or(file.root_certificates),
                args.insecure || file.insecure.unwrap_or(false),
            )
            .with_request_timeout(request_timeout);

        let repository = SnapshotRepository {
            name: required(
                Some(
                    args.repository
                        .or(file.repository_name)
                        .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string()),
                ),
                "repository name",
            )?,
            repo_type: file
                .repository_type
                .unwrap_or_else(|| DEFAULT_REPOSITORY_TYPE.to_string()),
            settings: file.repository_settings.unwrap_or_else(|| {
                let mut settings = Map::new();
                settings.insert(
                    "container".to_string(),
                    Value::String(DEFAULT_CONTAINER.to_string()),
                );
                settings
            }),
            readonly: file.repository_readonly.unwrap_or(true),
        };

        let rename_prefix = args
            .rename_prefix
            .or(file.rename_prefix)
            .unwrap_or_else(|| DEFAULT_RENAME_PREFIX.to_string());
        if rename_prefix.is_empty() {
            return Err(MigrateError::Config(
                "rename prefix must not be empty, staging and destination names would collide"
                    .to_string(),
            ));
        }

        let restore = RestoreRequest {
            snapshot: required(
                Some(
                    args.snapshot
                        .or(file.snapshot)
                        .unwrap_or_else(|| DEFAULT_SNAPSHOT.to_string()),
                ),
                "snapshot name",
            )?,
            indices: args
                .indices
                .or(file.indices)
                .unwrap_or_else(|| "*".to_string()),
            exclusions: file.exclude.unwrap_or_else(|| vec![".*".to_string()]),
            ignore_index_settings: file
                .ignore_index_settings
                .unwrap_or_else(|| vec!["index.search*".to_string()]),
            rename_prefix: rename_prefix.clone(),
        };

        for item in &file.settings_overrides {
            if item.index.trim().is_empty() || !item.settings.is_object() {
                return Err(MigrateError::Config(format!(
                    "settings override {:?} needs a non-empty index pattern and a settings table",
                    item.index
                )));
            }
        }

        let health_interval = seconds(
            args.health_interval
                .or(file.health_interval_secs)
                .unwrap_or(DEFAULT_POLL_SECONDS),
            "health interval",
        )?;
        let max_health_wait = match args.max_health_wait.or(file.max_health_wait_secs) {
            Some(value) => Some(seconds(value, "max health wait")?),
            None => None,
        };
        let task_interval = seconds(
            args.task_interval
                .or(file.task_interval_secs)
                .unwrap_or(DEFAULT_POLL_SECONDS),
            "task interval",
        )?;

        let migration = MigrationSettings {
            rename_prefix,
            settings_denylist: file.settings_denylist.unwrap_or_else(|| {
                DEFAULT_SETTINGS_DENYLIST
                    .iter()
                    .map(|key| key.to_string())
                    .collect()
            }),
            number_of_shards: args.shards.or(file.number_of_shards),
            settings_overrides: file.settings_overrides,
            delete_staging: args.delete_staging || file.delete_staging.unwrap_or(false),
            verify_doc_count: !args.skip_verify && file.verify_doc_count.unwrap_or(true),
            task_poll: PollPolicy::every(task_interval),
            reindex: file.reindex.unwrap_or_default(),
        };

        if migration.number_of_shards == Some(0) {
            return Err(MigrateError::Config(
                "number of shards must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            repository,
            restore,
            skip_restore: args.skip_restore || file.skip_restore.unwrap_or(false),
            system_index_marker: file
                .system_index_marker
                .unwrap_or_else(|| DEFAULT_SYSTEM_MARKER.to_string()),
            health: HealthSettings {
                policy: PollPolicy::every(health_interval).with_max_wait(max_health_wait),
                settle_on: args.settle_on.or(file.settle_on).unwrap_or(WaitFor::Both),
                before_each_index: file.wait_before_index.unwrap_or(WaitFor::Green),
            },
            migration,
            audit_file: args.audit_file.or(file.audit_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn minimal_args() -> Args {
        Args::parse_from(["es-snapshot-migrate", "-u", "elastic", "-p", "secret", "-a", "es01"])
    }

    #[test]
    fn cli_flags_match_the_operational_script() {
        let args = Args::parse_from([
            "es-snapshot-migrate",
            "-u",
            "elastic",
            "-p",
            "secret",
            "-a",
            "es01",
            "-i",
            "logs-*",
            "-s",
            "4",
        ]);
        assert_eq!(args.user.as_deref(), Some("elastic"));
        assert_eq!(args.address.as_deref(), Some("es01"));
        assert_eq!(args.indices.as_deref(), Some("logs-*"));
        assert_eq!(args.shards, Some(4));
        assert!(!args.delete_staging);
    }

    #[test]
    fn defaults_are_safe() {
        let config = MigrationConfig::from_sources(minimal_args(), FileConfig::default()).unwrap();

        assert_eq!(config.endpoint.get_url(), "https://es01:9200");
        assert_eq!(config.endpoint.get_username(), "elastic");
        assert!(!config.endpoint.is_insecure());
        assert_eq!(config.repository.name, "az_repo");
        assert_eq!(config.repository.settings["container"], json!("snapshots"));
        assert!(config.repository.readonly);
        assert_eq!(config.restore.selector(), "*,-.*");
        assert_eq!(config.restore.rename_prefix, "restored-");
        assert_eq!(config.system_index_marker, ".");
        assert!(!config.migration.delete_staging);
        assert!(config.migration.verify_doc_count);
        assert_eq!(config.migration.number_of_shards, None);
        assert_eq!(config.migration.settings_denylist.len(), 6);
        assert_eq!(config.health.policy.interval, Duration::from_secs(60));
        assert_eq!(config.health.policy.max_wait, None);
        assert_eq!(config.health.settle_on, WaitFor::Both);
        assert_eq!(config.health.before_each_index, WaitFor::Green);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let args = Args::parse_from(["es-snapshot-migrate", "-a", "es01", "-u", "elastic"]);
        let mut args = args;
        args.password = None;
        let err = MigrationConfig::from_sources(args, FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let mut args = minimal_args();
        args.rename_prefix = Some(String::new());
        assert!(MigrationConfig::from_sources(args, FileConfig::default()).is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut args = minimal_args();
        args.task_interval = Some(0);
        assert!(MigrationConfig::from_sources(args, FileConfig::default()).is_err());
    }

    #[test]
    fn password_is_redacted_in_debug_output() {
        let config = MigrationConfig::from_sources(minimal_args(), FileConfig::default()).unwrap();
        let debug = format!("{:?}", config.endpoint);
        assert!(!debug.contains("secret"));
        assert!(debug.contains(REDACTED_VALUE));
    }

    #[test]
    fn toml_file_is_layered_under_cli() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
url = "https://dr-cluster:9200"
username = "from-file"
password = "file-secret"
snapshot = "nightly"
number_of_shards = 2
delete_staging = true
task_interval_secs = 15
settle_on = "recovery_idle"

[repository_settings]
container = "dr-snapshots"
account = "backup"

[[settings_overrides]]
index = "nyt-4"
settings = {{ mapping = {{ nested_objects = {{ limit = 100000 }} }} }}

[reindex]
slices = "auto"
"#
        )
        .unwrap();

        let args = Args::parse_from([
            "es-snapshot-migrate",
            "-c",
            file.path().to_str().unwrap(),
            "-u",
            "elastic",
            "-s",
            "4",
        ]);
        let file_config = FileConfig::load(args.config.as_ref()).unwrap();
        let config = MigrationConfig::from_sources(args, file_config).unwrap();

        assert_eq!(config.endpoint.get_url(), "https://dr-cluster:9200");
        assert_eq!(config.endpoint.get_username(), "elastic");
        assert_eq!(config.endpoint.get_password().as_deref(), Some("file-secret"));
        assert_eq!(config.restore.snapshot, "nightly");
        assert_eq!(config.migration.number_of_shards, Some(4));
        assert!(config.migration.delete_staging);
        assert_eq!(config.migration.task_poll.interval, Duration::from_secs(15));
        assert_eq!(config.health.settle_on, WaitFor::RecoveryIdle);
        assert_eq!(config.repository.settings["account"], json!("backup"));
        assert_eq!(config.migration.reindex.slices.as_deref(), Some("auto"));
        assert_eq!(config.migration.settings_overrides.len(), 1);
        assert!(config.migration.settings_overrides[0].matches("nyt-4"));
        assert_eq!(
            config.migration.settings_overrides[0].settings,
            json!({ "mapping": { "nested_objects": { "limit": 100000 } } })
        );
    }
}
