//! Batch driver: discover staging indices and migrate them one after another.

use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::audit::{AuditTrail, What};
use crate::error::MigrateError;
use crate::es_client::ClusterApi;
use crate::health::{HealthGate, WaitFor};
use crate::migrate::{destination_name, IndexMigrator, MigrationOutcome, OutcomeStatus};
use crate::models::index_meta::StagingIndex;
use crate::shutdown::Shutdown;

/// True when the index, with or without the staging prefix, starts with `marker`.
pub fn is_system_index(name: &str, prefix: &str, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    let original = name.strip_prefix(prefix).unwrap_or(name);
    name.starts_with(marker) || original.starts_with(marker)
}

/// Maps a restore selector (`logs-*,-.*`) onto the renamed staging indices.
pub fn staging_pattern(selector: &str, prefix: &str) -> String {
    let parts: Vec<String> = selector
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix('-') {
            Some(excluded) => format!("-{}{}", prefix, excluded),
            None => format!("{}{}", prefix, part),
        })
        .collect();
    if parts.iter().all(|part| part.starts_with('-')) {
        let mut with_all = vec![format!("{}*", prefix)];
        with_all.extend(parts);
        return with_all.join(",");
    }
    parts.join(",")
}

/// Keeps the prefixed, non-system entries of a `GET /<pattern>` listing, in listing order.
pub fn select_staging(listing: Map<String, Value>, prefix: &str, marker: &str) -> Vec<StagingIndex> {
    StagingIndex::from_listing(listing)
        .into_iter()
        .filter(|index| {
            if is_system_index(&index.name, prefix, marker) {
                info!(index = %index.name, "Skipping system index");
                return false;
            }
            if destination_name(&index.name, prefix).is_none() {
                warn!(index = %index.name, "Skipping index without the staging prefix {:?}", prefix);
                return false;
            }
            true
        })
        .collect()
}

pub struct BatchDriver<'a, C: ?Sized> {
    cluster: &'a C,
    gate: &'a HealthGate<'a, C>,
    migrator: &'a IndexMigrator<'a, C>,
    before_each_index: WaitFor,
    shutdown: &'a Shutdown,
    audit: &'a AuditTrail,
}

impl<'a, C: ClusterApi + ?Sized> BatchDriver<'a, C> {
    pub fn new(
        cluster: &'a C,
        gate: &'a HealthGate<'a, C>,
        migrator: &'a IndexMigrator<'a, C>,
        before_each_index: WaitFor,
        shutdown: &'a Shutdown,
        audit: &'a AuditTrail,
    ) -> Self {
        Self {
            cluster,
            gate,
            migrator,
            before_each_index,
            shutdown,
            audit,
        }
    }

    /// Lists the staging indices to migrate. A failed listing aborts the run.
    /// A 404 means a concrete name matched nothing: fatal right after a
    /// restore, an empty batch when `restored` is false.
    pub async fn discover(
        &self,
        selector: &str,
        prefix: &str,
        marker: &str,
        restored: bool,
    ) -> Result<Vec<StagingIndex>, MigrateError> {
        let pattern = staging_pattern(selector, prefix);
        info!("Discovering staging indices matching {}", pattern);
        let listing = match self.cluster.get_indices(&pattern).await {
            Ok(listing) => listing,
            Err(err) if err.is_not_found() && !restored => {
                warn!("No index matches {}", pattern);
                Map::new()
            }
            Err(source) => return Err(MigrateError::Discovery { pattern, source }),
        };
        let discovered = listing.len();
        let staging = select_staging(listing, prefix, marker);
        info!(
            "Found {} staging indices, {} selected for migration",
            discovered,
            staging.len()
        );
        self.audit
            .record(
                What::StagingDiscovered,
                json!({
                    "pattern": pattern,
                    "indices": staging.iter().map(|index| index.name.as_str()).collect::<Vec<_>>(),
                }),
            )
            .await;
        Ok(staging)
    }

    /// Migrates `staging` sequentially. Per-index failures are recorded and the
    /// batch continues; a health gate that gives up or a shutdown request ends it.
    pub async fn run(
        &self,
        staging: Vec<StagingIndex>,
    ) -> Result<Vec<MigrationOutcome>, MigrateError> {
        let total = staging.len();
        let mut outcomes = Vec::with_capacity(total);
        for (position, index) in staging.into_iter().enumerate() {
            if self.shutdown.is_triggered() {
                warn!(
                    "Shutdown requested, {} of {} indices not attempted",
                    total - position,
                    total
                );
                break;
            }
            info!(index = %index.name, "Migrating index {}/{}", position + 1, total);
            if let Err(err) = self.gate.wait_for(self.before_each_index).await {
                error!(index = %index.name, "Health gate failed before migration: {}", err);
                summarize(&outcomes);
                return Err(err.into());
            }
            let outcome = self.migrator.migrate(index).await;
            self.audit.record_outcome(&outcome).await;
            let interrupted = matches!(outcome.status, OutcomeStatus::Interrupted { .. });
            outcomes.push(outcome);
            if interrupted {
                break;
            }
        }
        summarize(&outcomes);
        Ok(outcomes)
    }
}

/// Logs one line per index and the totals.
pub fn summarize(outcomes: &[MigrationOutcome]) {
    let succeeded = outcomes.iter().filter(|outcome| outcome.is_success()).count();
    for outcome in outcomes {
        let detail = match &outcome.status {
            OutcomeStatus::Succeeded { staging_deleted } => {
                if *staging_deleted {
                    "staging deleted".to_string()
                } else {
                    "staging kept".to_string()
                }
            }
            OutcomeStatus::FailedAtCreate { detail }
            | OutcomeStatus::FailedAtReindex { detail }
            | OutcomeStatus::FailedAtDelete { detail }
            | OutcomeStatus::Interrupted { detail } => detail.clone(),
        };
        if outcome.is_success() {
            info!(
                "  {} -> {}: {} ({})",
                outcome.staging,
                outcome.destination,
                outcome.label(),
                detail
            );
        } else {
            warn!(
                "  {} -> {}: {} ({})",
                outcome.staging,
                outcome.destination,
                outcome.label(),
                detail
            );
        }
    }
    info!(
        "Migration finished: {} succeeded, {} failed, {} total",
        succeeded,
        outcomes.len() - succeeded,
        outcomes.len()
    );
}
