//! Snapshot restore coordinator.
//!
//! Runs the front half of the run once: make sure the repository is
//! registered, submit the restore under the staging prefix and wait for the
//! cluster to settle. Every failure here is fatal.

use std::fmt;

use serde_json::json;
use tracing::{error, info};

use crate::audit::{AuditTrail, What};
use crate::error::MigrateError;
use crate::es_client::ClusterApi;
use crate::health::{HealthGate, WaitFor};
use crate::models::snapshot::{RestoreRequest, SnapshotRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NoRepo,
    RepoEnsured,
    RestoreSubmitted,
    RestoreSettled,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            RunPhase::NoRepo => "no-repo",
            RunPhase::RepoEnsured => "repo-ensured",
            RunPhase::RestoreSubmitted => "restore-submitted",
            RunPhase::RestoreSettled => "restore-settled",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Existing,
    Created,
}

pub struct RestoreCoordinator<'a, C: ?Sized> {
    cluster: &'a C,
    audit: &'a AuditTrail,
    phase: RunPhase,
}

impl<'a, C: ClusterApi + ?Sized> RestoreCoordinator<'a, C> {
    pub fn new(cluster: &'a C, audit: &'a AuditTrail) -> Self {
        Self {
            cluster,
            audit,
            phase: RunPhase::NoRepo,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn advance(&mut self, next: RunPhase) {
        info!("Run phase {} -> {}", self.phase, next);
        self.phase = next;
    }

    pub async fn ensure_repository(
        &mut self,
        repository: &SnapshotRepository,
    ) -> Result<RepositoryState, MigrateError> {
        let state = match self.cluster.repository_exists(&repository.name).await {
            Ok(true) => {
                info!("Snapshot repository {} already exists", repository.name);
                RepositoryState::Existing
            }
            Ok(false) => {
                info!(
                    "Creating snapshot repository {} (type={}, readonly={})",
                    repository.name, repository.repo_type, repository.readonly
                );
                if let Err(source) = self.cluster.put_repository(repository).await {
                    error!(
                        status = ?source.status(),
                        "Failed to create snapshot repository {}. {}",
                        repository.name,
                        source
                    );
                    return Err(MigrateError::Repository {
                        name: repository.name.clone(),
                        source,
                    });
                }
                RepositoryState::Created
            }
            Err(source) => {
                return Err(MigrateError::Repository {
                    name: repository.name.clone(),
                    source,
                })
            }
        };
        self.advance(RunPhase::RepoEnsured);
        self.audit
            .record(
                What::RepositoryEnsured,
                json!({
                    "repository": repository.name,
                    "created": state == RepositoryState::Created,
                }),
            )
            .await;
        Ok(state)
    }

    /// Submits the restore without waiting for completion.
    pub async fn submit_restore(
        &mut self,
        repository: &str,
        request: &RestoreRequest,
    ) -> Result<(), MigrateError> {
        info!(
            "Restoring snapshot {} from {} (indices={}, rename prefix={})",
            request.snapshot,
            repository,
            request.selector(),
            request.rename_prefix
        );
        if let Err(source) = self.cluster.restore_snapshot(repository, request).await {
            error!(
                status = ?source.status(),
                "Restore of snapshot {} was rejected. {}",
                request.snapshot,
                source
            );
            return Err(MigrateError::RestoreRejected {
                snapshot: request.snapshot.clone(),
                source,
            });
        }
        self.advance(RunPhase::RestoreSubmitted);
        self.audit
            .record(
                What::RestoreSubmitted,
                json!({
                    "repository": repository,
                    "snapshot": request.snapshot,
                    "indices": request.selector(),
                }),
            )
            .await;
        Ok(())
    }

    /// Ensure, submit, then block on `gate` until `settle_on` holds.
    pub async fn restore_and_settle(
        &mut self,
        repository: &SnapshotRepository,
        request: &RestoreRequest,
        gate: &HealthGate<'_, C>,
        settle_on: WaitFor,
    ) -> Result<(), MigrateError> {
        self.ensure_repository(repository).await?;
        self.submit_restore(&repository.name, request).await?;
        let report = gate.wait_for(settle_on).await?;
        self.advance(RunPhase::RestoreSettled);
        self.audit
            .record(
                What::RestoreSettled,
                json!({
                    "condition": settle_on,
                    "polls": report.polls,
                    "waited_secs": report.elapsed.as_secs(),
                }),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::PollPolicy;
    use crate::models::cluster_health::{ClusterHealth, HealthStatus};
    use crate::shutdown::{self, Shutdown};
    use crate::testing::FakeCluster;
    use serde_json::Map;
    use std::time::Duration;

    fn repository() -> SnapshotRepository {
        let mut settings = Map::new();
        settings.insert("container".to_string(), json!("snapshots"));
        SnapshotRepository {
            name: "az_repo".to_string(),
            repo_type: "azure".to_string(),
            settings,
            readonly: true,
        }
    }

    fn request() -> RestoreRequest {
        RestoreRequest {
            snapshot: "snapshot_1".to_string(),
            indices: "*".to_string(),
            exclusions: vec![".*".to_string()],
            ignore_index_settings: vec!["index.search*".to_string()],
            rename_prefix: "restored-".to_string(),
        }
    }

    #[tokio::test]
    async fn existing_repository_is_left_alone() {
        let cluster = FakeCluster::new();
        let audit = AuditTrail::disabled();
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        let state = coordinator.ensure_repository(&repository()).await.unwrap();

        assert_eq!(state, RepositoryState::Existing);
        assert_eq!(cluster.count("put_repository"), 0);
        assert_eq!(coordinator.phase(), RunPhase::RepoEnsured);
    }

    #[tokio::test]
    async fn missing_repository_is_created() {
        let cluster = FakeCluster::new();
        cluster.set_repository_exists(false);
        let audit = AuditTrail::disabled();
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        let state = coordinator.ensure_repository(&repository()).await.unwrap();

        assert_eq!(state, RepositoryState::Created);
        assert_eq!(cluster.count("put_repository"), 1);
    }

    #[tokio::test]
    async fn repository_creation_failure_is_fatal() {
        let cluster = FakeCluster::new();
        cluster.set_repository_exists(false);
        cluster.fail_put_repository(500);
        let audit = AuditTrail::disabled();
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        let err = coordinator.ensure_repository(&repository()).await.unwrap_err();

        assert!(matches!(err, MigrateError::Repository { .. }));
        assert_eq!(coordinator.phase(), RunPhase::NoRepo);
    }

    #[tokio::test]
    async fn rejected_restore_stops_before_waiting() {
        let cluster = FakeCluster::new();
        cluster.fail_restore(400);
        let audit = AuditTrail::disabled();
        let shutdown = Shutdown::never();
        let gate = HealthGate::new(&cluster, PollPolicy::every(Duration::from_secs(60)), &shutdown);
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        let err = coordinator
            .restore_and_settle(&repository(), &request(), &gate, WaitFor::Both)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrateError::RestoreRejected { .. }));
        assert_eq!(coordinator.phase(), RunPhase::RepoEnsured);
        assert_eq!(cluster.count("cluster_health"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_settles_through_the_gate() {
        let cluster = FakeCluster::new();
        cluster.push_health(Ok(ClusterHealth {
            status: HealthStatus::Red,
            initializing_shards: 4,
            unassigned_shards: 0,
            relocating_shards: 0,
        }));
        let audit = AuditTrail::disabled();
        let shutdown = Shutdown::never();
        let gate = HealthGate::new(&cluster, PollPolicy::every(Duration::from_secs(60)), &shutdown);
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        coordinator
            .restore_and_settle(&repository(), &request(), &gate, WaitFor::Both)
            .await
            .unwrap();

        assert_eq!(coordinator.phase(), RunPhase::RestoreSettled);
        assert_eq!(
            cluster.calls(),
            vec![
                "repository_exists az_repo",
                "restore_snapshot az_repo/snapshot_1",
                "cluster_health",
                "cluster_health",
                "active_recoveries",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_settling_is_reported_as_cancelled() {
        let cluster = FakeCluster::new();
        for _ in 0..3 {
            cluster.push_health(Ok(ClusterHealth {
                status: HealthStatus::Red,
                initializing_shards: 4,
                unassigned_shards: 0,
                relocating_shards: 0,
            }));
        }
        let audit = AuditTrail::disabled();
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();
        let gate = HealthGate::new(&cluster, PollPolicy::every(Duration::from_secs(60)), &shutdown);
        let mut coordinator = RestoreCoordinator::new(&cluster, &audit);

        let err = coordinator
            .restore_and_settle(&repository(), &request(), &gate, WaitFor::Green)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(coordinator.phase(), RunPhase::RestoreSubmitted);
    }
}
