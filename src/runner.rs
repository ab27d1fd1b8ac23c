use serde_json::json;
use tracing::{error, info};

use crate::audit::{AuditTrail, What};
use crate::batch::BatchDriver;
use crate::conf::MigrationConfig;
use crate::error::MigrateError;
use crate::es_client::{ClusterApi, EsClient};
use crate::health::HealthGate;
use crate::migrate::{IndexMigrator, MigrationOutcome};
use crate::restore::RestoreCoordinator;
use crate::shutdown::Shutdown;

/// Full run against the configured cluster.
pub async fn run(
    config: &MigrationConfig,
    shutdown: &Shutdown,
) -> Result<Vec<MigrationOutcome>, MigrateError> {
    let client =
        EsClient::from_endpoint(config.endpoint.clone()).map_err(MigrateError::HttpClient)?;
    client.print_server_info("Cluster").await;

    let audit = match &config.audit_file {
        Some(path) => AuditTrail::open(path).await,
        None => AuditTrail::disabled(),
    };
    run_with(&client, config, shutdown, &audit).await
}

/// The pipeline itself, over any [`ClusterApi`].
pub async fn run_with<C: ClusterApi + ?Sized>(
    cluster: &C,
    config: &MigrationConfig,
    shutdown: &Shutdown,
    audit: &AuditTrail,
) -> Result<Vec<MigrationOutcome>, MigrateError> {
    audit
        .record(
            What::RunStarted,
            json!({
                "url": config.endpoint.get_url(),
                "snapshot": config.restore.snapshot,
                "indices": config.restore.selector(),
                "skip_restore": config.skip_restore,
            }),
        )
        .await;

    let result = pipeline(cluster, config, shutdown, audit).await;
    match &result {
        Ok(outcomes) => {
            let succeeded = outcomes.iter().filter(|outcome| outcome.is_success()).count();
            audit
                .record(
                    What::RunFinished,
                    json!({
                        "succeeded": succeeded,
                        "failed": outcomes.len() - succeeded,
                    }),
                )
                .await;
        }
        Err(err) => {
            error!("Run aborted: {}", err);
            audit
                .record(What::RunAborted, json!({ "error": err.to_string() }))
                .await;
        }
    }
    result
}

async fn pipeline<C: ClusterApi + ?Sized>(
    cluster: &C,
    config: &MigrationConfig,
    shutdown: &Shutdown,
    audit: &AuditTrail,
) -> Result<Vec<MigrationOutcome>, MigrateError> {
    let gate = HealthGate::new(cluster, config.health.policy, shutdown);

    if config.skip_restore {
        info!("Skipping restore, migrating staging indices already present");
    } else {
        let mut coordinator = RestoreCoordinator::new(cluster, audit);
        coordinator
            .restore_and_settle(
                &config.repository,
                &config.restore,
                &gate,
                config.health.settle_on,
            )
            .await?;
    }

    let migrator = IndexMigrator::new(cluster, &config.migration, shutdown);
    let driver = BatchDriver::new(
        cluster,
        &gate,
        &migrator,
        config.health.before_each_index,
        shutdown,
        audit,
    );
    let staging = driver
        .discover(
            &config.restore.selector(),
            &config.migration.rename_prefix,
            &config.system_index_marker,
            !config.skip_restore,
        )
        .await?;
    driver.run(staging).await
}
