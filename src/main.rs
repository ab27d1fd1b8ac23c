use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use es_snapshot_migrate::conf::{Args, MigrationConfig};
use es_snapshot_migrate::error::MigrateError;
use es_snapshot_migrate::{runner, shutdown};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    let config = match MigrationConfig::resolve(args) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(
        "Application started! url={}, snapshot={}, indices={}",
        config.endpoint.get_url(),
        config.restore.snapshot,
        config.restore.selector()
    );

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current poll...");
            trigger.trigger();
        }
    });

    match runner::run(&config, &shutdown).await {
        Ok(_) if shutdown.is_triggered() => ExitCode::from(EXIT_CANCELLED),
        Ok(outcomes) => {
            let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
            if failed > 0 {
                warn!(
                    "{} index(es) need attention, see the summary above",
                    failed
                );
            }
            ExitCode::SUCCESS
        }
        Err(err) if err.is_cancelled() => ExitCode::from(EXIT_CANCELLED),
        Err(MigrateError::Config(_)) | Err(MigrateError::HttpClient(_)) => {
            ExitCode::from(EXIT_CONFIG)
        }
        Err(_) => ExitCode::from(EXIT_FATAL),
    }
}
