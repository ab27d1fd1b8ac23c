//! Health gate: fixed-interval polling until the cluster reaches a condition.
//!
//! Every poll loop in the crate (cluster health, shard recovery, reindex tasks)
//! goes through [`poll_until`]. It checks first and sleeps between checks, so a
//! condition that is pending `N` times and then ready is checked `N + 1` times
//! with `N` sleeps in between.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::WaitError;
use crate::es_client::ClusterApi;
use crate::shutdown::Shutdown;

/// Result of one check.
#[derive(Debug, Clone, PartialEq)]
pub enum Check<T> {
    Ready(T),
    Pending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Option<Duration>,
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    pub polls: u32,
    pub elapsed: Duration,
}

/// Calls `check` until it returns [`Check::Ready`], sleeping `policy.interval`
/// between calls. The last sleep is cut short so the final check lands on
/// `max_wait`, never after it.
pub async fn poll_until<T, F, Fut>(
    condition: &str,
    mut check: F,
    policy: &PollPolicy,
    shutdown: &Shutdown,
) -> Result<(T, PollReport), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Check<T>>,
{
    let started = Instant::now();
    let mut polls = 0u32;
    loop {
        polls += 1;
        match check().await {
            Check::Ready(value) => {
                let report = PollReport {
                    polls,
                    elapsed: started.elapsed(),
                };
                debug!("{} reached after {} poll(s)", condition, polls);
                return Ok((value, report));
            }
            Check::Pending(reason) => {
                info!("Still waiting for {}... {}", condition, reason);
            }
        }
        let mut delay = policy.interval;
        if let Some(max_wait) = policy.max_wait {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(WaitError::Timeout {
                    condition: condition.to_string(),
                    waited,
                });
            }
            delay = delay.min(max_wait - waited);
        }
        if shutdown.sleep(delay).await.is_err() {
            return Err(WaitError::Cancelled {
                condition: condition.to_string(),
            });
        }
    }
}

/// [`poll_until`] for conditions that carry no value.
pub async fn await_condition<F, Fut>(
    condition: &str,
    check: F,
    policy: &PollPolicy,
    shutdown: &Shutdown,
) -> Result<PollReport, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Check<()>>,
{
    poll_until(condition, check, policy, shutdown)
        .await
        .map(|(_, report)| report)
}

/// What the gate waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitFor {
    Green,
    RecoveryIdle,
    Both,
}

impl fmt::Display for WaitFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            WaitFor::Green => "cluster green",
            WaitFor::RecoveryIdle => "no active shard recovery",
            WaitFor::Both => "cluster green and no active shard recovery",
        };
        f.write_str(value)
    }
}

impl std::str::FromStr for WaitFor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "green" => Ok(WaitFor::Green),
            "recovery_idle" | "recovery" => Ok(WaitFor::RecoveryIdle),
            "both" => Ok(WaitFor::Both),
            other => Err(format!(
                "unknown wait condition {other:?} (expected green, recovery_idle or both)"
            )),
        }
    }
}

pub async fn cluster_green<C: ClusterApi + ?Sized>(cluster: &C) -> Check<()> {
    match cluster.cluster_health().await {
        Ok(health) if health.is_green() => Check::Ready(()),
        Ok(health) => Check::Pending(format!(
            "Current status is {} with {} initializing shards and {} unassigned shards",
            health.status, health.initializing_shards, health.unassigned_shards
        )),
        Err(err) => {
            warn!("Cluster health check failed: {}", err);
            Check::Pending(format!("health unavailable ({})", err))
        }
    }
}

pub async fn no_active_recovery<C: ClusterApi + ?Sized>(cluster: &C) -> Check<()> {
    match cluster.active_recoveries().await {
        Ok(rows) if rows.is_empty() => Check::Ready(()),
        Ok(rows) => {
            let sample: Vec<String> = rows.iter().take(3).map(|row| row.describe()).collect();
            Check::Pending(format!(
                "{} shard recoveries active, e.g. {}",
                rows.len(),
                sample.join("; ")
            ))
        }
        Err(err) => {
            warn!("Recovery listing failed: {}", err);
            Check::Pending(format!("recovery state unavailable ({})", err))
        }
    }
}

/// Blocks the run until the cluster is in a state fit for the next heavy operation.
pub struct HealthGate<'a, C: ?Sized> {
    cluster: &'a C,
    policy: PollPolicy,
    shutdown: &'a Shutdown,
}

impl<'a, C: ClusterApi + ?Sized> HealthGate<'a, C> {
    pub fn new(cluster: &'a C, policy: PollPolicy, shutdown: &'a Shutdown) -> Self {
        Self {
            cluster,
            policy,
            shutdown,
        }
    }

    pub async fn wait_for(&self, target: WaitFor) -> Result<PollReport, WaitError> {
        info!("Waiting for {}...", target);
        let cluster = self.cluster;
        let condition = target.to_string();
        let report = await_condition(
            &condition,
            move || async move {
                if matches!(target, WaitFor::Green | WaitFor::Both) {
                    if let Check::Pending(reason) = cluster_green(cluster).await {
                        return Check::Pending(reason);
                    }
                }
                if matches!(target, WaitFor::RecoveryIdle | WaitFor::Both) {
                    return no_active_recovery(cluster).await;
                }
                Check::Ready(())
            },
            &self.policy,
            self.shutdown,
        )
        .await?;
        info!("Reached {} after {:?}", target, report.elapsed);
        Ok(report)
    }
}
