use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::{
    error::StoreResult,
    repository::{PurgeReport, RepositoryState},
};

/// Deletes carts and unused verification sessions that expired before `now`.
pub async fn purge_once(repo: &RepositoryState, now: DateTime<Utc>) -> StoreResult<PurgeReport> {
    let report = repo.purge_expired(now).await?;
    if report.carts > 0 || report.verifications > 0 {
        tracing::info!(
            carts = report.carts,
            verifications = report.verifications,
            "purged expired sessions"
        );
    }
    Ok(report)
}

/// spawn_purge_task
///
/// Runs `purge_once` every `every`. Failures are logged and retried on the next tick.
pub fn spawn_purge_task(repo: RepositoryState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = purge_once(&repo, Utc::now()).await {
                tracing::warn!(error = %e, "purge of expired sessions failed");
            }
        }
    })
}
