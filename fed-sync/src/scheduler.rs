//! Periodic sync of every eligible peer.
//!
//! Each peer's run is its own task, so a slow, failing or panicking run
//! never holds up another peer.

use crate::error::{Result, SyncError};
use crate::orchestrator::{SyncOrchestrator, SyncReport};
use fed_core::TrustTier;
use fed_types::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::interval;

/// Run one sync against every non-revoked, non-quarantined peer, concurrently.
///
/// Peers still inside their tier's rate-limit window come back as
/// [`SyncError::RateLimited`]. A panicking run is logged and left out.
pub async fn sync_all(orchestrator: Arc<SyncOrchestrator>) -> Result<Vec<(PeerId, Result<SyncReport>)>> {
    let peers = orchestrator.trust().list_peers().await?;

    let mut tasks = JoinSet::new();
    for peer in peers {
        if peer.is_revoked() || peer.tier() == TrustTier::Quarantine {
            continue;
        }
        let orchestrator = orchestrator.clone();
        tasks.spawn(async move {
            let outcome = orchestrator.sync_peer(&peer.id, None).await;
            (peer.id, outcome)
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!("Sync task aborted: {}", e),
        }
    }
    Ok(results)
}

/// Spawn the periodic sync task.
///
/// An interval of 0 disables the task.
pub fn spawn_sync_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval_secs == 0 {
            tracing::info!("Sync scheduler disabled");
            return;
        }

        tracing::info!("Sync scheduler started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            match sync_all(orchestrator.clone()).await {
                Ok(results) => {
                    let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();
                    let limited = results
                        .iter()
                        .filter(|(_, r)| matches!(r, Err(SyncError::RateLimited(_))))
                        .count();
                    tracing::debug!(
                        "Sync pass: {} ok, {} rate limited, {} failed",
                        succeeded,
                        limited,
                        results.len() - succeeded - limited
                    );
                }
                Err(e) => {
                    tracing::error!("Sync pass error: {}", e);
                }
            }
            orchestrator.shrink_limits();
        }
    })
}
