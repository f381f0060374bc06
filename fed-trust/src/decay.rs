//! Background decay task.
//!
//! Runs the trust manager's decay sweep periodically so idle and
//! unverified peers lose trust over time.

use crate::manager::TrustManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the periodic decay task.
///
/// An interval of 0 disables the task. Returns a handle that can be used
/// to abort it.
pub fn spawn_decay_task(
    manager: Arc<TrustManager>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval_secs == 0 {
            tracing::info!("Decay task disabled");
            return;
        }

        tracing::info!("Decay task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            match manager.decay_inactive_peers().await {
                Ok(report) => {
                    if report.inactivity + report.verification > 0 {
                        tracing::info!(
                            "Decay: {} inactivity, {} verification events across {} peers",
                            report.inactivity,
                            report.verification,
                            report.examined
                        );
                    } else {
                        tracing::debug!("Decay: nothing due ({} peers)", report.examined);
                    }
                }
                Err(e) => {
                    tracing::error!("Decay error: {}", e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustConfig;
    use crate::store::{PeerRegistration, SqlitePeerStore};

    async fn manager() -> Arc<TrustManager> {
        let store = Arc::new(SqlitePeerStore::in_memory().await.unwrap());
        Arc::new(TrustManager::new(store, TrustConfig::default()))
    }

    #[tokio::test]
    async fn decay_task_disabled() {
        let handle = spawn_decay_task(manager().await, 0);

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn decay_task_leaves_fresh_peers_alone() {
        let m = manager().await;
        let peer = m
            .register_peer(PeerRegistration::new("p", "https://p.example/", [4; 32]))
            .await
            .unwrap();

        let handle = spawn_decay_task(m.clone(), 1);
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(m.get_peer(&peer.id).await.unwrap().trust_score, 0.3);
        assert!(m.history(&peer.id, 10).await.unwrap().is_empty());
    }
}
