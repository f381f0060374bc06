//! Serve command: federation endpoint plus background sync and decay.

use anyhow::{Context, Result};
use axum::Router;
use fed_security::SecurityLayer;
use fed_sync::{
    spawn_sync_scheduler, Config, FederationResponder, MemoryGraph, RecordingGovernance,
    SyncOrchestrator,
};
use fed_trust::{spawn_decay_task, TrustManager};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

use super::{build_orchestrator, open_security, open_trust};
use crate::http::{build_router, NodeState};
use crate::seed;

/// Seconds between nonce store sweeps.
const NONCE_PURGE_INTERVAL_SECS: u64 = 60;

/// A wired-up node, not yet listening.
struct Node {
    security: Arc<SecurityLayer>,
    trust: Arc<TrustManager>,
    orchestrator: Arc<SyncOrchestrator>,
    router: Router,
}

/// Run the serve command until Ctrl-C.
pub async fn run(config: &Config, seed_path: Option<&Path>, sync_interval: u64) -> Result<()> {
    let node = build(config, seed_path).await?;

    let decay = spawn_decay_task(node.trust.clone(), config.trust.decay_interval_secs);
    let scheduler = spawn_sync_scheduler(node.orchestrator.clone(), sync_interval);
    let purge = spawn_nonce_purge(node.security.clone());

    let listener = tokio::net::TcpListener::bind(&config.http.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.http.bind_address))?;

    println!("fed-node v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("  Instance ID: {}", node.security.instance_id());
    println!("  Listening:   http://{}", listener.local_addr()?);
    println!("  Sync every:  {}s", sync_interval);
    println!();
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, node.router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    decay.abort();
    scheduler.abort();
    purge.abort();
    Ok(())
}

async fn build(config: &Config, seed_path: Option<&Path>) -> Result<Node> {
    let security = open_security(config).await?;
    let trust = open_trust(config).await?;
    let graph = Arc::new(match seed_path {
        Some(path) => seed::load(path).await?,
        None => MemoryGraph::new(),
    });
    let governance = Arc::new(RecordingGovernance::new());

    let responder = Arc::new(FederationResponder::new(
        security.clone(),
        trust.clone(),
        graph.clone(),
        governance.clone(),
        config.sync.page_size,
    ));
    let orchestrator = Arc::new(build_orchestrator(
        config,
        security.clone(),
        trust.clone(),
        graph,
        governance,
    ));

    let router = build_router(Arc::new(NodeState {
        responder,
        trust: trust.clone(),
        instance_id: security.instance_id(),
        started: Instant::now(),
    }));

    Ok(Node {
        security,
        trust,
        orchestrator,
        router,
    })
}

fn spawn_nonce_purge(security: Arc<SecurityLayer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(Duration::from_secs(NONCE_PURGE_INTERVAL_SECS));
        loop {
            timer.tick().await;
            let purged = security.purge_expired();
            if purged > 0 {
                tracing::debug!("Purged {} expired nonces", purged);
            }
        }
    })
}
