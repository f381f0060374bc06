//! One-shot sync against a single peer.

use anyhow::Result;
use fed_sync::{Config, MemoryGraph, RecordingGovernance, SyncError};
use fed_types::SyncDirection;
use std::path::Path;
use std::sync::Arc;

use super::{build_orchestrator, open_security, open_trust, parse_peer_id};
use crate::seed;

/// Run the sync command.
pub async fn run(
    config: &Config,
    peer: &str,
    direction: Option<&str>,
    seed_path: Option<&Path>,
) -> Result<()> {
    let peer_id = parse_peer_id(peer)?;
    let direction = parse_direction(direction)?;

    let security = open_security(config).await?;
    let trust = open_trust(config).await?;
    let graph = match seed_path {
        Some(path) => seed::load(path).await?,
        None => MemoryGraph::new(),
    };
    let governance = RecordingGovernance::new();

    let orchestrator = build_orchestrator(
        config,
        security,
        trust.clone(),
        Arc::new(graph.clone()),
        Arc::new(governance.clone()),
    );

    match orchestrator.sync_peer(&peer_id, direction).await {
        Ok(report) => {
            let peer = trust.get_peer(&peer_id).await?;
            println!("Sync with {} complete ({}).", peer.name, report.direction.as_str());
            println!();
            println!("  Pages:      {}", report.pages);
            println!(
                "  Received:   {} created, {} updated, {} skipped",
                report.counts.created, report.counts.updated, report.counts.skipped
            );
            println!(
                "  Conflicts:  {} ({} queued for manual resolution)",
                report.counts.conflicted,
                governance.conflicts().len()
            );
            println!("  In review:  {}", report.counts.pending_review);
            println!("  Sent:       {}", report.counts.sent);
            println!(
                "  Cursors:    pull {}, push {}",
                report.pull_cursor, report.push_cursor
            );
            println!("  Trust:      {:.4} ({})", peer.trust_score, peer.tier());
            Ok(())
        }
        Err(SyncError::RateLimited(_)) => {
            anyhow::bail!("Peer {} was synced too recently; try again later", peer_id)
        }
        Err(e) => Err(e.into()),
    }
}

fn parse_direction(direction: Option<&str>) -> Result<Option<SyncDirection>> {
    direction
        .map(|d| {
            SyncDirection::parse(d).ok_or_else(|| anyhow::anyhow!("Unknown direction: {}", d))
        })
        .transpose()
}
