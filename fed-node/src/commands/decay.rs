//! Apply trust decay once.

use anyhow::Result;
use fed_sync::Config;

use super::open_trust;

/// Run the decay command.
pub async fn run(config: &Config) -> Result<()> {
    let trust = open_trust(config).await?;
    let report = trust.decay_inactive_peers().await?;

    println!(
        "Examined {} peers: {} inactivity, {} verification decay events.",
        report.examined, report.inactivity, report.verification
    );
    if report.errors > 0 {
        anyhow::bail!("{} peers could not be processed", report.errors);
    }
    Ok(())
}
