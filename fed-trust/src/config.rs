//! Trust manager configuration (`[trust]`).

use fed_core::DEFAULT_INITIAL_SCORE;
use serde::Deserialize;

/// Trust manager configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TrustConfig {
    /// Score given to newly registered peers (default: 0.3).
    #[serde(default = "default_initial_score")]
    pub initial_score: f64,
    /// Trust events kept per peer (default: 5,000).
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Decay task interval in seconds; 0 disables the task (default: 3600).
    #[serde(default = "default_decay_interval")]
    pub decay_interval_secs: u64,
}

// Default value functions
fn default_initial_score() -> f64 {
    DEFAULT_INITIAL_SCORE
}

fn default_max_history() -> usize {
    5_000
}

fn default_decay_interval() -> u64 {
    3600 // 1 hour
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            initial_score: default_initial_score(),
            max_history: default_max_history(),
            decay_interval_secs: default_decay_interval(),
        }
    }
}
