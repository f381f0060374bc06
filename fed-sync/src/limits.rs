//! Per-tier sync rate limits.
//!
//! Each tier has its own keyed limiter with a one-run burst. The period
//! is the configured base interval scaled by the tier's factor, so a core
//! peer may sync four times as often as a standard one and a limited peer
//! half as often. Quarantined peers are never admitted.

use fed_core::TrustTier;
use fed_types::PeerId;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Peer ran too recently for its tier.
    TooSoon,
    /// Tier never admits a sync.
    NotAdmitted,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSoon => write!(f, "sync interval for tier not yet elapsed"),
            Self::NotAdmitted => write!(f, "tier does not admit sync"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Tier-scaled sync rate limits.
#[derive(Clone)]
pub struct TierRateLimits {
    limiters: HashMap<TrustTier, Arc<KeyedLimiter<PeerId>>>,
}

impl std::fmt::Debug for TierRateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierRateLimits")
            .field("tiers", &self.limiters.len())
            .finish()
    }
}

/// Period between runs for a tier, or `None` when the tier never syncs.
pub fn tier_period(base: Duration, tier: TrustTier) -> Option<Duration> {
    let (num, den) = tier.interval_factor()?;
    Some(base * num / den)
}

impl TierRateLimits {
    /// Build limiters from the base (standard-tier) interval.
    ///
    /// A zero base disables rate limiting for every admitted tier.
    pub fn new(base: Duration) -> Self {
        let mut limiters = HashMap::new();
        for tier in [
            TrustTier::Limited,
            TrustTier::Standard,
            TrustTier::Trusted,
            TrustTier::Core,
        ] {
            let quota = tier_period(base, tier).and_then(Quota::with_period);
            if let Some(quota) = quota {
                limiters.insert(tier, Arc::new(RateLimiter::keyed(quota)));
            }
        }
        Self { limiters }
    }

    /// Admit one run for `peer` at `tier`.
    pub fn check(&self, peer: &PeerId, tier: TrustTier) -> Result<(), RateLimitError> {
        if tier == TrustTier::Quarantine {
            return Err(RateLimitError::NotAdmitted);
        }
        match self.limiters.get(&tier) {
            Some(limiter) => limiter
                .check_key(peer)
                .map_err(|_| RateLimitError::TooSoon),
            None => Ok(()),
        }
    }

    /// Evict idle entries from the keyed limiters.
    pub fn shrink(&self) {
        for limiter in self.limiters.values() {
            limiter.retain_recent();
        }
    }
}
