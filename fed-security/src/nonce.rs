//! Replay protection.
//!
//! A nonce is accepted once per peer within the retention window. Messages
//! must also carry a timestamp within `max_clock_skew_secs` of the local
//! clock, so a nonce that has aged out of the store is already too stale to
//! replay. A message without a nonce is always rejected.

use fed_core::BoundedMap;
use fed_types::{Nonce, PeerId};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::config::NonceConfig;
use crate::error::{Result, SecurityError};

/// Bounded store of recently seen nonces, keyed by peer.
#[derive(Debug)]
pub struct NonceStore {
    seen: Mutex<BoundedMap<(PeerId, Nonce), u64>>,
    max_skew: u64,
}

impl NonceStore {
    /// Create an empty store.
    pub fn new(config: &NonceConfig) -> Self {
        Self {
            seen: Mutex::new(BoundedMap::new(config.capacity, Some(config.retention_secs))),
            max_skew: config.max_clock_skew_secs,
        }
    }

    fn seen(&self) -> MutexGuard<'_, BoundedMap<(PeerId, Nonce), u64>> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh random nonce for an outgoing message.
    pub fn issue(&self) -> Nonce {
        Nonce::random()
    }

    /// Check freshness and uniqueness, then remember the nonce.
    pub fn check_and_record(
        &self,
        peer: PeerId,
        nonce: Option<&Nonce>,
        timestamp: u64,
        now: u64,
    ) -> Result<()> {
        let nonce = match nonce {
            Some(n) => *n,
            None => {
                warn!(%peer, "message without nonce rejected");
                return Err(SecurityError::MissingNonce);
            }
        };

        if timestamp.abs_diff(now) > self.max_skew {
            warn!(%peer, timestamp, now, "message timestamp outside freshness window");
            return Err(SecurityError::StaleTimestamp {
                timestamp,
                now,
                max_skew: self.max_skew,
            });
        }

        let mut seen = self.seen();
        let key = (peer, nonce);
        if seen.contains(&key, now) {
            warn!(%peer, %nonce, "replayed nonce rejected");
            return Err(SecurityError::ReplayedNonce { peer });
        }
        seen.insert(key, timestamp, now);
        Ok(())
    }

    /// Number of remembered nonces.
    pub fn len(&self) -> usize {
        self.seen().len()
    }

    /// Whether no nonces are remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop nonces past retention.
    pub fn purge_expired(&self, now: u64) -> usize {
        self.seen().purge_expired(now)
    }
}
