//! Trust-on-first-use certificate pinning.
//!
//! The first certificate a peer presents is recorded by SHA-256 fingerprint
//! of its DER encoding; every later contact must present exactly the same
//! certificate. Rotations go through [`CertPinStore::admin_override`].

use fed_core::BoundedMap;
use fed_types::PeerId;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::config::CertConfig;
use crate::error::{Result, SecurityError};

/// Result of a successful pin check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pinned {
    /// No pin existed; the certificate is now pinned.
    FirstUse,
    /// Certificate matches the existing pin.
    Matched,
}

/// SHA-256 fingerprint of a DER certificate, lower-case hex.
pub fn fingerprint(certificate_der: &[u8]) -> String {
    hex::encode(Sha256::digest(certificate_der))
}

/// Bounded per-peer certificate pins.
#[derive(Debug)]
pub struct CertPinStore {
    pins: Mutex<BoundedMap<PeerId, String>>,
}

impl CertPinStore {
    /// Create an empty store.
    pub fn new(config: &CertConfig) -> Self {
        Self {
            pins: Mutex::new(BoundedMap::new(config.pin_capacity, config.pin_ttl_secs)),
        }
    }

    fn pins(&self) -> MutexGuard<'_, BoundedMap<PeerId, String>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pin on first contact, require an exact match afterwards.
    pub fn establish_trust_on_first_use(
        &self,
        peer: PeerId,
        certificate_der: &[u8],
        now: u64,
    ) -> Result<Pinned> {
        let actual = fingerprint(certificate_der);
        let mut pins = self.pins();
        match pins.get(&peer, now) {
            Some(expected) if *expected == actual => Ok(Pinned::Matched),
            Some(expected) => {
                warn!(%peer, %expected, %actual, "certificate mismatch");
                Err(SecurityError::CertificateMismatch {
                    peer,
                    expected: expected.clone(),
                    actual,
                })
            }
            None => {
                info!(%peer, fingerprint = %actual, "pinned certificate on first use");
                pins.insert(peer, actual, now);
                Ok(Pinned::FirstUse)
            }
        }
    }

    /// Replace a peer's pin with an operator-supplied fingerprint.
    pub fn admin_override(&self, peer: PeerId, fingerprint: &str, now: u64) -> Result<()> {
        let fingerprint = fingerprint.trim().to_ascii_lowercase();
        let valid = fingerprint.len() == 64 && fingerprint.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(SecurityError::InvalidFingerprint(fingerprint));
        }
        info!(%peer, %fingerprint, "certificate pin overridden by operator");
        self.pins().insert(peer, fingerprint, now);
        Ok(())
    }

    /// Current pin for a peer.
    pub fn pinned(&self, peer: &PeerId, now: u64) -> Option<String> {
        self.pins().get(peer, now).cloned()
    }

    /// Drop expired pins.
    pub fn purge_expired(&self, now: u64) -> usize {
        self.pins().purge_expired(now)
    }
}
