//! # fed-security
//!
//! Transport security for knowledge-graph federation.
//!
//! This crate provides:
//! - Destination validation with SSRF protection and DNS pinning
//! - Trust-on-first-use certificate pinning
//! - Ed25519 message signing over canonical encodings
//! - Nonce and timestamp replay protection
//! - Passphrase-encrypted identity key storage
//!
//! [`SecurityLayer`] bundles these behind the operations the sync
//! orchestrator and responder call. It depends on nothing above it: no
//! trust scores, no sync state.
//!
//! ## Example
//!
//! ```ignore
//! let layer = SecurityLayer::new(identity, &SecurityConfig::default(), Arc::new(SystemResolver));
//! let target = layer.validate_destination("https://peer.example/").await?;
//! let mut hello = Handshake::new(&layer.identity().public_key());
//! layer.prepare(&mut hello)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod certs;
pub mod config;
pub mod destination;
pub mod error;
pub mod keystore;
pub mod nonce;
pub mod signing;

pub use certs::{fingerprint, CertPinStore, Pinned};
pub use config::{CertConfig, DnsConfig, NonceConfig, SecurityConfig};
pub use destination::{is_blocked, DestinationGuard, Resolver, StaticResolver, SystemResolver, ValidatedTarget};
pub use error::{Result, SecurityError};
pub use keystore::{KdfParams, KeyStore};
pub use nonce::NonceStore;
pub use signing::{decode_public_key, verify, IdentityKey, SignedEnvelope};

use fed_types::{time::now_secs, InstanceId, Nonce, Nonced, PeerId, Signable};
use std::sync::Arc;
use tracing::warn;

/// The security operations available to the rest of the subsystem.
///
/// Owns its stores; construct one per instance and share it by `Arc`.
#[derive(Debug)]
pub struct SecurityLayer {
    identity: IdentityKey,
    destinations: DestinationGuard,
    certs: CertPinStore,
    nonces: NonceStore,
}

impl SecurityLayer {
    /// Build a layer around this instance's identity.
    pub fn new(identity: IdentityKey, config: &SecurityConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            identity,
            destinations: DestinationGuard::new(&config.dns, resolver),
            certs: CertPinStore::new(&config.certs),
            nonces: NonceStore::new(&config.nonce),
        }
    }

    /// This instance's signing identity.
    pub fn identity(&self) -> &IdentityKey {
        &self.identity
    }

    /// This instance's id.
    pub fn instance_id(&self) -> InstanceId {
        self.identity.instance_id()
    }

    /// Validate a peer URL and pin its resolution.
    pub async fn validate_destination(&self, url: &str) -> Result<ValidatedTarget> {
        self.destinations.validate(url, now_secs()).await
    }

    /// Pin or check a peer's TLS certificate.
    pub fn establish_trust_on_first_use(&self, peer: PeerId, certificate_der: &[u8]) -> Result<Pinned> {
        self.certs
            .establish_trust_on_first_use(peer, certificate_der, now_secs())
    }

    /// Replace a peer's certificate pin (operator action).
    pub fn admin_override_certificate(&self, peer: PeerId, fingerprint: &str) -> Result<()> {
        self.certs.admin_override(peer, fingerprint, now_secs())
    }

    /// Fresh nonce for an outgoing message.
    pub fn issue_nonce(&self) -> Nonce {
        self.nonces.issue()
    }

    /// Enforce freshness and single use of an inbound nonce.
    pub fn check_and_record_nonce(
        &self,
        peer: PeerId,
        nonce: Option<&Nonce>,
        timestamp: u64,
    ) -> Result<()> {
        self.nonces
            .check_and_record(peer, nonce, timestamp, now_secs())
    }

    /// Sign a message with this instance's key.
    pub fn sign<T: Signable>(&self, message: &mut T) -> Result<()> {
        self.identity.sign(message)
    }

    /// Verify a message against a peer's registered key.
    pub fn verify<T: Signable>(&self, message: &T, public_key: &[u8; 32]) -> Result<()> {
        signing::verify(message, public_key)
    }

    /// Stamp a fresh nonce and the current time, then sign.
    pub fn prepare<T: Signable + Nonced>(&self, message: &mut T) -> Result<()> {
        message.stamp(self.issue_nonce(), now_secs());
        self.sign(message)
    }

    /// Full inbound check: signature first, then nonce and freshness.
    ///
    /// The signature is checked first so unauthenticated traffic cannot
    /// fill the nonce store.
    pub fn accept<T: Signable + Nonced>(
        &self,
        peer: PeerId,
        message: &T,
        public_key: &[u8; 32],
    ) -> Result<()> {
        if let Err(e) = self.verify(message, public_key) {
            warn!(%peer, error = %e, "signature verification failed");
            return Err(e);
        }
        self.check_and_record_nonce(peer, message.nonce(), message.timestamp())
    }

    /// Drop expired nonces and certificate pins.
    pub fn purge_expired(&self) -> usize {
        let now = now_secs();
        self.nonces.purge_expired(now) + self.certs.purge_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_types::{Handshake, SyncDirection, SyncRequest, Cursor};

    fn layer() -> SecurityLayer {
        SecurityLayer::new(
            IdentityKey::generate(),
            &SecurityConfig::default(),
            Arc::new(StaticResolver::new()),
        )
    }

    #[test]
    fn prepared_message_is_accepted_once() {
        let sender = layer();
        let receiver = layer();
        let peer = PeerId::new();

        let mut request = SyncRequest::new(sender.instance_id(), SyncDirection::Pull, Cursor::zero(), 50);
        sender.prepare(&mut request).unwrap();
        assert!(request.nonce.is_some());

        let key = sender.identity().public_key();
        receiver.accept(peer, &request, &key).unwrap();
        assert!(matches!(
            receiver.accept(peer, &request, &key),
            Err(SecurityError::ReplayedNonce { .. })
        ));
    }

    #[test]
    fn signed_but_nonceless_message_rejected() {
        let sender = layer();
        let receiver = layer();
        let mut hs = Handshake::new(&sender.identity().public_key());
        hs.timestamp = now_secs();
        sender.sign(&mut hs).unwrap();

        assert!(matches!(
            receiver.accept(PeerId::new(), &hs, &sender.identity().public_key()),
            Err(SecurityError::MissingNonce)
        ));
    }

    #[test]
    fn bad_signature_does_not_consume_nonce() {
        let sender = layer();
        let receiver = layer();
        let peer = PeerId::new();
        let mut hs = Handshake::new(&sender.identity().public_key());
        sender.prepare(&mut hs).unwrap();

        let mut forged = hs.clone();
        forged.timestamp += 1;
        assert!(matches!(
            receiver.accept(peer, &forged, &sender.identity().public_key()),
            Err(SecurityError::InvalidSignature)
        ));
        // Genuine message with the same nonce still goes through.
        receiver
            .accept(peer, &hs, &sender.identity().public_key())
            .unwrap();
    }

    #[test]
    fn certificate_override_through_layer() {
        let layer = layer();
        let peer = PeerId::new();
        layer.establish_trust_on_first_use(peer, b"cert-1").unwrap();
        assert!(layer.establish_trust_on_first_use(peer, b"cert-2").is_err());
        layer
            .admin_override_certificate(peer, &fingerprint(b"cert-2"))
            .unwrap();
        assert_eq!(
            layer.establish_trust_on_first_use(peer, b"cert-2").unwrap(),
            Pinned::Matched
        );
    }
}
