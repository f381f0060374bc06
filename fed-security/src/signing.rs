//! Ed25519 identity keys, message signatures and signed envelopes.
//!
//! Signatures cover the canonical encoding of a message (sorted-key JSON
//! without the `signature` field), so verification does not depend on the
//! wire encoding.

use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use fed_types::{canonical_bytes, InstanceId, Signable};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SecurityError};

/// This instance's long-term signing key.
pub struct IdentityKey {
    signing: SigningKey,
}

impl IdentityKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild from a 32-byte secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    /// The 32-byte secret. Callers must zeroize their copy.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// Instance id derived from the public key.
    pub fn instance_id(&self) -> InstanceId {
        InstanceId::from_public_key(&self.public_key())
    }

    /// Sign raw bytes, returning the 64-byte signature.
    pub fn sign_bytes(&self, bytes: &[u8]) -> [u8; 64] {
        self.signing.sign(bytes).to_bytes()
    }

    /// Sign a message in place.
    pub fn sign<T: Signable>(&self, message: &mut T) -> Result<()> {
        let bytes = message.signing_bytes()?;
        message.set_signature(hex::encode(self.sign_bytes(&bytes)));
        Ok(())
    }
}

impl std::fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKey({:?}, [REDACTED])", self.instance_id())
    }
}

/// Decode a hex public key.
pub fn decode_public_key(hex_key: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_key).map_err(|_| SecurityError::InvalidPublicKey)?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SecurityError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&key).map_err(|_| SecurityError::InvalidPublicKey)?;
    Ok(key)
}

/// Verify a hex signature over `bytes`.
pub fn verify_bytes(bytes: &[u8], signature_hex: &str, public_key: &[u8; 32]) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| SecurityError::InvalidPublicKey)?;
    let raw = hex::decode(signature_hex).map_err(|_| SecurityError::InvalidSignature)?;
    let raw: [u8; 64] = raw
        .try_into()
        .map_err(|_| SecurityError::InvalidSignature)?;
    key.verify_strict(bytes, &Signature::from_bytes(&raw))
        .map_err(|_| SecurityError::InvalidSignature)
}

/// Verify a message's signature against a known public key.
pub fn verify<T: Signable>(message: &T, public_key: &[u8; 32]) -> Result<()> {
    if message.signature().is_empty() {
        return Err(SecurityError::InvalidSignature);
    }
    verify_bytes(&message.signing_bytes()?, message.signature(), public_key)
}

/// Any serializable value with a detached signature by a named instance.
///
/// Used for artifacts that are not protocol messages, such as the peer
/// cards operators exchange out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope<T> {
    /// Signed content.
    pub payload: T,
    /// Signer's instance id (hex public key).
    pub signer: InstanceId,
    /// Hex signature over the canonical payload.
    pub signature: String,
}

impl<T: Serialize> SignedEnvelope<T> {
    /// Sign `payload` with `key`.
    pub fn seal(payload: T, key: &IdentityKey) -> Result<Self> {
        let bytes = canonical_bytes(&payload)?;
        Ok(Self {
            signer: key.instance_id(),
            signature: hex::encode(key.sign_bytes(&bytes)),
            payload,
        })
    }

    /// Signer's public key, checked to be a valid point.
    pub fn signer_key(&self) -> Result<[u8; 32]> {
        let key = self
            .signer
            .public_key()
            .ok_or_else(|| SecurityError::IdentityMismatch("signer is not a public key".into()))?;
        VerifyingKey::from_bytes(&key).map_err(|_| SecurityError::InvalidPublicKey)?;
        Ok(key)
    }

    /// Verify the envelope was signed by the key its `signer` names.
    pub fn verify_self_signed(&self) -> Result<&T> {
        let key = self.signer_key()?;
        self.verify_with(&key)
    }

    /// Verify the envelope against an expected key.
    pub fn verify_with(&self, public_key: &[u8; 32]) -> Result<&T> {
        if self.signer.public_key().as_ref() != Some(public_key) {
            return Err(SecurityError::IdentityMismatch(format!(
                "envelope signed by {}",
                self.signer
            )));
        }
        let bytes = canonical_bytes(&self.payload)?;
        verify_bytes(&bytes, &self.signature, public_key)?;
        Ok(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fed_types::{Handshake, Nonce, Nonced, SyncPayload, Cursor, NodeRecord};

    #[test]
    fn signed_handshake_verifies() {
        let key = IdentityKey::generate();
        let mut hs = Handshake::new(&key.public_key());
        hs.stamp(Nonce::random(), 1_700_000_000);
        key.sign(&mut hs).unwrap();

        assert!(verify(&hs, &key.public_key()).is_ok());
        assert_eq!(hs.instance_id, key.instance_id());
    }

    #[test]
    fn any_mutation_breaks_signature() {
        let key = IdentityKey::generate();
        let mut payload = SyncPayload::new(
            key.instance_id(),
            vec![NodeRecord::new("n1", "concept", "body", 5)],
            vec![],
            vec![],
            Cursor::new(3),
            false,
        )
        .unwrap();
        payload.stamp(Nonce::random(), 1_700_000_000);
        key.sign(&mut payload).unwrap();

        let mut tampered = payload.clone();
        tampered.items[0].content.push('!');
        assert!(matches!(
            verify(&tampered, &key.public_key()),
            Err(SecurityError::InvalidSignature)
        ));

        let mut tampered = payload.clone();
        tampered.has_more = true;
        assert!(verify(&tampered, &key.public_key()).is_err());

        let mut tampered = payload.clone();
        tampered.timestamp += 1;
        assert!(verify(&tampered, &key.public_key()).is_err());
    }

    #[test]
    fn every_signature_byte_matters() {
        let key = IdentityKey::generate();
        let mut hs = Handshake::new(&key.public_key());
        hs.stamp(Nonce::random(), 1);
        key.sign(&mut hs).unwrap();

        let raw = hex::decode(&hs.signature).unwrap();
        for i in 0..raw.len() {
            let mut flipped = raw.clone();
            flipped[i] ^= 0x01;
            let mut copy = hs.clone();
            copy.signature = hex::encode(&flipped);
            assert!(verify(&copy, &key.public_key()).is_err(), "byte {i}");
        }
    }

    #[test]
    fn wrong_key_and_unsigned_fail() {
        let a = IdentityKey::generate();
        let b = IdentityKey::generate();
        let mut hs = Handshake::new(&a.public_key());
        assert!(verify(&hs, &a.public_key()).is_err());

        a.sign(&mut hs).unwrap();
        assert!(verify(&hs, &b.public_key()).is_err());
    }

    #[test]
    fn key_bytes_roundtrip() {
        let key = IdentityKey::generate();
        let restored = IdentityKey::from_bytes(&key.to_bytes());
        assert_eq!(key.public_key(), restored.public_key());
    }

    #[test]
    fn public_key_decoding() {
        let key = IdentityKey::generate();
        assert_eq!(
            decode_public_key(&hex::encode(key.public_key())).unwrap(),
            key.public_key()
        );
        assert!(decode_public_key("zz").is_err());
        assert!(decode_public_key(&hex::encode([1u8; 16])).is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let key = IdentityKey::generate();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains(&hex::encode(key.to_bytes())));
    }

    #[test]
    fn envelope_roundtrip_and_tamper() {
        let key = IdentityKey::generate();
        let env = SignedEnvelope::seal(
            serde_json::json!({"url": "https://a.example", "name": "a"}),
            &key,
        )
        .unwrap();
        assert!(env.verify_self_signed().is_ok());
        assert!(env.verify_with(&key.public_key()).is_ok());

        let mut tampered = env.clone();
        tampered.payload["url"] = serde_json::json!("https://evil.example");
        assert!(matches!(
            tampered.verify_self_signed(),
            Err(SecurityError::InvalidSignature)
        ));

        let other = IdentityKey::generate();
        assert!(matches!(
            env.verify_with(&other.public_key()),
            Err(SecurityError::IdentityMismatch(_))
        ));
    }
}
