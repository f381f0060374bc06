//! Canonical, deterministic encoding used for signatures and content hashes.
//!
//! Values are rendered as JSON with object keys sorted at every level and
//! the top-level `signature` field removed, so both sides of a signature
//! check derive byte-identical input regardless of field order on the wire.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::WireError;

/// Name of the field excluded from signed bytes.
const SIGNATURE_FIELD: &str = "signature";

/// Encode a value canonically, excluding its top-level `signature` field.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut value = serde_json::to_value(value).map_err(WireError::Canonical)?;
    if let Value::Object(map) = &mut value {
        map.remove(SIGNATURE_FIELD);
    }
    serde_json::to_vec(&sorted(value)).map_err(WireError::Canonical)
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k, sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// A wire message that carries its own detached signature.
pub trait Signable: Serialize {
    /// Hex-encoded Ed25519 signature (empty when unsigned).
    fn signature(&self) -> &str;

    /// Replace the signature.
    fn set_signature(&mut self, signature: String);

    /// Bytes covered by the signature.
    fn signing_bytes(&self) -> Result<Vec<u8>, WireError> {
        canonical_bytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [ {"z": 1, "y": 2} ]}});
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":[{"y":2,"z":1}],"d":2},"b":1}"#
        );
    }

    #[test]
    fn signature_field_is_excluded() {
        let signed = json!({"nonce": "aa", "signature": "deadbeef"});
        let unsigned = json!({"nonce": "aa", "signature": ""});
        assert_eq!(
            canonical_bytes(&signed).unwrap(),
            canonical_bytes(&unsigned).unwrap()
        );
    }

    #[test]
    fn nested_signature_fields_are_kept() {
        let value = json!({"inner": {"signature": "x"}});
        let text = String::from_utf8(canonical_bytes(&value).unwrap()).unwrap();
        assert!(text.contains("signature"));
    }
}
