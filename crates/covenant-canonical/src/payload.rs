//! The exact payload covered by every signature.
//!
//! A signature never covers a registration entry as a whole. It covers the
//! canonical encoding of `{"fingerprint", "proof_data", "timestamp"}` and
//! nothing else, so display fields and the signatures themselves can be added
//! or reordered without changing the signed bytes.

use crate::digest::{payload_digest, Digest};
use crate::identifiers::Fingerprint;
use crate::{Canonicalizer, EncodingError};
use serde::Serialize;
use serde_json::{Map, Value};

/// Borrowed view of the signed fields of an attestation.
///
/// # Example
///
/// ```rust
/// use covenant_canonical::{Canonicalizer, Fingerprint, SigningPayload};
/// use serde_json::json;
///
/// let proof = json!({"oath": "X"});
/// let fingerprint = Fingerprint::new("F1");
/// let payload = SigningPayload::new(proof.as_object().unwrap(), 1000, &fingerprint);
/// let bytes = payload.canonical_bytes(&Canonicalizer::default())?;
/// assert_eq!(bytes, br#"{"fingerprint":"F1","proof_data":{"oath":"X"},"timestamp":1000}"#);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SigningPayload<'a> {
    /// Claimed signer.
    pub fingerprint: &'a Fingerprint,
    /// Attested content.
    pub proof_data: &'a Map<String, Value>,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: u64,
}

impl<'a> SigningPayload<'a> {
    /// Builds the payload from its three signed fields.
    pub fn new(
        proof_data: &'a Map<String, Value>,
        timestamp: u64,
        fingerprint: &'a Fingerprint,
    ) -> Self {
        Self {
            fingerprint,
            proof_data,
            timestamp,
        }
    }

    /// Canonical bytes that every signature must cover.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError`] if `proof_data` holds values outside the
    /// canonical profile.
    pub fn canonical_bytes(
        &self,
        canonicalizer: &Canonicalizer,
    ) -> Result<Vec<u8>, EncodingError> {
        Ok(canonicalizer.canonicalize_serializable(self)?.bytes)
    }

    /// Canonical bytes together with their domain-separated digest.
    pub fn encode(
        &self,
        canonicalizer: &Canonicalizer,
    ) -> Result<(Vec<u8>, Digest), EncodingError> {
        let bytes = self.canonical_bytes(canonicalizer)?;
        let digest = payload_digest(&bytes);
        Ok((bytes, digest))
    }
}

/// Interprets an arbitrary JSON value as proof data.
///
/// # Errors
///
/// Returns [`EncodingError::NotAnObject`] for anything but a JSON object.
pub fn proof_data_from_value(value: Value) -> Result<Map<String, Value>, EncodingError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(EncodingError::NotAnObject("array")),
        Value::String(_) => Err(EncodingError::NotAnObject("string")),
        Value::Number(_) => Err(EncodingError::NotAnObject("number")),
        Value::Bool(_) => Err(EncodingError::NotAnObject("bool")),
        Value::Null => Err(EncodingError::NotAnObject("null")),
    }
}
