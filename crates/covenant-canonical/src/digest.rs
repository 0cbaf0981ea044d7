use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

use crate::validation::ValidationError;

/// Domain separator for payload digests: `b"covenant:payload:v1\0"`.
const PAYLOAD_DOMAIN_SEPARATOR: &[u8] = b"covenant:payload:v1\0";

/// Supported digest algorithms for canonical identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestAlg {
    /// SHA-256 (the only supported algorithm).
    #[serde(rename = "sha-256")]
    Sha256,
}

/// Algorithm + bytes digest, encoded as base64url without padding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    /// Digest algorithm (currently always `sha-256`).
    pub alg: DigestAlg,
    /// Base64URL (no padding) digest bytes.
    #[serde(rename = "b64")]
    pub b64: String,
}

fn b64_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{43}$").expect("invalid regex"))
}

impl Digest {
    /// Constructs a validated digest.
    pub fn new(alg: DigestAlg, b64: impl Into<String>) -> Result<Self, ValidationError> {
        let b64 = b64.into();
        if !b64_pattern().is_match(&b64) {
            return Err(ValidationError::PatternMismatch {
                field: "digest",
                value: b64,
            });
        }
        Ok(Digest { alg, b64 })
    }

    /// SHA-256 over the concatenation of `parts`.
    pub fn sha256_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self::from_raw(hasher.finalize().into())
    }

    /// SHA-256 over `bytes`.
    pub fn sha256(bytes: &[u8]) -> Self {
        Self::sha256_parts(&[bytes])
    }

    /// Wraps raw SHA-256 output.
    pub fn from_raw(raw: [u8; 32]) -> Self {
        Digest {
            alg: DigestAlg::Sha256,
            b64: URL_SAFE_NO_PAD.encode(raw),
        }
    }

    /// Decodes the digest back into its 32 raw bytes.
    pub fn to_bytes(&self) -> Result<[u8; 32], ValidationError> {
        let decoded =
            URL_SAFE_NO_PAD
                .decode(&self.b64)
                .map_err(|e| ValidationError::Undecodable {
                    field: "digest",
                    reason: e.to_string(),
                })?;
        decoded
            .try_into()
            .map_err(|v: Vec<u8>| ValidationError::Undecodable {
                field: "digest",
                reason: format!("expected 32 bytes, got {}", v.len()),
            })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha-256:{}", self.b64)
    }
}

/// Domain-separated digest of canonical payload bytes.
///
/// Formula: `sha256("covenant:payload:v1\0" || canonical_bytes)`. Used as the
/// idempotency and cache key for a signed payload.
pub fn payload_digest(canonical_bytes: &[u8]) -> Digest {
    Digest::sha256_parts(&[PAYLOAD_DOMAIN_SEPARATOR, canonical_bytes])
}
