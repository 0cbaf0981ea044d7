use crate::ec::{self, EcKeyPair};
use covenant_canonical::{Canonicalizer, EncodingError, Fingerprint, SigningPayload};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Signature scheme that can attest an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scheme {
    /// Self-contained secp256k1 ECDSA signature with an embedded public key.
    #[serde(rename = "ecdsa-secp256k1")]
    Ec,
    /// Detached OpenPGP signature checked by an external verifier.
    #[serde(rename = "openpgp")]
    OpenPgp,
}

impl Scheme {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ec => "ecdsa-secp256k1",
            Scheme::OpenPgp => "openpgp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of schemes that verified for an entry.
///
/// Serialized as a sorted list of scheme names so it can be chained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Scheme>", into = "Vec<Scheme>")]
pub struct VerifiedSchemes {
    /// ECDSA signature verified.
    pub ec: bool,
    /// OpenPGP signature verified with a matching fingerprint.
    pub openpgp: bool,
}

impl VerifiedSchemes {
    /// Whether no scheme verified.
    pub fn is_empty(&self) -> bool {
        !self.ec && !self.openpgp
    }

    /// Marks a scheme as verified.
    pub fn insert(&mut self, scheme: Scheme) {
        match scheme {
            Scheme::Ec => self.ec = true,
            Scheme::OpenPgp => self.openpgp = true,
        }
    }

    /// Whether `scheme` verified.
    pub fn contains(&self, scheme: Scheme) -> bool {
        match scheme {
            Scheme::Ec => self.ec,
            Scheme::OpenPgp => self.openpgp,
        }
    }

    /// Trust level reached, or `None` if nothing verified.
    pub fn trust_level(&self) -> Option<TrustLevel> {
        match (self.ec, self.openpgp) {
            (true, true) => Some(TrustLevel::Dual),
            (false, true) => Some(TrustLevel::FingerprintBound),
            (true, false) => Some(TrustLevel::SelfAttested),
            (false, false) => None,
        }
    }
}

impl From<Vec<Scheme>> for VerifiedSchemes {
    fn from(schemes: Vec<Scheme>) -> Self {
        let mut set = VerifiedSchemes::default();
        for scheme in schemes {
            set.insert(scheme);
        }
        set
    }
}

impl From<VerifiedSchemes> for Vec<Scheme> {
    fn from(set: VerifiedSchemes) -> Self {
        [Scheme::Ec, Scheme::OpenPgp]
            .into_iter()
            .filter(|s| set.contains(*s))
            .collect()
    }
}

/// How strongly an entry's signer identity is established.
///
/// An ECDSA signature alone proves possession of the embedded key but says
/// nothing about the claimed fingerprint; only the external scheme binds the
/// fingerprint to a key in the trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Only the embedded-key ECDSA signature verified.
    SelfAttested,
    /// The external signature verified against the claimed fingerprint.
    FingerprintBound,
    /// Both signatures verified.
    Dual,
}

/// A signed attestation submitted for registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    /// Human-readable label, not covered by signatures.
    pub proof_name: String,
    /// Attested content.
    pub proof_data: Map<String, Value>,
    /// Creation time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Claimed signer identity under the external scheme.
    pub fingerprint: Fingerprint,
    /// Hex-encoded 64-byte `r || s` ECDSA signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Hex-encoded secp256k1 public key (SEC1 or raw 64-byte form).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// ASCII-armored detached OpenPGP signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openpgp_signature: Option<String>,
}

impl RegistrationEntry {
    /// Creates an unsigned entry.
    pub fn new(
        proof_name: impl Into<String>,
        proof_data: Map<String, Value>,
        timestamp: u64,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            proof_name: proof_name.into(),
            proof_data,
            timestamp,
            fingerprint,
            signature: None,
            public_key: None,
            openpgp_signature: None,
        }
    }

    /// The fields every signature covers.
    pub fn signing_payload(&self) -> SigningPayload<'_> {
        SigningPayload::new(&self.proof_data, self.timestamp, &self.fingerprint)
    }

    /// Signs the payload with `key`, embedding signature and public key.
    pub fn sign_ec(
        &mut self,
        key: &EcKeyPair,
        canonicalizer: &Canonicalizer,
    ) -> Result<(), EncodingError> {
        let bytes = self.signing_payload().canonical_bytes(canonicalizer)?;
        self.signature = Some(ec::sign(key, &bytes).to_hex());
        self.public_key = Some(key.public_key_hex());
        Ok(())
    }

    /// Attaches an armored detached OpenPGP signature.
    pub fn with_openpgp_signature(mut self, armored: impl Into<String>) -> Self {
        self.openpgp_signature = Some(armored.into());
        self
    }

    /// Whether at least one signature is present.
    pub fn has_signature(&self) -> bool {
        self.signature.is_some() || self.openpgp_signature.is_some()
    }
}

/// Current time in seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
