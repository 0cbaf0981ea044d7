//! The boundary to signature schemes this crate does not implement itself.

use covenant_canonical::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a signature did not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The entry carries no signature at all.
    MissingSignature,
    /// An ECDSA signature was supplied without its public key.
    MissingPublicKey,
    /// The signed payload could not be encoded.
    MalformedPayload,
    /// The signature does not cover the payload under the key.
    SignatureInvalid,
    /// A valid signature was made by a key other than the claimed one.
    FingerprintMismatch,
    /// The signing key is not in the trust store.
    KeyNotFound,
    /// The signing key is revoked or expired.
    KeyRevokedOrExpired,
    /// The verifier could not be run.
    TrustAnchorUnavailable,
    /// The verifier did not answer in time.
    Timeout,
    /// The verifier answered with something that cannot be trusted either way.
    MalformedResponse,
}

impl DenialReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::MissingSignature => "missing_signature",
            DenialReason::MissingPublicKey => "missing_public_key",
            DenialReason::MalformedPayload => "malformed_payload",
            DenialReason::SignatureInvalid => "signature_invalid",
            DenialReason::FingerprintMismatch => "fingerprint_mismatch",
            DenialReason::KeyNotFound => "key_not_found",
            DenialReason::KeyRevokedOrExpired => "key_revoked_or_expired",
            DenialReason::TrustAnchorUnavailable => "trust_anchor_unavailable",
            DenialReason::Timeout => "timeout",
            DenialReason::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of asking a verifier about one signature.
///
/// `Indeterminate` is still a refusal; it only records that the verifier,
/// not the signature, was at fault, so the outcome must not be cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Signature verified for the claimed signer.
    Verified,
    /// Signature definitively rejected.
    Denied(DenialReason),
    /// No trustworthy answer could be obtained.
    Indeterminate(DenialReason),
}

impl VerificationOutcome {
    /// Whether the signature verified.
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified)
    }

    /// Whether the outcome may be reused for the same inputs.
    pub fn is_definite(&self) -> bool {
        !matches!(self, VerificationOutcome::Indeterminate(_))
    }

    /// Reason for a refusal.
    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            VerificationOutcome::Verified => None,
            VerificationOutcome::Denied(r) | VerificationOutcome::Indeterminate(r) => Some(*r),
        }
    }
}

/// Verifies detached signatures against a trust store the engine does not own.
///
/// Implementations must resolve every call to an outcome: failures of the
/// verifier itself are reported as [`VerificationOutcome::Indeterminate`],
/// never as success.
pub trait ExternalVerifier: Send + Sync {
    /// Checks `signature` over `payload` and that it was made by `fingerprint`.
    fn verify(&self, payload: &[u8], signature: &str, fingerprint: &Fingerprint)
        -> VerificationOutcome;
}

/// Verifier for deployments without an external trust store.
///
/// Every external signature is refused, so only ECDSA-signed entries pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl ExternalVerifier for Unavailable {
    fn verify(&self, _: &[u8], _: &str, _: &Fingerprint) -> VerificationOutcome {
        VerificationOutcome::Indeterminate(DenialReason::TrustAnchorUnavailable)
    }
}
