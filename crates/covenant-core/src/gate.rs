//! The identity gate.
//!
//! Every operation that mutates the ledger runs its entry through
//! [`IdentityGate::check`] first. The gate re-encodes the signed payload,
//! verifies each supplied signature (consulting the shared cache), and only
//! allows the entry when every supplied signature verified and at least one
//! was supplied.

use crate::cache::{CacheKey, VerificationCache};
use crate::ec;
use crate::entry::{RegistrationEntry, Scheme, TrustLevel, VerifiedSchemes};
use crate::errors::GateError;
use crate::external::{DenialReason, ExternalVerifier, VerificationOutcome};
use covenant_canonical::{Canonicalizer, Digest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why the gate refused an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Denial {
    /// Scheme whose signature failed, if the failure was scheme-specific.
    pub scheme: Option<Scheme>,
    /// Reason reported by the verifier.
    pub reason: DenialReason,
}

impl Denial {
    fn new(scheme: Option<Scheme>, reason: DenialReason) -> Self {
        Self { scheme, reason }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Some(scheme) => write!(f, "{scheme}: {}", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Outcome of running an entry through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    /// Whether the guarded operation may proceed.
    pub allowed: bool,
    /// Schemes that verified.
    pub schemes: VerifiedSchemes,
    /// Why the entry was refused.
    pub denial: Option<Denial>,
}

impl GateDecision {
    fn allow(schemes: VerifiedSchemes) -> Self {
        Self {
            allowed: true,
            schemes,
            denial: None,
        }
    }

    fn deny(schemes: VerifiedSchemes, denial: Denial) -> Self {
        Self {
            allowed: false,
            schemes,
            denial: Some(denial),
        }
    }

    /// Trust level of an allowed entry.
    pub fn trust_level(&self) -> Option<TrustLevel> {
        if self.allowed {
            self.schemes.trust_level()
        } else {
            None
        }
    }

    /// Converts the decision into a result for `?` at call sites.
    pub fn into_result(self) -> Result<VerifiedSchemes, GateError> {
        match (self.allowed, self.denial) {
            (true, _) => Ok(self.schemes),
            (false, Some(denial)) => Err(GateError::VerificationFailed(denial)),
            (false, None) => Err(GateError::VerificationFailed(Denial::new(
                None,
                DenialReason::MissingSignature,
            ))),
        }
    }
}

/// Verification gate shared by all ledger writers.
#[derive(Clone)]
pub struct IdentityGate {
    canonicalizer: Canonicalizer,
    external: Arc<dyn ExternalVerifier>,
    cache: Arc<VerificationCache>,
}

impl IdentityGate {
    /// Creates a gate that checks external signatures with `external`.
    pub fn new(external: Arc<dyn ExternalVerifier>, cache: Arc<VerificationCache>) -> Self {
        Self {
            canonicalizer: Canonicalizer::default(),
            external,
            cache,
        }
    }

    /// Replaces the canonicalizer used to rebuild signed payloads.
    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// The canonicalizer used to rebuild signed payloads.
    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// The shared verification cache.
    pub fn cache(&self) -> &Arc<VerificationCache> {
        &self.cache
    }

    /// Decides whether `entry` may be written.
    pub fn check(&self, entry: &RegistrationEntry) -> GateDecision {
        let mut schemes = VerifiedSchemes::default();
        if !entry.has_signature() {
            return self.refuse(entry, schemes, Denial::new(None, DenialReason::MissingSignature));
        }

        let (bytes, digest) = match entry.signing_payload().encode(&self.canonicalizer) {
            Ok(encoded) => encoded,
            Err(e) => {
                debug!(error = %e, "signed payload cannot be encoded");
                let denial = Denial::new(None, DenialReason::MalformedPayload);
                return self.refuse(entry, schemes, denial);
            }
        };

        if let Some(signature) = entry.signature.as_deref() {
            match self.check_ec(entry, signature, &bytes, &digest) {
                VerificationOutcome::Verified => schemes.insert(Scheme::Ec),
                other => {
                    let reason = other.reason().unwrap_or(DenialReason::SignatureInvalid);
                    let denial = Denial::new(Some(Scheme::Ec), reason);
                    return self.refuse(entry, schemes, denial);
                }
            }
        }

        if let Some(armored) = entry.openpgp_signature.as_deref() {
            match self.check_openpgp(entry, armored, &bytes, &digest) {
                VerificationOutcome::Verified => schemes.insert(Scheme::OpenPgp),
                other => {
                    let reason = other.reason().unwrap_or(DenialReason::SignatureInvalid);
                    let denial = Denial::new(Some(Scheme::OpenPgp), reason);
                    return self.refuse(entry, schemes, denial);
                }
            }
        }

        GateDecision::allow(schemes)
    }

    /// Like [`IdentityGate::check`], failing with [`GateError`] on refusal.
    pub fn require(&self, entry: &RegistrationEntry) -> Result<VerifiedSchemes, GateError> {
        self.check(entry).into_result()
    }

    fn check_ec(
        &self,
        entry: &RegistrationEntry,
        signature: &str,
        bytes: &[u8],
        digest: &Digest,
    ) -> VerificationOutcome {
        let Some(public_key) = entry.public_key.as_deref() else {
            return VerificationOutcome::Denied(DenialReason::MissingPublicKey);
        };
        let key = CacheKey::new(
            Scheme::Ec,
            entry.fingerprint.clone(),
            digest.clone(),
            &[signature.as_bytes(), public_key.as_bytes()],
        );
        self.cached(key, || {
            if ec::verify_hex(public_key, bytes, signature) {
                VerificationOutcome::Verified
            } else {
                VerificationOutcome::Denied(DenialReason::SignatureInvalid)
            }
        })
    }

    fn check_openpgp(
        &self,
        entry: &RegistrationEntry,
        armored: &str,
        bytes: &[u8],
        digest: &Digest,
    ) -> VerificationOutcome {
        let key = CacheKey::new(
            Scheme::OpenPgp,
            entry.fingerprint.clone(),
            digest.clone(),
            &[armored.as_bytes()],
        );
        self.cached(key, || self.external.verify(bytes, armored, &entry.fingerprint))
    }

    fn cached(
        &self,
        key: CacheKey,
        verify: impl FnOnce() -> VerificationOutcome,
    ) -> VerificationOutcome {
        if let Some(outcome) = self.cache.get(&key) {
            debug!(
                scheme = %key.scheme,
                fingerprint = key.fingerprint.short(),
                "verification cache hit"
            );
            return outcome;
        }
        let outcome = verify();
        self.cache.insert(key, outcome);
        outcome
    }

    fn refuse(
        &self,
        entry: &RegistrationEntry,
        schemes: VerifiedSchemes,
        denial: Denial,
    ) -> GateDecision {
        warn!(
            fingerprint = entry.fingerprint.short(),
            proof_name = %entry.proof_name,
            reason = denial.reason.code(),
            scheme = denial.scheme.map(|s| s.as_str()).unwrap_or("-"),
            "identity gate refused entry"
        );
        GateDecision::deny(schemes, denial)
    }
}

impl fmt::Debug for IdentityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityGate")
            .field("profile", self.canonicalizer.profile())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
