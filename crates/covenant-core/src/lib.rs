//! Registration entries and the dual-signature verification path for covenant.
//!
//! This crate provides:
//! - The [`RegistrationEntry`] data model and the payload its signatures cover
//! - A self-contained secp256k1 ECDSA engine ([`ec`])
//! - The [`ExternalVerifier`] boundary and its GnuPG adapter ([`GpgVerifier`])
//! - A bounded, injectable [`VerificationCache`]
//! - The [`IdentityGate`] that guards every ledger-mutating operation
//!
//! Core invariants:
//! - Signatures cover `canonical({fingerprint, proof_data, timestamp})` and nothing else
//! - Every verification path resolves to a definite verified/denied decision
//! - Ambiguity, missing tools and timeouts never verify (fail-closed)
//!
#![deny(missing_docs)]

/// Verification cache keyed by signer, payload and evidence.
pub mod cache;
/// secp256k1 ECDSA signing and verification.
pub mod ec;
/// Registration entry model.
pub mod entry;
/// Error types for core operations.
pub mod errors;
/// External signature verifier boundary.
pub mod external;
/// Identity gate guarding ledger writes.
pub mod gate;
/// GnuPG subprocess adapter for the external verifier.
pub mod gpg;

pub use cache::{CacheKey, CacheOptions, CacheStats, VerificationCache};
pub use ec::{EcKeyPair, EcSignature};
pub use entry::{unix_now, RegistrationEntry, Scheme, TrustLevel, VerifiedSchemes};
pub use errors::{CoreError, GateError};
pub use external::{DenialReason, ExternalVerifier, Unavailable, VerificationOutcome};
pub use gate::{Denial, GateDecision, IdentityGate};
pub use gpg::{GpgOptions, GpgStatus, GpgVerifier};
