//! Canonical data model primitives for covenant attestations.
//!
//! Every byte that is signed, hashed or chained is produced by this crate.
//! Payloads are encoded with the JSON Canonicalization Scheme (RFC 8785):
//! object keys are sorted at every level, insignificant whitespace is dropped
//! and numbers use the ECMAScript textual form.
//!
#![deny(missing_docs)]

/// Canonicalization helpers for deterministic hashing and signing.
pub mod canonicalizer;
/// Digest primitives and domain-separated hashing.
pub mod digest;
/// Hygiene report types emitted during canonicalization.
pub mod hygiene;
/// Identifier newtypes (fingerprints, profiles, proposal ids).
pub mod identifiers;
/// The exact payload covered by every signature.
pub mod payload;
/// Validation helpers used by canonical types.
pub mod validation;

pub use canonicalizer::{CanonicalizationResult, Canonicalizer, EncodingError, MAX_SAFE_INTEGER};
pub use digest::{payload_digest, Digest, DigestAlg};
pub use hygiene::{HygieneReport, HygieneStatus, HygieneWarning};
pub use identifiers::{Fingerprint, ProfileId, ProposalId};
pub use payload::{proof_data_from_value, SigningPayload};
pub use validation::ValidationError;
