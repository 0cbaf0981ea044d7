//! Sealed entries and the chain hash that links them.

use covenant_canonical::{Canonicalizer, Digest, EncodingError};
use covenant_core::{RegistrationEntry, VerifiedSchemes};
use serde::{Deserialize, Serialize};

/// Domain separator for chain hashes: `b"covenant:chain:v1\0"`.
pub const CHAIN_DOMAIN_SEPARATOR: &[u8] = b"covenant:chain:v1\0";

/// Stands in for the predecessor hash of the first entry.
pub const GENESIS_SEED: &[u8] = b"covenant:genesis:v1";

/// A registration entry as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedEntry {
    /// Zero-based position in the ledger.
    pub sequence: u64,
    /// The submitted entry, signatures included.
    #[serde(flatten)]
    pub entry: RegistrationEntry,
    /// Schemes that verified when the entry was appended.
    pub verified_schemes: VerifiedSchemes,
    /// `sha256(domain ‖ predecessor ‖ canonical(entry without chain_hash))`.
    pub chain_hash: Digest,
}

#[derive(Serialize)]
struct Unsealed<'a> {
    sequence: u64,
    #[serde(flatten)]
    entry: &'a RegistrationEntry,
    verified_schemes: VerifiedSchemes,
}

impl SealedEntry {
    /// Seals `entry` as the successor of `prev`.
    pub fn seal(
        sequence: u64,
        entry: RegistrationEntry,
        verified_schemes: VerifiedSchemes,
        prev: Option<&Digest>,
        canonicalizer: &Canonicalizer,
    ) -> Result<Self, ChainError> {
        let chain_hash =
            compute_chain_hash(sequence, &entry, verified_schemes, prev, canonicalizer)?;
        Ok(Self {
            sequence,
            entry,
            verified_schemes,
            chain_hash,
        })
    }

    /// Recomputes the chain hash from `prev` and the stored fields.
    pub fn recompute(
        &self,
        prev: Option<&Digest>,
        canonicalizer: &Canonicalizer,
    ) -> Result<Digest, ChainError> {
        compute_chain_hash(
            self.sequence,
            &self.entry,
            self.verified_schemes,
            prev,
            canonicalizer,
        )
    }

    /// Canonical bytes stored in the journal frame.
    pub fn canonical_bytes(&self, canonicalizer: &Canonicalizer) -> Result<Vec<u8>, EncodingError> {
        Ok(canonicalizer.canonicalize_serializable(self)?.bytes)
    }
}

/// Why a chain hash could not be computed.
#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    /// The entry cannot be encoded canonically.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// The predecessor hash is not a well-formed digest.
    #[error("malformed predecessor hash: {0}")]
    MalformedPredecessor(#[from] covenant_canonical::ValidationError),
}

fn compute_chain_hash(
    sequence: u64,
    entry: &RegistrationEntry,
    verified_schemes: VerifiedSchemes,
    prev: Option<&Digest>,
    canonicalizer: &Canonicalizer,
) -> Result<Digest, ChainError> {
    let unsealed = Unsealed {
        sequence,
        entry,
        verified_schemes,
    };
    let bytes = canonicalizer.canonicalize_serializable(&unsealed)?.bytes;
    let prev_raw;
    let prev_bytes: &[u8] = match prev {
        Some(digest) => {
            prev_raw = digest.to_bytes()?;
            &prev_raw
        }
        None => GENESIS_SEED,
    };
    Ok(Digest::sha256_parts(&[CHAIN_DOMAIN_SEPARATOR, prev_bytes, &bytes]))
}
