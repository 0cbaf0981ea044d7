use covenant_canonical::{EncodingError, Fingerprint};
use covenant_core::{Denial, GateError};
use thiserror::Error;

/// Errors that can occur during journal operations.
#[derive(Error, Debug)]
pub enum JournalError {
    /// I/O error during read or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid file header (magic, version, or flags).
    #[error("invalid journal header: {0}")]
    InvalidHeader(String),
    /// Invalid frame structure (kind, reserved bytes, or length).
    #[error("invalid frame at offset {offset}: {reason}")]
    InvalidFrame {
        /// Byte offset where the frame starts.
        offset: u64,
        /// Reason for invalidity.
        reason: String,
    },
    /// Payload exceeds maximum size limit.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size.
        size: u64,
        /// Maximum allowed size.
        max: u32,
    },
    /// Payload is not valid JSON for its frame kind.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    /// Attempted to open a file that is too short to hold a header.
    #[error("file is not empty; cannot initialize header")]
    FileNotEmpty,
    /// Truncated frame detected in strict mode.
    #[error("truncated frame at offset {offset}")]
    TruncatedFrame {
        /// Byte offset where truncation occurred.
        offset: u64,
    },
}

/// Errors returned by [`Ledger`](crate::Ledger) operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The entry's signed payload cannot be encoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    /// The identity gate refused the entry.
    #[error("verification failed: {0}")]
    VerificationFailed(Denial),
    /// The stored chain or head is inconsistent; writes are halted.
    #[error("chain integrity violated at entry {sequence}: {reason}")]
    ChainIntegrity {
        /// First sequence number affected.
        sequence: u64,
        /// What did not match.
        reason: String,
    },
    /// An entry with the same signer and payload is already sealed.
    #[error("duplicate entry for fingerprint {fingerprint}")]
    DuplicateEntry {
        /// Signer of the duplicate.
        fingerprint: Fingerprint,
    },
    /// I/O error on the ledger files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Journal format error.
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
    /// Head index or entry could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<GateError> for LedgerError {
    fn from(err: GateError) -> Self {
        LedgerError::VerificationFailed(*err.denial())
    }
}
