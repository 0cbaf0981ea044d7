use covenant_canonical::{EncodingError, Fingerprint, ProposalId};
use covenant_journal::{JournalError, LedgerError};
use thiserror::Error;

use crate::roster::Refusal;

/// Errors that can occur during registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration is not valid TOML for [`RegistryConfig`](crate::RegistryConfig).
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// The configuration parsed but cannot be used.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Proposal journal error.
    #[error("proposal journal error: {0}")]
    Journal(#[from] JournalError),
    /// A proposal could not be encoded canonically.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
    /// The identity did not pass verification.
    #[error("identity {fingerprint} not authorized: {refusal}")]
    NotAuthorized {
        /// Identity that was checked.
        fingerprint: Fingerprint,
        /// Why it was refused.
        refusal: Refusal,
    },
    /// A proposal with the same content was already submitted.
    #[error("duplicate proposal {proposal_id}")]
    DuplicateProposal {
        /// Content-derived id of the proposal.
        proposal_id: ProposalId,
    },
}
