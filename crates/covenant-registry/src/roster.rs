use covenant_canonical::Fingerprint;
use covenant_core::{Denial, TrustLevel};
use covenant_journal::SealedEntry;
use serde::Serialize;
use std::fmt;

/// A registered identity as shown in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    /// Label given at registration.
    pub proof_name: String,
    /// Registered signer identity.
    pub fingerprint: Fingerprint,
    /// Entry timestamp, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Ledger position of the entry.
    pub sequence: u64,
    /// `<sequence>:<chain hash>`, stable for the life of the ledger.
    pub record_id: String,
    /// Strength of the signatures that verified.
    pub trust_level: TrustLevel,
}

impl Member {
    /// Roster view of a sealed entry.
    pub fn from_sealed(sealed: &SealedEntry, trust_level: TrustLevel) -> Self {
        Self {
            proof_name: sealed.entry.proof_name.clone(),
            fingerprint: sealed.entry.fingerprint.clone(),
            timestamp: sealed.entry.timestamp,
            sequence: sealed.sequence,
            record_id: format!("{}:{}", sealed.sequence, sealed.chain_hash),
            trust_level,
        }
    }
}

/// Why an identity was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Refusal {
    /// No ledger entry names the fingerprint.
    NotRegistered,
    /// The latest entry no longer verifies.
    Denied(Denial),
    /// The entry verifies, but not strongly enough.
    InsufficientTrust {
        /// Configured minimum.
        required: TrustLevel,
        /// Level the entry reached.
        actual: TrustLevel,
    },
}

impl Refusal {
    /// Stable code for logs and operators.
    pub fn code(&self) -> &'static str {
        match self {
            Refusal::NotRegistered => "not_registered",
            Refusal::Denied(denial) => denial.reason.code(),
            Refusal::InsufficientTrust { .. } => "insufficient_trust",
        }
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NotRegistered => f.write_str("not registered"),
            Refusal::Denied(denial) => write!(f, "{denial}"),
            Refusal::InsufficientTrust { required, actual } => {
                write!(f, "trust level {actual:?} below required {required:?}")
            }
        }
    }
}

/// Outcome of [`Registrar::verify_identity`](crate::Registrar::verify_identity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityDecision {
    /// Identity that was checked.
    pub fingerprint: Fingerprint,
    /// Latest registration for the identity, if any verified.
    pub member: Option<Member>,
    /// Set when the identity is refused.
    pub refusal: Option<Refusal>,
}

impl IdentityDecision {
    /// Whether the identity is accepted.
    pub fn is_allowed(&self) -> bool {
        self.refusal.is_none()
    }

    pub(crate) fn allowed(fingerprint: Fingerprint, member: Member) -> Self {
        Self {
            fingerprint,
            member: Some(member),
            refusal: None,
        }
    }

    pub(crate) fn refused(fingerprint: Fingerprint, refusal: Refusal) -> Self {
        Self {
            fingerprint,
            member: None,
            refusal: Some(refusal),
        }
    }
}
