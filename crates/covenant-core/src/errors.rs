use crate::gate::Denial;
use thiserror::Error;

/// Core error types.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Key material could not be loaded.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// Canonical encoding failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] covenant_canonical::EncodingError),
}

/// Returned when the identity gate refuses an entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// At least one supplied signature did not verify.
    #[error("verification failed: {0}")]
    VerificationFailed(Denial),
}

impl GateError {
    /// The denial behind this error.
    pub fn denial(&self) -> &Denial {
        match self {
            GateError::VerificationFailed(denial) => denial,
        }
    }
}
