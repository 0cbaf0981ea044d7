use crate::identifiers::ProfileId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hygiene status for canonicalization attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HygieneStatus {
    /// The input was canonicalizable without issues.
    Ok,
    /// The input was invalid and must be rejected.
    Invalid,
}

/// Stable warning code emitted by canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HygieneWarning(String);

impl HygieneWarning {
    /// Creates a warning from a literal code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the warning code.
    pub fn code(&self) -> &str {
        &self.0
    }
}

/// Hygiene reports produced during canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HygieneReport {
    /// Overall hygiene status.
    pub status: HygieneStatus,
    /// Stable warning codes.
    pub warnings: Vec<HygieneWarning>,
    /// Counters such as the number of object keys visited.
    pub metrics: BTreeMap<String, u64>,
    /// Identifier of the canonicalization profile that produced the bytes.
    pub profile_id: ProfileId,
}

impl HygieneReport {
    /// Adds `by` to the named metric.
    pub(crate) fn bump(&mut self, metric: &str, by: u64) {
        *self.metrics.entry(metric.to_string()).or_insert(0) += by;
    }
}
