use canonical_json::to_string;
use serde::Serialize;
use serde_json::Value;

use crate::hygiene::{HygieneReport, HygieneStatus, HygieneWarning};
use crate::identifiers::ProfileId;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of the default canonicalization profile.
pub const DEFAULT_PROFILE: &str = "covenant-canonical-v1";

/// Maximum nesting depth accepted for arrays and objects.
pub const MAX_DEPTH: usize = 64;

/// Largest integer magnitude an IEEE double represents exactly (2^53 - 1).
///
/// RFC 8785 writes numbers in their double form, so larger integers would
/// collapse onto their neighbours.
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Error returned when a payload cannot be encoded canonically.
#[derive(thiserror::Error, Debug)]
pub enum EncodingError {
    /// Provided JSON could not be canonicalized.
    #[error("invalid JSON structure: {0}")]
    InvalidStructure(String),
    /// Non-finite number (NaN/Infinity) detected.
    #[error("non-finite number detected at {0}")]
    NonFiniteNumber(String),
    /// Integer outside ±[`MAX_SAFE_INTEGER`].
    #[error("integer outside the exactly representable range at {0}")]
    UnsafeInteger(String),
    /// Nesting exceeds [`MAX_DEPTH`].
    #[error("nesting deeper than {max} levels at {path}")]
    TooDeep {
        /// Path where the limit was hit.
        path: String,
        /// Configured limit.
        max: usize,
    },
    /// A signed payload must be a JSON object.
    #[error("payload must be a JSON object, found {0}")]
    NotAnObject(&'static str),
    /// The value could not be converted into a JSON tree.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// Generic failure from the canonical JSON writer.
    #[error("other error: {0}")]
    Other(String),
}

/// Result of canonicalization.
#[derive(Debug)]
pub struct CanonicalizationResult {
    /// Canonical UTF-8 bytes for the input value.
    pub bytes: Vec<u8>,
    /// Hygiene report describing strict-mode validation.
    pub report: HygieneReport,
}

/// Helper for building JSON paths during validation.
#[derive(Debug, Clone)]
struct Path {
    segments: Vec<String>,
}

impl Path {
    fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    fn push_field(&self, field: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(field.to_string());
        Self { segments }
    }

    fn push_index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(format!("[{}]", index));
        Self { segments }
    }

    fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "root")
        } else {
            write!(f, "{}", self.segments.join("."))
        }
    }
}

/// Canonicalizer that emits deterministic bytes.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    profile: ProfileId,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(ProfileId::new(DEFAULT_PROFILE.to_string()))
    }
}

impl Canonicalizer {
    /// Creates a new canonicalizer for the provided profile.
    pub fn new(profile: ProfileId) -> Self {
        Self { profile }
    }

    /// Returns the profile this canonicalizer reports in hygiene output.
    pub fn profile(&self) -> &ProfileId {
        &self.profile
    }

    /// Produces canonical bytes + hygiene report.
    pub fn canonicalize(&self, value: &Value) -> Result<CanonicalizationResult, EncodingError> {
        self.canonicalize_with_report(value).map_err(|(err, _)| err)
    }

    /// Serializes `value` to a JSON tree and canonicalizes it.
    pub fn canonicalize_serializable<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<CanonicalizationResult, EncodingError> {
        let tree =
            serde_json::to_value(value).map_err(|e| EncodingError::Serialization(e.to_string()))?;
        self.canonicalize(&tree)
    }

    /// Produces canonical bytes + hygiene report, returning the report even on error.
    pub fn canonicalize_with_report(
        &self,
        value: &Value,
    ) -> Result<CanonicalizationResult, (EncodingError, HygieneReport)> {
        let mut report = HygieneReport {
            status: HygieneStatus::Ok,
            warnings: vec![],
            metrics: BTreeMap::new(),
            profile_id: self.profile.clone(),
        };

        if let Err(e) = self.validate(value, Path::root(), &mut report) {
            report.status = HygieneStatus::Invalid;
            return Err((e, report));
        }

        // RFC 8785 canonicalization
        let canonical = match to_string(value) {
            Ok(canonical) => canonical,
            Err(err) => {
                report.status = HygieneStatus::Invalid;
                return Err((EncodingError::Other(err.to_string()), report));
            }
        };

        Ok(CanonicalizationResult {
            bytes: canonical.into_bytes(),
            report,
        })
    }

    #[allow(clippy::only_used_in_recursion)]
    fn validate(
        &self,
        value: &Value,
        path: Path,
        report: &mut HygieneReport,
    ) -> Result<(), EncodingError> {
        if path.depth() > MAX_DEPTH {
            report.warnings.push(HygieneWarning::new("NestingTooDeep"));
            return Err(EncodingError::TooDeep {
                path: path.to_string(),
                max: MAX_DEPTH,
            });
        }

        match value {
            Value::Object(map) => {
                report.bump("keys", map.len() as u64);
                for (key, child) in map {
                    self.validate(child, path.push_field(key), report)?;
                }
                Ok(())
            }
            Value::Array(items) => {
                for (idx, item) in items.iter().enumerate() {
                    self.validate(item, path.push_index(idx), report)?;
                }
                Ok(())
            }
            Value::Number(num) => {
                let magnitude = match num.as_i64() {
                    Some(i) => Some(i.unsigned_abs()),
                    None => num.as_u64(),
                };
                if magnitude.is_some_and(|m| m > MAX_SAFE_INTEGER) {
                    report.warnings.push(HygieneWarning::new("UnsafeInteger"));
                    return Err(EncodingError::UnsafeInteger(path.to_string()));
                }
                if let Some(f) = num.as_f64().filter(|_| num.is_f64()) {
                    if !f.is_finite() {
                        report.warnings.push(HygieneWarning::new("NonFiniteNumber"));
                        report.bump("non_finite_numbers", 1);
                        return Err(EncodingError::NonFiniteNumber(path.to_string()));
                    }
                }
                Ok(())
            }
            Value::String(_) | Value::Bool(_) | Value::Null => Ok(()),
        }
    }
}
