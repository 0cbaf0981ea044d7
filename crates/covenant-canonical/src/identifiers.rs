use crate::validation::ValidationError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

macro_rules! newtype {
    ($name:ident, $doc:expr, $pattern:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new instance without validation; callers are responsible for conformity.
            pub fn new(value: String) -> Self {
                Self(value)
            }

            /// Parses a validated identifier from a string.
            pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
                static PATTERN: OnceLock<Regex> = OnceLock::new();
                let s = value.into();
                let re = PATTERN.get_or_init(|| Regex::new($pattern).expect("invalid regex"));
                if !re.is_match(&s) {
                    return Err(ValidationError::PatternMismatch {
                        field: stringify!($name),
                        value: s,
                    });
                }
                Ok(Self(s))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

newtype!(
    ProfileId,
    "Identifier for canonicalization profiles (pattern: `[A-Za-z0-9_-]{16,128}`)",
    r"^[A-Za-z0-9_-]{16,128}$"
);
newtype!(
    ProposalId,
    "Content-derived proposal identifier: 16 lowercase hex digits.",
    r"^[0-9a-f]{16}$"
);

/// Signer identity under the external signature scheme.
///
/// Stored verbatim. [`Fingerprint::parse`] accepts OpenPGP key ids (16 hex
/// digits) and v4/v5 fingerprints (40/64 hex digits), ignoring spaces, and
/// normalises to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint without validation.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parses and normalises a hex fingerprint.
    pub fn parse(value: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = value.into();
        let normalized = normalize(&raw);
        let hex = normalized.chars().all(|c| c.is_ascii_hexdigit());
        if !hex || !matches!(normalized.len(), 16 | 40 | 64) {
            return Err(ValidationError::PatternMismatch {
                field: "Fingerprint",
                value: raw,
            });
        }
        Ok(Self(normalized))
    }

    /// Returns the fingerprint as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full-length, case-insensitive comparison against a reported fingerprint.
    ///
    /// A shorter key id that happens to be a suffix does not match.
    pub fn matches(&self, reported: &str) -> bool {
        let ours = normalize(&self.0);
        !ours.is_empty() && ours == normalize(reported)
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(16)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

fn normalize(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPR: &str = "AC507646E0141D69CC0A1B14D5AF4F7DCCD21B79";

    #[test]
    fn parse_normalises_spacing_and_case() {
        let parsed =
            Fingerprint::parse("ac50 7646 e014 1d69 cc0a  1b14 d5af 4f7d ccd2 1b79").unwrap();
        assert_eq!(parsed.as_str(), FPR);
    }

    #[test]
    fn parse_rejects_non_hex_and_odd_lengths() {
        assert!(Fingerprint::parse("F1").is_err());
        assert!(Fingerprint::parse("ZZ507646E0141D69CC0A1B14D5AF4F7DCCD21B79").is_err());
        assert!(Fingerprint::parse(&FPR[..39]).is_err());
    }

    #[test]
    fn matches_requires_full_length() {
        let fpr = Fingerprint::new(FPR);
        assert!(fpr.matches(&FPR.to_lowercase()));
        assert!(!fpr.matches(&FPR[24..]));
        assert!(!Fingerprint::new("").matches(""));
    }

    #[test]
    fn proposal_id_pattern() {
        assert!(ProposalId::parse("0123456789abcdef").is_ok());
        assert!(ProposalId::parse("0123456789ABCDEF").is_err());
    }
}
