use crate::error::RegistryError;
use covenant_core::{CacheOptions, GpgOptions, TrustLevel};
use covenant_journal::LedgerOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Registry configuration, usually loaded from a TOML file.
///
/// Every section is optional:
///
/// ```toml
/// ledger_path = "/var/lib/covenant/members.cvl"
/// proposals_path = "/var/lib/covenant/proposals.cvl"
/// minimum_trust = "dual"
///
/// [ledger]
/// sync = true
///
/// [cache]
/// capacity = 4096
///
/// [gpg]
/// program = "/usr/bin/gpg"
/// homedir = "/etc/covenant/keyring"
/// timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Registration ledger journal.
    pub ledger_path: PathBuf,
    /// Proposal journal.
    pub proposals_path: PathBuf,
    /// Ledger write options.
    pub ledger: LedgerOptions,
    /// Verification cache sizing.
    pub cache: CacheOptions,
    /// External verifier subprocess.
    pub gpg: GpgOptions,
    /// Lowest trust level
    /// [`Registrar::verify_identity`](crate::Registrar::verify_identity) accepts.
    pub minimum_trust: TrustLevel,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("registry/members.cvl"),
            proposals_path: PathBuf::from("registry/proposals.cvl"),
            ledger: LedgerOptions::default(),
            cache: CacheOptions::default(),
            gpg: GpgOptions::default(),
            minimum_trust: TrustLevel::FingerprintBound,
        }
    }
}

impl RegistryConfig {
    /// Configuration with both journals inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ledger_path: dir.join("members.cvl"),
            proposals_path: dir.join("proposals.cvl"),
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ConfigParse`] for malformed TOML or unknown
    /// keys and [`RegistryError::InvalidConfig`] for unusable values.
    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Checks values that deserialize but cannot work.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.ledger_path == self.proposals_path {
            return Err(RegistryError::InvalidConfig(
                "ledger_path and proposals_path must differ".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(RegistryError::InvalidConfig(
                "cache.capacity must be at least 1".to_string(),
            ));
        }
        if self.gpg.timeout_ms == 0 {
            return Err(RegistryError::InvalidConfig(
                "gpg.timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RegistryConfig::from_toml_str("").unwrap();
        assert_eq!(config, RegistryConfig::default());
        assert_eq!(config.minimum_trust, TrustLevel::FingerprintBound);
        assert_eq!(config.gpg.timeout_ms, 10_000);
        assert_eq!(config.cache.capacity, 1024);
    }

    #[test]
    fn sections_override_defaults() {
        let config = RegistryConfig::from_toml_str(
            r#"
            ledger_path = "/srv/members.cvl"
            minimum_trust = "dual"

            [ledger]
            sync = false

            [cache]
            capacity = 8

            [gpg]
            program = "/usr/bin/gpg2"
            homedir = "/etc/covenant/keyring"
            "#,
        )
        .unwrap();
        assert_eq!(config.ledger_path, PathBuf::from("/srv/members.cvl"));
        assert_eq!(config.proposals_path, PathBuf::from("registry/proposals.cvl"));
        assert_eq!(config.minimum_trust, TrustLevel::Dual);
        assert!(!config.ledger.sync);
        assert!(config.ledger.create);
        assert_eq!(config.cache.capacity, 8);
        assert_eq!(config.gpg.program, PathBuf::from("/usr/bin/gpg2"));
        assert_eq!(config.gpg.homedir, Some(PathBuf::from("/etc/covenant/keyring")));
        assert_eq!(config.gpg.timeout_ms, 10_000);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            RegistryConfig::from_toml_str("ledger = 3"),
            Err(RegistryError::ConfigParse(_))
        ));
        assert!(matches!(
            RegistryConfig::from_toml_str("minimum_trust = \"absolute\""),
            Err(RegistryError::ConfigParse(_))
        ));
    }

    #[test]
    fn unusable_values_are_rejected() {
        let same = r#"
            ledger_path = "a.cvl"
            proposals_path = "a.cvl"
        "#;
        assert!(matches!(
            RegistryConfig::from_toml_str(same),
            Err(RegistryError::InvalidConfig(_))
        ));
        assert!(matches!(
            RegistryConfig::from_toml_str("[cache]\ncapacity = 0"),
            Err(RegistryError::InvalidConfig(_))
        ));
        assert!(matches!(
            RegistryConfig::from_toml_str("[gpg]\ntimeout_ms = 0"),
            Err(RegistryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn in_dir_places_both_journals() {
        let config = RegistryConfig::in_dir(Path::new("/data"));
        assert_eq!(config.ledger_path, PathBuf::from("/data/members.cvl"));
        assert_eq!(config.proposals_path, PathBuf::from("/data/proposals.cvl"));
        config.validate().unwrap();
    }
}
