use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::proposal::{proposal_id, ProposalLog, ProposalRecord};
use crate::roster::{IdentityDecision, Member, Refusal};
use covenant_canonical::Fingerprint;
use covenant_core::{
    unix_now, ExternalVerifier, GpgVerifier, IdentityGate, RegistrationEntry, VerificationCache,
};
use covenant_journal::{AppendResult, Ledger, SealedEntry, WriteOptions};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registration, identity checks and proposals over one ledger.
///
/// All operations take `&self`; a `Registrar` can be shared across threads
/// behind an `Arc`.
#[derive(Debug)]
pub struct Registrar {
    config: RegistryConfig,
    ledger: Ledger,
    proposals: ProposalLog,
}

impl Registrar {
    /// Opens the ledger and proposal journal named by `config`.
    ///
    /// `external` verifies OpenPGP signatures; the verification cache is
    /// sized from `config.cache` and shared by every check this registrar
    /// performs.
    pub fn open(
        config: RegistryConfig,
        external: Arc<dyn ExternalVerifier>,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let cache = Arc::new(VerificationCache::new(config.cache));
        let gate = IdentityGate::new(external, cache);
        let ledger = Ledger::open(&config.ledger_path, gate, config.ledger)?;
        let proposals = ProposalLog::open(
            &config.proposals_path,
            WriteOptions {
                sync: config.ledger.sync,
                create: config.ledger.create,
            },
        )?;
        info!(
            ledger = %config.ledger_path.display(),
            height = ledger.len(),
            halted = ledger.is_halted(),
            "registrar opened"
        );
        Ok(Self {
            config,
            ledger,
            proposals,
        })
    }

    /// Opens the registrar with a gpg verifier built from `config.gpg`.
    pub fn open_with_gpg(config: RegistryConfig) -> Result<Self, RegistryError> {
        let verifier = GpgVerifier::new(config.gpg.clone());
        Self::open(config, Arc::new(verifier))
    }

    /// Active configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Underlying ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Runs `entry` through the gate and seals it into the ledger.
    pub fn register_member(&self, entry: RegistrationEntry) -> Result<AppendResult, RegistryError> {
        Ok(self.ledger.append(entry)?)
    }

    /// Re-verifies the latest registration for `fingerprint`.
    ///
    /// The entry's signatures are checked again (through the cache) and the
    /// resulting trust level must reach `minimum_trust`. A refusal is an
    /// `Ok` decision; `Err` means the ledger could not be read.
    pub fn verify_identity(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<IdentityDecision, RegistryError> {
        let latest = match self.latest_entry(fingerprint)? {
            Some(sealed) => sealed,
            None => {
                debug!(fingerprint = %fingerprint, "identity not registered");
                return Ok(IdentityDecision::refused(
                    fingerprint.clone(),
                    Refusal::NotRegistered,
                ));
            }
        };

        let decision = self.ledger.gate().check(&latest.entry);
        let actual = match (decision.denial, decision.trust_level()) {
            (None, Some(level)) => level,
            (Some(denial), _) => {
                return Ok(IdentityDecision::refused(
                    fingerprint.clone(),
                    Refusal::Denied(denial),
                ))
            }
            (None, None) => {
                return Ok(IdentityDecision::refused(
                    fingerprint.clone(),
                    Refusal::NotRegistered,
                ))
            }
        };

        let required = self.config.minimum_trust;
        if actual < required {
            warn!(
                fingerprint = %fingerprint,
                actual = ?actual,
                required = ?required,
                "identity below minimum trust"
            );
            return Ok(IdentityDecision::refused(
                fingerprint.clone(),
                Refusal::InsufficientTrust { required, actual },
            ));
        }

        Ok(IdentityDecision::allowed(
            fingerprint.clone(),
            Member::from_sealed(&latest, actual),
        ))
    }

    /// Like [`verify_identity`](Self::verify_identity), but a refusal is an error.
    pub fn require_identity(&self, fingerprint: &Fingerprint) -> Result<Member, RegistryError> {
        let decision = self.verify_identity(fingerprint)?;
        match (decision.refusal, decision.member) {
            (None, Some(member)) => Ok(member),
            (refusal, _) => Err(RegistryError::NotAuthorized {
                fingerprint: fingerprint.clone(),
                refusal: refusal.unwrap_or(Refusal::NotRegistered),
            }),
        }
    }

    /// Entries that still verify, in ledger order.
    ///
    /// Entries at or past a chain break are left out.
    pub fn list_members(&self) -> Result<Vec<Member>, RegistryError> {
        let report = self.ledger.verify_all()?;
        if let Some(ref broken) = report.first_break {
            warn!(
                sequence = broken.sequence,
                reason = %broken.reason,
                "roster truncated at chain break"
            );
        }
        let members = report
            .entries
            .iter()
            .filter(|e| e.verified)
            .filter_map(|e| {
                let sealed = e.sealed.as_ref()?;
                let level = e.schemes.trust_level()?;
                Some(Member::from_sealed(sealed, level))
            })
            .collect();
        Ok(members)
    }

    /// Records a proposal from a verified identity.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotAuthorized`] if `submitted_by` is refused and
    /// [`RegistryError::DuplicateProposal`] if the same body was already
    /// recorded.
    pub fn submit_proposal(
        &self,
        proposal: Map<String, Value>,
        submitted_by: &Fingerprint,
    ) -> Result<ProposalRecord, RegistryError> {
        self.require_identity(submitted_by).map_err(|err| {
            warn!(fingerprint = %submitted_by, error = %err, "proposal refused");
            err
        })?;
        let record = ProposalRecord {
            proposal_id: proposal_id(&proposal, self.ledger.gate().canonicalizer())?,
            submitted_by: submitted_by.clone(),
            timestamp: unix_now(),
            proposal,
        };
        self.proposals.append(&record)?;
        Ok(record)
    }

    /// Every recorded proposal, in submission order.
    pub fn proposals(&self) -> Result<Vec<ProposalRecord>, RegistryError> {
        self.proposals.list()
    }

    fn latest_entry(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<SealedEntry>, RegistryError> {
        let mut latest = None;
        for sealed in self.ledger.list()? {
            let sealed = sealed?;
            if sealed.entry.fingerprint == *fingerprint
                || sealed.entry.fingerprint.matches(fingerprint.as_str())
            {
                latest = Some(sealed);
            }
        }
        Ok(latest)
    }
}
