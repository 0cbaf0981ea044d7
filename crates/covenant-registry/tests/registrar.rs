use covenant_canonical::{Canonicalizer, Fingerprint};
use covenant_core::{
    DenialReason, EcKeyPair, ExternalVerifier, RegistrationEntry, TrustLevel, VerificationOutcome,
};
use covenant_journal::LedgerError;
use covenant_registry::{Refusal, Registrar, RegistryConfig, RegistryError};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

const ALICE: &str = "AC507646E0141D69CC0A1B14D5AF4F7DCCD21B79";
const BOB: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accepts `sig:<fingerprint>` until revoked.
#[derive(Default)]
struct Keyring {
    revoked: AtomicBool,
}

impl ExternalVerifier for Keyring {
    fn verify(
        &self,
        _payload: &[u8],
        signature: &str,
        fingerprint: &Fingerprint,
    ) -> VerificationOutcome {
        if self.revoked.load(Ordering::SeqCst) {
            VerificationOutcome::Denied(DenialReason::KeyRevokedOrExpired)
        } else if signature == format!("sig:{fingerprint}") {
            VerificationOutcome::Verified
        } else {
            VerificationOutcome::Denied(DenialReason::SignatureInvalid)
        }
    }
}

fn open(dir: &TempDir, keyring: Arc<Keyring>, minimum_trust: TrustLevel) -> Registrar {
    init_tracing();
    let mut config = RegistryConfig::in_dir(dir.path());
    config.ledger.sync = false;
    config.minimum_trust = minimum_trust;
    Registrar::open(config, keyring).unwrap()
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn ec_only(fpr: &str, oath: &str) -> RegistrationEntry {
    let mut entry = RegistrationEntry::new(
        "member",
        object(json!({"oath": oath})),
        1_700_000_000,
        Fingerprint::new(fpr),
    );
    entry
        .sign_ec(&EcKeyPair::generate(), &Canonicalizer::default())
        .unwrap();
    entry
}

fn dual(fpr: &str, oath: &str) -> RegistrationEntry {
    ec_only(fpr, oath).with_openpgp_signature(format!("sig:{fpr}"))
}

#[test]
fn registered_member_is_verified() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);

    let appended = registrar.register_member(dual(ALICE, "serve")).unwrap();
    assert_eq!(appended.sequence, 0);

    let decision = registrar.verify_identity(&Fingerprint::new(ALICE)).unwrap();
    assert!(decision.is_allowed());
    let member = decision.member.unwrap();
    assert_eq!(member.trust_level, TrustLevel::Dual);
    assert_eq!(member.record_id, format!("0:{}", appended.chain_hash));
}

#[test]
fn fingerprint_lookup_ignores_case_and_spacing() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(ALICE, "serve")).unwrap();

    let spaced = Fingerprint::new("ac50 7646 e014 1d69 cc0a 1b14 d5af 4f7d ccd2 1b79");
    assert!(registrar.verify_identity(&spaced).unwrap().is_allowed());
}

#[test]
fn unknown_identity_is_not_registered() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::SelfAttested);
    registrar.register_member(dual(ALICE, "serve")).unwrap();

    let decision = registrar.verify_identity(&Fingerprint::new(BOB)).unwrap();
    assert_eq!(decision.refusal, Some(Refusal::NotRegistered));
    assert!(decision.member.is_none());
}

#[test]
fn ec_only_registration_is_below_default_minimum() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(ec_only(ALICE, "serve")).unwrap();

    let decision = registrar.verify_identity(&Fingerprint::new(ALICE)).unwrap();
    assert_eq!(
        decision.refusal,
        Some(Refusal::InsufficientTrust {
            required: TrustLevel::FingerprintBound,
            actual: TrustLevel::SelfAttested,
        })
    );
}

#[test]
fn self_attested_minimum_accepts_ec_only() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::SelfAttested);
    registrar.register_member(ec_only(ALICE, "serve")).unwrap();

    let decision = registrar.verify_identity(&Fingerprint::new(ALICE)).unwrap();
    assert_eq!(decision.member.unwrap().trust_level, TrustLevel::SelfAttested);
}

#[test]
fn latest_registration_decides() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::Dual);
    registrar.register_member(ec_only(ALICE, "first")).unwrap();
    assert!(!registrar
        .verify_identity(&Fingerprint::new(ALICE))
        .unwrap()
        .is_allowed());

    registrar.register_member(dual(ALICE, "second")).unwrap();
    let member = registrar
        .require_identity(&Fingerprint::new(ALICE))
        .unwrap();
    assert_eq!(member.sequence, 1);
    assert_eq!(member.trust_level, TrustLevel::Dual);
}

#[test]
fn refused_registration_surfaces_the_denial() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    let forged = ec_only(ALICE, "serve").with_openpgp_signature(format!("sig:{BOB}"));

    match registrar.register_member(forged) {
        Err(RegistryError::Ledger(LedgerError::VerificationFailed(denial))) => {
            assert_eq!(denial.reason, DenialReason::SignatureInvalid)
        }
        other => panic!("expected a verification failure, got {other:?}"),
    }
    assert!(registrar.ledger().is_empty());
}

#[test]
fn revocation_is_seen_once_the_cache_is_cleared() {
    let dir = TempDir::new().unwrap();
    let keyring = Arc::new(Keyring::default());
    let registrar = open(&dir, keyring.clone(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(ALICE, "serve")).unwrap();
    registrar.register_member(dual(BOB, "serve")).unwrap();
    assert_eq!(registrar.list_members().unwrap().len(), 2);

    keyring.revoked.store(true, Ordering::SeqCst);
    assert!(registrar
        .verify_identity(&Fingerprint::new(ALICE))
        .unwrap()
        .is_allowed());

    registrar.ledger().gate().cache().clear();
    let decision = registrar.verify_identity(&Fingerprint::new(ALICE)).unwrap();
    match decision.refusal {
        Some(Refusal::Denied(denial)) => {
            assert_eq!(denial.reason, DenialReason::KeyRevokedOrExpired)
        }
        other => panic!("expected a denial, got {other:?}"),
    }
    assert!(registrar.list_members().unwrap().is_empty());
}

#[test]
fn roster_lists_members_in_ledger_order() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(BOB, "b")).unwrap();
    registrar.register_member(ec_only(ALICE, "a")).unwrap();

    let members = registrar.list_members().unwrap();
    let summary: Vec<_> = members
        .iter()
        .map(|m| (m.fingerprint.as_str(), m.sequence, m.trust_level))
        .collect();
    assert_eq!(
        summary,
        vec![
            (BOB, 0, TrustLevel::Dual),
            (ALICE, 1, TrustLevel::SelfAttested),
        ]
    );
    assert!(members.iter().all(|m| m.proof_name == "member"));
}

#[test]
fn verified_member_submits_a_proposal() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(ALICE, "serve")).unwrap();

    let proposal = object(json!({
        "title": "Adopt the charter",
        "description": "Ratify version 2 of the charter."
    }));
    let record = registrar
        .submit_proposal(proposal.clone(), &Fingerprint::new(ALICE))
        .unwrap();
    assert_eq!(record.proposal_id.to_string().len(), 16);
    assert_eq!(record.submitted_by.as_str(), ALICE);
    assert_eq!(record.proposal, proposal);

    assert_eq!(registrar.proposals().unwrap(), vec![record]);
}

#[test]
fn unverified_identity_cannot_propose() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(ec_only(ALICE, "serve")).unwrap();

    for fpr in [ALICE, BOB] {
        let err = registrar
            .submit_proposal(object(json!({"title": "x"})), &Fingerprint::new(fpr))
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotAuthorized { .. }), "{err}");
    }
    assert!(registrar.proposals().unwrap().is_empty());
}

#[test]
fn replayed_proposal_is_rejected_across_reopen() {
    let dir = TempDir::new().unwrap();
    let proposal = object(json!({"title": "Budget", "amount": 10}));
    {
        let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
        registrar.register_member(dual(ALICE, "serve")).unwrap();
        registrar.register_member(dual(BOB, "serve")).unwrap();
        registrar
            .submit_proposal(proposal.clone(), &Fingerprint::new(ALICE))
            .unwrap();
    }

    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    let reordered: Map<String, Value> =
        serde_json::from_str(r#"{"amount": 10, "title": "Budget"}"#).unwrap();
    match registrar.submit_proposal(reordered, &Fingerprint::new(BOB)) {
        Err(RegistryError::DuplicateProposal { proposal_id }) => {
            assert_eq!(registrar.proposals().unwrap()[0].proposal_id, proposal_id)
        }
        other => panic!("expected a duplicate, got {other:?}"),
    }
}

#[test]
fn proposals_from_another_handle_are_seen() {
    let dir = TempDir::new().unwrap();
    let first = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    first.register_member(dual(ALICE, "serve")).unwrap();
    let second = open(&dir, Arc::default(), TrustLevel::FingerprintBound);

    let proposal = object(json!({"title": "Once"}));
    first
        .submit_proposal(proposal.clone(), &Fingerprint::new(ALICE))
        .unwrap();
    assert!(matches!(
        second.submit_proposal(proposal, &Fingerprint::new(ALICE)),
        Err(RegistryError::DuplicateProposal { .. })
    ));
    assert_eq!(second.proposals().unwrap().len(), 1);
}

#[test]
fn append_resumes_after_frames_already_indexed() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(ALICE, "serve")).unwrap();
    registrar
        .submit_proposal(object(json!({"title": "one"})), &Fingerprint::new(ALICE))
        .unwrap();

    // Damage the first frame header, which this handle has already indexed.
    let path = dir.path().join("proposals.cvl");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[17] = 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    registrar
        .submit_proposal(object(json!({"title": "two"})), &Fingerprint::new(ALICE))
        .unwrap();
    assert!(registrar.proposals().is_err());
}

#[test]
fn torn_proposal_frame_is_cut_before_the_next_append() {
    let dir = TempDir::new().unwrap();
    let registrar = open(&dir, Arc::default(), TrustLevel::FingerprintBound);
    registrar.register_member(dual(ALICE, "serve")).unwrap();
    registrar
        .submit_proposal(object(json!({"title": "one"})), &Fingerprint::new(ALICE))
        .unwrap();

    let path = dir.path().join("proposals.cvl");
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0x02, 0, 0, 0, 0xFF, 0, 0, 0, b'{']).unwrap();
    drop(file);

    registrar
        .submit_proposal(object(json!({"title": "two"})), &Fingerprint::new(ALICE))
        .unwrap();
    let titles: Vec<_> = registrar
        .proposals()
        .unwrap()
        .into_iter()
        .map(|r| r.proposal["title"].clone())
        .collect();
    assert_eq!(titles, vec![json!("one"), json!("two")]);
}

#[test]
fn config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("registry.toml");
    let ledger = dir.path().join("data").join("members.cvl");
    let proposals = dir.path().join("data").join("proposals.cvl");
    std::fs::write(
        &config_path,
        format!(
            "ledger_path = {:?}\nproposals_path = {:?}\n\
             minimum_trust = \"self_attested\"\n\n[ledger]\nsync = false\n",
            ledger.display().to_string(),
            proposals.display().to_string(),
        ),
    )
    .unwrap();

    let config = RegistryConfig::load(&config_path).unwrap();
    let registrar = Registrar::open(config, Arc::new(Keyring::default())).unwrap();
    registrar.register_member(ec_only(ALICE, "serve")).unwrap();
    assert!(ledger.exists());
    assert!(proposals.exists());
    assert!(registrar
        .verify_identity(&Fingerprint::new(ALICE))
        .unwrap()
        .is_allowed());
}
