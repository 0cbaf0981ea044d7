use covenant_canonical::{Canonicalizer, Fingerprint};
use covenant_core::{
    DenialReason, EcKeyPair, ExternalVerifier, IdentityGate, RegistrationEntry, Scheme,
    Unavailable, VerificationCache, VerificationOutcome,
};
use covenant_journal::{
    FrameKind, JournalReader, Ledger, LedgerError, LedgerOptions, ReadMode,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Accepts `sig:<fingerprint>` as a valid detached signature.
struct Echo;

impl ExternalVerifier for Echo {
    fn verify(&self, _: &[u8], signature: &str, fingerprint: &Fingerprint) -> VerificationOutcome {
        if signature == format!("sig:{fingerprint}") {
            VerificationOutcome::Verified
        } else {
            VerificationOutcome::Denied(DenialReason::SignatureInvalid)
        }
    }
}

fn gate() -> IdentityGate {
    IdentityGate::new(Arc::new(Echo), Arc::new(VerificationCache::default()))
}

fn ledger_path(dir: &TempDir) -> PathBuf {
    dir.path().join("members.cvl")
}

fn open(path: &Path) -> Ledger {
    Ledger::open(path, gate(), LedgerOptions::default()).unwrap()
}

fn signed(oath: &str, fingerprint: &str) -> RegistrationEntry {
    let mut entry = RegistrationEntry::new(
        "oath",
        json!({"oath": oath}).as_object().unwrap().clone(),
        1000,
        Fingerprint::new(fingerprint),
    );
    entry
        .sign_ec(&EcKeyPair::generate(), &Canonicalizer::default())
        .unwrap();
    entry
}

fn fill(ledger: &Ledger, oaths: &[&str]) {
    for oath in oaths {
        ledger.append(signed(oath, "F1")).unwrap();
    }
}

fn entry_frame_offsets(path: &Path) -> Vec<u64> {
    let mut reader = JournalReader::open(path, ReadMode::Permissive).unwrap();
    let mut offsets = Vec::new();
    while let Some(frame) = reader.read_kind(FrameKind::Entry).unwrap() {
        offsets.push(frame.offset);
    }
    offsets
}

#[test]
fn new_ledger_is_empty() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    assert!(ledger.is_empty());
    assert!(!ledger.is_halted());
    assert_eq!(ledger.list().unwrap().count(), 0);
    assert!(ledger.verify_all().unwrap().is_intact());
    assert!(dir.path().join("members.cvl.head").exists());
}

#[test]
fn appended_entries_list_in_order() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    fill(&ledger, &["first", "second", "third"]);

    let sealed: Vec<_> = ledger.list().unwrap().map(Result::unwrap).collect();
    let oaths: Vec<_> = sealed
        .iter()
        .map(|s| s.entry.proof_data["oath"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(oaths, ["first", "second", "third"]);
    assert_eq!(
        sealed.iter().map(|s| s.sequence).collect::<Vec<_>>(),
        [0, 1, 2]
    );
    assert_eq!(ledger.head().chain_hash.as_ref(), Some(&sealed[2].chain_hash));
    assert_eq!(ledger.len(), 3);
}

#[test]
fn list_is_restartable() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    fill(&ledger, &["a", "b"]);
    let first: Vec<_> = ledger.list().unwrap().map(Result::unwrap).collect();
    let second: Vec<_> = ledger.list().unwrap().map(Result::unwrap).collect();
    assert_eq!(first, second);
}

#[test]
fn append_records_verified_schemes() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));

    let ec_only = ledger.append(signed("a", "F1")).unwrap();
    assert!(ec_only.verified_schemes.contains(Scheme::Ec));
    assert!(!ec_only.verified_schemes.contains(Scheme::OpenPgp));

    let pgp_only = RegistrationEntry::new(
        "oath",
        json!({"oath": "b"}).as_object().unwrap().clone(),
        1001,
        Fingerprint::new("F2"),
    )
    .with_openpgp_signature("sig:F2");
    let result = ledger.append(pgp_only).unwrap();
    assert!(result.verified_schemes.openpgp);
    assert!(!result.verified_schemes.ec);

    let stored: Vec<_> = ledger.list().unwrap().map(Result::unwrap).collect();
    assert_eq!(stored[1].verified_schemes, result.verified_schemes);
}

#[test]
fn duplicate_entry_is_rejected() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    let entry = signed("X", "F1");
    ledger.append(entry.clone()).unwrap();

    match ledger.append(entry) {
        Err(LedgerError::DuplicateEntry { fingerprint }) => assert_eq!(fingerprint.as_str(), "F1"),
        other => panic!("expected DuplicateEntry, got {other:?}"),
    }
    assert_eq!(ledger.len(), 1);
}

#[test]
fn same_payload_resigned_is_still_a_duplicate() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    ledger.append(signed("X", "F1")).unwrap();
    assert!(matches!(
        ledger.append(signed("X", "F1")),
        Err(LedgerError::DuplicateEntry { .. })
    ));
    ledger.append(signed("X", "F2")).unwrap();
    assert_eq!(ledger.len(), 2);
}

#[test]
fn refused_entry_leaves_ledger_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let ledger = open(&path);
    let before = std::fs::read(&path).unwrap();

    let unsigned = RegistrationEntry::new(
        "oath",
        json!({"oath": "X"}).as_object().unwrap().clone(),
        1000,
        Fingerprint::new("F1"),
    );
    match ledger.append(unsigned) {
        Err(LedgerError::VerificationFailed(denial)) => {
            assert_eq!(denial.reason, DenialReason::MissingSignature)
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(ledger.is_empty());
}

#[test]
fn both_signatures_must_verify_to_append() {
    let dir = TempDir::new().unwrap();
    let ledger = open(&ledger_path(&dir));
    let entry = signed("X", "F1").with_openpgp_signature("sig:SOMEONE-ELSE");
    match ledger.append(entry) {
        Err(LedgerError::VerificationFailed(denial)) => {
            assert_eq!(denial.scheme, Some(Scheme::OpenPgp))
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
    assert!(ledger.is_empty());
}

#[test]
fn reopen_restores_head_and_duplicate_index() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let first = signed("first", "F1");
    let head = {
        let ledger = open(&path);
        ledger.append(first.clone()).unwrap();
        fill(&ledger, &["second"]);
        ledger.head()
    };

    let ledger = open(&path);
    assert_eq!(ledger.head(), head);
    assert!(!ledger.is_halted());
    assert!(matches!(
        ledger.append(first),
        Err(LedgerError::DuplicateEntry { .. })
    ));
    fill(&ledger, &["third"]);
    assert_eq!(ledger.verify_all().unwrap().verified_count(), 3);
}

#[test]
fn uncommitted_tail_is_invisible_and_truncated() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let ledger = open(&path);
    fill(&ledger, &["first"]);

    // A frame that reached the journal but whose head update never happened.
    let committed = std::fs::metadata(&path).unwrap().len();
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 0, 0, 0, 0x40, 0, 0, 0]).unwrap();
        file.write_all(b"{\"partial\":").unwrap();
    }

    assert_eq!(ledger.list().unwrap().count(), 1);
    assert!(ledger.verify_all().unwrap().is_intact());

    fill(&ledger, &["second"]);
    let offsets = entry_frame_offsets(&path);
    assert_eq!(offsets, vec![16, committed]);
    assert_eq!(ledger.verify_all().unwrap().entries.len(), 2);
}

#[test]
fn tampered_entry_breaks_chain_at_that_entry() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let ledger = open(&path);
    fill(&ledger, &["first", "second", "third"]);

    let mut bytes = std::fs::read(&path).unwrap();
    let needle = br#""oath":"second""#;
    let at = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    bytes[at + needle.len() - 6] = b'E';
    std::fs::write(&path, &bytes).unwrap();

    let report = ledger.verify_all().unwrap();
    let brk = report.first_break.clone().unwrap();
    assert_eq!(brk.sequence, 1);
    assert_eq!(report.entries.len(), 3);
    assert!(report.entries[0].linked && report.entries[0].verified);
    for unlinked in &report.entries[1..] {
        assert!(!unlinked.linked);
        assert!(!unlinked.verified);
        assert!(unlinked.denial.is_none());
        assert!(unlinked.schemes.is_empty());
    }
    let tampered = report.entries[1].sealed.as_ref().unwrap();
    assert_eq!(tampered.entry.proof_data["oath"], "sEcond");
    let third = report.entries[2].sealed.as_ref().unwrap();
    assert_eq!(third.sequence, 2);
    assert_eq!(report.verified_count(), 1);
    assert!(ledger.is_halted());

    let listed: Vec<_> = ledger.list().unwrap().collect();
    assert_eq!(listed.len(), 2);
    assert!(listed[0].is_ok());
    assert!(matches!(
        listed[1],
        Err(LedgerError::ChainIntegrity { sequence: 1, .. })
    ));

    assert!(matches!(
        ledger.append(signed("fourth", "F1")),
        Err(LedgerError::ChainIntegrity { .. })
    ));
}

#[test]
fn first_byte_of_entry_k_is_detected_at_k() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let ledger = open(&path);
    fill(&ledger, &["a", "b", "c", "d"]);

    let offsets = entry_frame_offsets(&path);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[offsets[2] as usize + 8] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let report = ledger.verify_all().unwrap();
    assert_eq!(report.first_break.as_ref().unwrap().sequence, 2);
    assert_eq!(report.height, 4);
    assert_eq!(report.entries.len() as u64, report.height);

    let sequences: Vec<_> = report.entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3]);
    let linked: Vec<_> = report.entries.iter().map(|e| e.linked).collect();
    assert_eq!(linked, vec![true, true, false, false]);
    assert!(report.entries.iter().skip(2).all(|e| !e.verified && e.denial.is_none()));

    // The flipped byte is the opening brace, so entry 2 no longer decodes.
    assert!(report.entries[2].sealed.is_none());
    assert_eq!(report.entries[3].sealed.as_ref().unwrap().sequence, 3);
}

#[test]
fn broken_ledger_opens_halted() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    {
        let ledger = open(&path);
        fill(&ledger, &["first", "second"]);
    }
    let offsets = entry_frame_offsets(&path);
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[offsets[1] as usize + 8] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let ledger = open(&path);
    assert_eq!(ledger.halted().unwrap().sequence, 1);
    assert!(matches!(
        ledger.append(signed("third", "F1")),
        Err(LedgerError::ChainIntegrity { .. })
    ));
}

#[test]
fn foreign_writer_halts_until_reload() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    let a = open(&path);
    let b = open(&path);

    fill(&a, &["from a"]);
    assert!(matches!(
        b.append(signed("from b", "F2")),
        Err(LedgerError::ChainIntegrity { sequence: 0, .. })
    ));
    assert!(b.is_halted());

    b.reload().unwrap();
    assert!(!b.is_halted());
    assert_eq!(b.len(), 1);
    b.append(signed("from b", "F2")).unwrap();
    assert_eq!(b.verify_all().unwrap().verified_count(), 2);
}

#[test]
fn missing_head_index_halts_writes_but_keeps_entries_readable() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    {
        let ledger = open(&path);
        fill(&ledger, &["first", "second"]);
    }
    std::fs::remove_file(dir.path().join("members.cvl.head")).unwrap();

    let ledger = open(&path);
    assert!(ledger.is_halted());
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger.list().unwrap().filter(Result::is_ok).count(), 2);
    assert!(ledger.append(signed("third", "F1")).is_err());
}

#[test]
fn concurrent_appends_form_one_chain() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(open(&ledger_path(&dir)));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let ledger = ledger.clone();
            std::thread::spawn(move || {
                for i in 0..5 {
                    ledger.append(signed(&format!("{t}-{i}"), "F1")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let report = ledger.verify_all().unwrap();
    assert!(report.is_intact());
    assert_eq!(report.verified_count(), 20);
    let sequences: Vec<_> = report.entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (0..20).collect::<Vec<_>>());
}

#[test]
fn readers_see_only_committed_entries_while_writing() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(open(&ledger_path(&dir)));
    let writer = {
        let ledger = ledger.clone();
        std::thread::spawn(move || {
            for i in 0..10 {
                ledger.append(signed(&format!("w{i}"), "F1")).unwrap();
            }
        })
    };
    for _ in 0..20 {
        for item in ledger.list().unwrap() {
            item.unwrap();
        }
    }
    writer.join().unwrap();
    assert_eq!(ledger.list().unwrap().count(), 10);
}

#[test]
fn unavailable_external_verifier_only_admits_ec_entries() {
    let dir = TempDir::new().unwrap();
    let gate = IdentityGate::new(Arc::new(Unavailable), Arc::new(VerificationCache::default()));
    let ledger = Ledger::open(ledger_path(&dir), gate, LedgerOptions::default()).unwrap();
    ledger.append(signed("X", "F1")).unwrap();
    let pgp = RegistrationEntry::new(
        "oath",
        json!({"oath": "Y"}).as_object().unwrap().clone(),
        1000,
        Fingerprint::new("F1"),
    )
    .with_openpgp_signature("sig:F1");
    match ledger.append(pgp) {
        Err(LedgerError::VerificationFailed(denial)) => {
            assert_eq!(denial.reason, DenialReason::TrustAnchorUnavailable)
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
}
