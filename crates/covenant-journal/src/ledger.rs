//! The hash-chained registration ledger.
//!
//! Three files make up a ledger at `<path>`:
//! - `<path>`: the journal of sealed entries (canonical JSON in `Entry` frames)
//! - `<path>.head`: the committed [`LedgerHead`], replaced atomically
//! - `<path>.lock`: the cross-process writer lock
//!
//! An append writes the frame, syncs it, then replaces the head. A crash
//! between the two leaves an orphaned frame past the committed offset; readers
//! never see it and the next append truncates it.

use crate::chain::{ChainError, SealedEntry};
use crate::errors::{JournalError, LedgerError};
use crate::frame::{FrameKind, HEADER_SIZE};
use crate::head::{self, sibling, LedgerHead};
use crate::lock::WriterLock;
use crate::reader::{JournalReader, ReadMode};
use crate::writer::{JournalWriter, WriteOptions};
use covenant_canonical::{Canonicalizer, Digest, Fingerprint};
use covenant_core::{Denial, IdentityGate, RegistrationEntry, VerifiedSchemes};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Options for opening a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerOptions {
    /// Fsync the journal and head on every append.
    pub sync: bool,
    /// Create the ledger files if they do not exist.
    pub create: bool,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            sync: true,
            create: true,
        }
    }
}

/// Returned by a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// Position of the new entry.
    pub sequence: u64,
    /// Its chain hash, now the ledger head.
    pub chain_hash: Digest,
    /// Schemes that verified.
    pub verified_schemes: VerifiedSchemes,
}

/// First inconsistency found while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    /// Sequence of the first entry that cannot be trusted.
    pub sequence: u64,
    /// What did not match.
    pub reason: String,
}

/// Re-verification result for one entry.
///
/// Entries at or past a chain break have `linked == false` and are never
/// verified; their signatures are not checked.
#[derive(Debug, Clone)]
pub struct EntryVerification {
    /// Position of the frame among committed entries.
    pub sequence: u64,
    /// The stored entry, if its frame still decodes.
    pub sealed: Option<SealedEntry>,
    /// Whether the entry's chain link verified.
    pub linked: bool,
    /// Whether the link verified and the gate still allows the entry.
    pub verified: bool,
    /// Schemes that verified now.
    pub schemes: VerifiedSchemes,
    /// Why the gate refused the entry. `None` for unlinked entries.
    pub denial: Option<Denial>,
}

/// Result of [`Ledger::verify_all`].
#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    /// Committed height when the walk started.
    pub height: u64,
    /// One result per committed entry frame, in append order.
    pub entries: Vec<EntryVerification>,
    /// First broken link. Entries from here on are unverified.
    pub first_break: Option<ChainBreak>,
}

impl VerificationReport {
    /// Whether every committed entry is linked correctly.
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }

    /// Number of entries whose chain link and signatures verified.
    pub fn verified_count(&self) -> usize {
        self.entries.iter().filter(|e| e.verified).count()
    }
}

/// Mutable writer state, guarded by the in-process mutex.
struct WriterState {
    head: LedgerHead,
    seen: HashSet<(Fingerprint, Digest)>,
    halted: Option<ChainBreak>,
}

/// An append-only, hash-chained ledger of registration entries.
///
/// Appends are serialized by an in-process mutex and the `<path>.lock` file
/// lock. Readers take neither: they walk a snapshot of the committed head.
pub struct Ledger {
    path: PathBuf,
    head_path: PathBuf,
    lock_path: PathBuf,
    gate: IdentityGate,
    options: LedgerOptions,
    state: Mutex<WriterState>,
}

impl Ledger {
    /// Opens the ledger at `path`, creating it if allowed.
    ///
    /// A broken chain or inconsistent head does not fail the open; it halts
    /// writes until [`Ledger::reload`] finds the files intact.
    pub fn open(
        path: impl AsRef<Path>,
        gate: IdentityGate,
        options: LedgerOptions,
    ) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let head_path = sibling(&path, ".head");
        let lock_path = sibling(&path, ".lock");

        if options.create {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        {
            let _lock = WriterLock::acquire(&lock_path)?;
            let writer = JournalWriter::open(
                &path,
                WriteOptions {
                    sync: options.sync,
                    create: options.create,
                },
            )?;
            if head::load(&head_path)?.is_none() && writer.is_empty() {
                head::store(&head_path, &LedgerHead::genesis(), options.sync)?;
            }
        }

        let canonicalizer = gate.canonicalizer().clone();
        let state = scan(&path, &head_path, &canonicalizer)?;
        if let Some(brk) = &state.halted {
            error!(
                path = %path.display(),
                sequence = brk.sequence,
                reason = %brk.reason,
                "ledger opened with broken chain; writes halted"
            );
        } else {
            debug!(path = %path.display(), height = state.head.height, "ledger opened");
        }

        Ok(Self {
            path,
            head_path,
            lock_path,
            gate,
            options,
            state: Mutex::new(state),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The gate every append passes through.
    pub fn gate(&self) -> &IdentityGate {
        &self.gate
    }

    /// Appends a verified entry.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::VerificationFailed`] if the gate refuses the entry
    /// - [`LedgerError::Encoding`] if the payload cannot be encoded
    /// - [`LedgerError::DuplicateEntry`] for an already sealed signer and payload
    /// - [`LedgerError::ChainIntegrity`] if writes are halted or the on-disk
    ///   head moved underneath this handle (which halts writes)
    pub fn append(&self, entry: RegistrationEntry) -> Result<AppendResult, LedgerError> {
        let schemes = self.gate.require(&entry)?;
        let canonicalizer = self.gate.canonicalizer();
        let key = idempotency_key(&entry, canonicalizer)?;

        let mut state = self.state.lock();
        if let Some(brk) = &state.halted {
            return Err(LedgerError::ChainIntegrity {
                sequence: brk.sequence,
                reason: format!("writes halted: {}", brk.reason),
            });
        }
        if state.seen.contains(&key) {
            warn!(fingerprint = %entry.fingerprint, "duplicate entry rejected");
            return Err(LedgerError::DuplicateEntry {
                fingerprint: entry.fingerprint,
            });
        }

        let _lock = WriterLock::acquire(&self.lock_path)?;
        let on_disk = head::load(&self.head_path)?;
        if on_disk.as_ref() != Some(&state.head) {
            let brk = ChainBreak {
                sequence: state.head.height,
                reason: "on-disk head does not match expected head".to_string(),
            };
            error!(
                path = %self.path.display(),
                sequence = brk.sequence,
                "ledger head moved underneath writer; writes halted"
            );
            state.halted = Some(brk.clone());
            return Err(LedgerError::ChainIntegrity {
                sequence: brk.sequence,
                reason: brk.reason,
            });
        }

        let sequence = state.head.height;
        let sealed = SealedEntry::seal(
            sequence,
            entry,
            schemes,
            state.head.chain_hash.as_ref(),
            canonicalizer,
        )
        .map_err(|e| chain_error(sequence, e))?;
        let bytes = sealed.canonical_bytes(canonicalizer)?;

        let mut writer = JournalWriter::open(
            &self.path,
            WriteOptions {
                sync: self.options.sync,
                create: false,
            },
        )?;
        if writer.len() > state.head.offset {
            warn!(
                path = %self.path.display(),
                orphaned_bytes = writer.len() - state.head.offset,
                "truncating uncommitted tail"
            );
            writer.truncate(state.head.offset)?;
        } else if writer.len() < state.head.offset {
            let brk = ChainBreak {
                sequence,
                reason: "journal is shorter than its head".to_string(),
            };
            error!(
                path = %self.path.display(),
                sequence,
                "journal shorter than committed head; writes halted"
            );
            state.halted = Some(brk.clone());
            return Err(LedgerError::ChainIntegrity {
                sequence,
                reason: brk.reason,
            });
        }
        let end = writer.append_raw(FrameKind::Entry, &bytes)?;
        drop(writer);

        let new_head = LedgerHead {
            height: sequence + 1,
            offset: end,
            chain_hash: Some(sealed.chain_hash.clone()),
        };
        head::store(&self.head_path, &new_head, self.options.sync)?;

        state.head = new_head;
        state.seen.insert(key);
        info!(
            sequence,
            fingerprint = %sealed.entry.fingerprint,
            proof_name = %sealed.entry.proof_name,
            chain_hash = %sealed.chain_hash,
            "entry sealed"
        );

        Ok(AppendResult {
            sequence,
            chain_hash: sealed.chain_hash,
            verified_schemes: schemes,
        })
    }

    /// Iterates committed entries in append order, checking each link.
    ///
    /// Each call starts a fresh walk over the head committed at call time.
    pub fn list(&self) -> Result<LedgerEntries, LedgerError> {
        let head = match head::load(&self.head_path)? {
            Some(head) => Some(head),
            None => Some(self.state.lock().head.clone()),
        };
        LedgerEntries::open(&self.path, head, self.gate.canonicalizer().clone())
    }

    /// Re-checks every link and re-runs the gate on every entry.
    ///
    /// A broken link is reported in [`VerificationReport::first_break`] and
    /// halts writes. Storage failures propagate.
    pub fn verify_all(&self) -> Result<VerificationReport, LedgerError> {
        let mut entries = self.list()?;
        let mut report = VerificationReport {
            height: entries.expected_height().unwrap_or_default(),
            ..VerificationReport::default()
        };
        for item in entries.by_ref() {
            match item {
                Ok(sealed) => {
                    let decision = self.gate.check(&sealed.entry);
                    report.entries.push(EntryVerification {
                        sequence: sealed.sequence,
                        sealed: Some(sealed),
                        linked: true,
                        verified: decision.allowed,
                        schemes: decision.schemes,
                        denial: decision.denial,
                    });
                }
                Err(LedgerError::ChainIntegrity { sequence, reason }) => {
                    error!(
                        path = %self.path.display(),
                        sequence,
                        reason = %reason,
                        "chain break found"
                    );
                    let brk = ChainBreak { sequence, reason };
                    self.state.lock().halted.get_or_insert_with(|| brk.clone());
                    report.first_break = Some(brk);
                    break;
                }
                Err(other) => return Err(other),
            }
        }

        if let Some(brk) = &report.first_break {
            for (sequence, sealed) in (brk.sequence..).zip(entries.unlinked()?) {
                report.entries.push(EntryVerification {
                    sequence,
                    sealed,
                    linked: false,
                    verified: false,
                    schemes: VerifiedSchemes::default(),
                    denial: None,
                });
            }
        }
        Ok(report)
    }

    /// Number of committed entries known to this handle.
    pub fn len(&self) -> u64 {
        self.state.lock().head.height
    }

    /// Whether the ledger holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The committed head known to this handle.
    pub fn head(&self) -> LedgerHead {
        self.state.lock().head.clone()
    }

    /// Why writes are halted, if they are.
    pub fn halted(&self) -> Option<ChainBreak> {
        self.state.lock().halted.clone()
    }

    /// Whether writes are halted.
    pub fn is_halted(&self) -> bool {
        self.state.lock().halted.is_some()
    }

    /// Rescans the files, picking up other writers' appends.
    ///
    /// Clears the halt when the chain is intact again.
    pub fn reload(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let _lock = WriterLock::acquire(&self.lock_path)?;
        let fresh = scan(&self.path, &self.head_path, self.gate.canonicalizer())?;
        match &fresh.halted {
            Some(brk) => warn!(
                sequence = brk.sequence,
                reason = %brk.reason,
                "ledger still broken after reload"
            ),
            None => info!(height = fresh.head.height, "ledger reloaded"),
        }
        *state = fresh;
        Ok(())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn idempotency_key(
    entry: &RegistrationEntry,
    canonicalizer: &Canonicalizer,
) -> Result<(Fingerprint, Digest), LedgerError> {
    let (_, digest) = entry.signing_payload().encode(canonicalizer)?;
    Ok((entry.fingerprint.clone(), digest))
}

fn chain_error(sequence: u64, err: ChainError) -> LedgerError {
    match err {
        ChainError::Encoding(e) => LedgerError::Encoding(e),
        ChainError::MalformedPredecessor(e) => LedgerError::ChainIntegrity {
            sequence,
            reason: e.to_string(),
        },
    }
}

/// Rebuilds writer state from the files.
fn scan(
    path: &Path,
    head_path: &Path,
    canonicalizer: &Canonicalizer,
) -> Result<WriterState, LedgerError> {
    let stored = head::load(head_path)?;
    let mut entries = LedgerEntries::open(path, stored.clone(), canonicalizer.clone())?;
    let mut seen = HashSet::new();
    let mut halted = None;
    for item in entries.by_ref() {
        match item {
            Ok(sealed) => {
                seen.insert(idempotency_key(&sealed.entry, canonicalizer)?);
            }
            Err(LedgerError::ChainIntegrity { sequence, reason }) => {
                halted = Some(ChainBreak { sequence, reason });
                break;
            }
            Err(other) => return Err(other),
        }
    }

    let head = match stored {
        Some(head) => head,
        None => {
            halted.get_or_insert_with(|| ChainBreak {
                sequence: entries.walked_head().height,
                reason: "head index missing".to_string(),
            });
            entries.walked_head()
        }
    };
    Ok(WriterState { head, seen, halted })
}

/// Iterator over committed entries; see [`Ledger::list`].
///
/// Yields `Err(LedgerError::ChainIntegrity)` for the first broken link and
/// then stops.
pub struct LedgerEntries {
    reader: JournalReader,
    canonicalizer: Canonicalizer,
    head: Option<LedgerHead>,
    next_sequence: u64,
    prev: Option<Digest>,
    offset: u64,
    done: bool,
    rejected: Option<Vec<u8>>,
}

impl LedgerEntries {
    /// Walks the journal at `path` up to `head`, or to the last complete
    /// frame when no head is known.
    pub fn open(
        path: &Path,
        head: Option<LedgerHead>,
        canonicalizer: Canonicalizer,
    ) -> Result<Self, LedgerError> {
        let reader = match &head {
            Some(h) => JournalReader::open_bounded(path, ReadMode::Strict, h.offset)?,
            None => JournalReader::open(path, ReadMode::Permissive)?,
        };
        Ok(Self {
            reader,
            canonicalizer,
            head,
            next_sequence: 0,
            prev: None,
            offset: HEADER_SIZE as u64,
            done: false,
            rejected: None,
        })
    }

    /// Height of the head being walked, if one is known.
    pub fn expected_height(&self) -> Option<u64> {
        self.head.as_ref().map(|h| h.height)
    }

    /// Head describing the entries walked so far.
    pub fn walked_head(&self) -> LedgerHead {
        LedgerHead {
            height: self.next_sequence,
            offset: self.offset,
            chain_hash: self.prev.clone(),
        }
    }

    /// Entry frames from the first broken link onwards, decoded where possible.
    ///
    /// Meant for use after the iterator yielded `ChainIntegrity`. Stops at
    /// the committed offset or at the first frame that cannot be read.
    pub fn unlinked(mut self) -> Result<Vec<Option<SealedEntry>>, LedgerError> {
        let mut tail = Vec::new();
        if let Some(payload) = self.rejected.take() {
            tail.push(serde_json::from_slice(&payload).ok());
        }
        loop {
            match self.reader.read_frame() {
                Ok(Some(frame)) if frame.kind == FrameKind::Entry => {
                    tail.push(serde_json::from_slice(&frame.payload).ok());
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(JournalError::Io(e)) => return Err(LedgerError::Io(e)),
                Err(_) => break,
            }
        }
        Ok(tail)
    }

    fn broken(&mut self, reason: impl Into<String>) -> Option<Result<SealedEntry, LedgerError>> {
        self.done = true;
        Some(Err(LedgerError::ChainIntegrity {
            sequence: self.next_sequence,
            reason: reason.into(),
        }))
    }

    fn check(&self, payload: &[u8]) -> Result<SealedEntry, String> {
        let sealed: SealedEntry =
            serde_json::from_slice(payload).map_err(|e| format!("undecodable entry: {e}"))?;
        if sealed.sequence != self.next_sequence {
            return Err(format!(
                "sequence {} found where {} was expected",
                sealed.sequence, self.next_sequence
            ));
        }
        let expected = sealed
            .recompute(self.prev.as_ref(), &self.canonicalizer)
            .map_err(|e| format!("cannot recompute chain hash: {e}"))?;
        if expected != sealed.chain_hash {
            return Err("chain hash mismatch".to_string());
        }
        Ok(sealed)
    }

    fn check_end(&mut self) -> Option<Result<SealedEntry, LedgerError>> {
        self.done = true;
        let Some(head) = &self.head else {
            return None;
        };
        if head.height != self.next_sequence {
            let reason = format!(
                "head records {} entries but the journal holds {}",
                head.height, self.next_sequence
            );
            return self.broken(reason);
        }
        if head.chain_hash != self.prev {
            return self.broken("head chain hash does not match the last entry");
        }
        None
    }
}

impl Iterator for LedgerEntries {
    type Item = Result<SealedEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let frame = match self.reader.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return self.check_end(),
                Err(JournalError::Io(e)) => {
                    self.done = true;
                    return Some(Err(LedgerError::Io(e)));
                }
                Err(e) => return self.broken(e.to_string()),
            };
            if frame.kind != FrameKind::Entry {
                self.offset = frame.end();
                continue;
            }
            return match self.check(&frame.payload) {
                Ok(sealed) => {
                    self.next_sequence += 1;
                    self.prev = Some(sealed.chain_hash.clone());
                    self.offset = frame.end();
                    Some(Ok(sealed))
                }
                Err(reason) => {
                    self.rejected = Some(frame.payload);
                    self.broken(reason)
                }
            };
        }
    }
}
