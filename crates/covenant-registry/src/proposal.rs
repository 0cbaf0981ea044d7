//! Governance proposals.
//!
//! Proposals live in their own journal, one JSON frame of kind
//! [`FrameKind::Proposal`] per record. The proposal id is derived from the
//! canonical proposal body, so the same proposal cannot be recorded twice.

use crate::error::RegistryError;
use covenant_canonical::{Canonicalizer, Fingerprint, ProposalId};
use covenant_journal::{
    FrameKind, JournalError, JournalReader, JournalWriter, ReadMode, WriteOptions, WriterLock,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A proposal as stored in the proposal journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    /// First 16 hex digits of `sha256(canonical(proposal))`.
    pub proposal_id: ProposalId,
    /// Verified identity that submitted it.
    pub submitted_by: Fingerprint,
    /// Submission time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Proposal body as submitted.
    pub proposal: Map<String, Value>,
}

/// Content-derived id of a proposal body.
pub fn proposal_id(
    proposal: &Map<String, Value>,
    canonicalizer: &Canonicalizer,
) -> Result<ProposalId, RegistryError> {
    let canonical = canonicalizer.canonicalize(&Value::Object(proposal.clone()))?;
    let hash = Sha256::digest(&canonical.bytes);
    Ok(ProposalId::new(hex::encode(&hash[..8])))
}

struct LogState {
    ids: HashSet<ProposalId>,
    scanned: u64,
}

/// Append-only proposal journal.
///
/// Appends are serialized in-process by a mutex and across processes by a
/// `<journal>.lock` file. Before each append the journal is rescanned from
/// the last known offset, so records written by another process are seen,
/// and a torn final frame is cut off.
pub struct ProposalLog {
    path: PathBuf,
    lock_path: PathBuf,
    options: WriteOptions,
    state: Mutex<LogState>,
}

impl ProposalLog {
    /// Opens the journal, creating it when `options.create` is set.
    pub fn open(path: impl Into<PathBuf>, options: WriteOptions) -> Result<Self, RegistryError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if options.create && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Writes the header into a new file.
        JournalWriter::open(&path, options.clone())?;

        let mut name = OsString::from(path.as_os_str());
        name.push(".lock");
        let log = Self {
            lock_path: PathBuf::from(name),
            path,
            options,
            state: Mutex::new(LogState {
                ids: HashSet::new(),
                scanned: 0,
            }),
        };
        {
            let mut state = log.state.lock();
            log.catch_up(&mut state)?;
        }
        Ok(log)
    }

    /// Journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of recorded proposals seen by this handle.
    pub fn len(&self) -> usize {
        self.state.lock().ids.len()
    }

    /// Whether no proposal has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `record` unless a proposal with the same id exists.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateProposal`] if the id is already recorded.
    pub fn append(&self, record: &ProposalRecord) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let _lock = WriterLock::acquire(&self.lock_path)?;
        let valid_end = self.catch_up(&mut state)?;

        if state.ids.contains(&record.proposal_id) {
            return Err(RegistryError::DuplicateProposal {
                proposal_id: record.proposal_id.clone(),
            });
        }

        let mut writer = JournalWriter::open(&self.path, self.options.clone())?;
        if writer.len() > valid_end {
            warn!(
                path = %self.path.display(),
                offset = valid_end,
                discarded = writer.len() - valid_end,
                "truncating torn proposal frame"
            );
            writer.truncate(valid_end)?;
        }
        let end = writer.append_json(FrameKind::Proposal, record)?;

        state.ids.insert(record.proposal_id.clone());
        state.scanned = end;
        info!(
            proposal_id = %record.proposal_id,
            submitted_by = %record.submitted_by,
            "proposal recorded"
        );
        Ok(())
    }

    /// Every recorded proposal, in submission order.
    pub fn list(&self) -> Result<Vec<ProposalRecord>, RegistryError> {
        let mut reader = JournalReader::open(&self.path, ReadMode::Permissive)?;
        let mut records = Vec::new();
        while let Some(frame) = reader.read_kind(FrameKind::Proposal)? {
            let record: ProposalRecord =
                serde_json::from_slice(&frame.payload).map_err(JournalError::from)?;
            records.push(record);
        }
        Ok(records)
    }

    /// Indexes frames past `state.scanned`; returns the end of the last whole frame.
    fn catch_up(&self, state: &mut LogState) -> Result<u64, RegistryError> {
        let mut reader = JournalReader::open(&self.path, ReadMode::Permissive)?;
        if state.scanned > reader.position() {
            reader.seek_to(state.scanned)?;
        }
        let mut end = reader.position();
        while let Some(frame) = reader.read_frame()? {
            end = frame.end();
            if frame.kind != FrameKind::Proposal {
                continue;
            }
            let record: ProposalRecord =
                serde_json::from_slice(&frame.payload).map_err(JournalError::from)?;
            state.ids.insert(record.proposal_id);
        }
        state.scanned = end;
        Ok(end)
    }
}

impl std::fmt::Debug for ProposalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProposalLog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
