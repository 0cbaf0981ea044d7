//! The ledger head index.
//!
//! `<ledger>.head` records how many entries are committed, the byte offset
//! where the last committed frame ends and the last chain hash. Readers never
//! look past `offset`, so a frame written before the head is replaced stays
//! invisible. The file is replaced atomically via rename.

use crate::frame::HEADER_SIZE;
use covenant_canonical::Digest;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Committed state of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerHead {
    /// Number of committed entries.
    pub height: u64,
    /// Offset one past the last committed frame.
    pub offset: u64,
    /// Chain hash of the last committed entry.
    pub chain_hash: Option<Digest>,
}

impl LedgerHead {
    /// Head of an empty ledger.
    pub fn genesis() -> Self {
        Self {
            height: 0,
            offset: HEADER_SIZE as u64,
            chain_hash: None,
        }
    }
}

/// Path of a sibling file: `<ledger><suffix>`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Reads the head, returning `None` if the index does not exist.
pub fn load(path: &Path) -> Result<Option<LedgerHead>, crate::LedgerError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replaces the head atomically.
pub fn store(path: &Path, head: &LedgerHead, sync: bool) -> Result<(), crate::LedgerError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, head)?;
    tmp.flush()?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_head_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join("ledger.head")).unwrap().is_none());
    }

    #[test]
    fn store_replaces_previous_head() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.head");
        store(&path, &LedgerHead::genesis(), false).unwrap();
        let next = LedgerHead {
            height: 1,
            offset: 120,
            chain_hash: Some(Digest::sha256(b"x")),
        };
        store(&path, &next, true).unwrap();
        assert_eq!(load(&path).unwrap(), Some(next));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn sibling_appends_suffix() {
        assert_eq!(
            sibling(Path::new("/tmp/members.cvl"), ".head"),
            PathBuf::from("/tmp/members.cvl.head")
        );
    }
}
