//! Append-only journal format and the hash-chained registration ledger.
//!
//! This crate provides:
//! - Framed, append-only storage for canonical JSON records
//! - Reader/writer APIs with strict and permissive modes
//! - An atomically replaced head index and a cross-process writer lock
//! - [`Ledger`], which seals gated registration entries into a hash chain
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use covenant_canonical::{Canonicalizer, Fingerprint};
//! use covenant_core::{EcKeyPair, IdentityGate, RegistrationEntry, Unavailable, VerificationCache};
//! use covenant_journal::{Ledger, LedgerOptions};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let gate = IdentityGate::new(Arc::new(Unavailable), Arc::new(VerificationCache::default()));
//! let ledger = Ledger::open("members.cvl", gate, LedgerOptions::default())?;
//!
//! let proof = json!({"oath": "X", "timestamp": 1000});
//! let proof = proof.as_object().unwrap().clone();
//! let mut entry = RegistrationEntry::new("oath", proof, 1000, Fingerprint::new("F1"));
//! entry.sign_ec(&EcKeyPair::generate(), &Canonicalizer::default())?;
//! ledger.append(entry)?;
//!
//! for sealed in ledger.list()? {
//!     println!("{}", sealed?.entry.fingerprint);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## File format
//!
//! A 16-byte header (`CVL1`, version, zero flags and reserved bytes) is
//! followed by frames of an 8-byte header (kind, three zero bytes, u32 LE
//! length) and the payload. Unknown frame kinds are skipped by readers.

#![deny(missing_docs)]

/// Sealed entries and chain hashing.
pub mod chain;
/// Error types for journal and ledger operations.
pub mod errors;
/// Frame structure and serialization.
pub mod frame;
/// Committed head index.
pub mod head;
/// The registration ledger.
pub mod ledger;
/// Cross-process writer lock.
pub mod lock;
/// Journal reader implementation.
pub mod reader;
/// Journal writer implementation.
pub mod writer;

pub use chain::{ChainError, SealedEntry, GENESIS_SEED};
pub use errors::{JournalError, LedgerError};
pub use frame::{FrameKind, JournalHeader, RecordFrame};
pub use head::LedgerHead;
pub use ledger::{
    AppendResult, ChainBreak, EntryVerification, Ledger, LedgerEntries, LedgerOptions,
    VerificationReport,
};
pub use lock::WriterLock;
pub use reader::{Frame, JournalReader, ReadMode};
pub use writer::{JournalWriter, WriteOptions};
