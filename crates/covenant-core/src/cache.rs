//! Verification cache.
//!
//! Keys bind the scheme, the claimed signer, the payload digest and a digest
//! of the signature evidence (signature bytes and, for ECDSA, the embedded
//! public key). A forged signature over a previously verified payload
//! therefore misses the cache and is checked on its own merits.
//!
//! Only definite outcomes are stored. A timeout or an unavailable verifier is
//! retried on the next request.

use crate::entry::Scheme;
use crate::external::VerificationOutcome;
use covenant_canonical::{Digest, Fingerprint};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Domain separator for evidence digests.
const EVIDENCE_DOMAIN: &[u8] = b"covenant:evidence:v1\0";

/// Identifies one verification question.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Scheme the evidence belongs to.
    pub scheme: Scheme,
    /// Claimed signer.
    pub fingerprint: Fingerprint,
    /// Digest of the canonical signed payload.
    pub payload_digest: Digest,
    /// Digest of the signature material.
    pub evidence_digest: Digest,
}

impl CacheKey {
    /// Builds a key; `evidence` is every byte string the verdict depends on
    /// besides the payload.
    pub fn new(
        scheme: Scheme,
        fingerprint: Fingerprint,
        payload_digest: Digest,
        evidence: &[&[u8]],
    ) -> Self {
        let mut parts: Vec<&[u8]> = Vec::with_capacity(evidence.len() * 2 + 1);
        parts.push(EVIDENCE_DOMAIN);
        let lengths: Vec<[u8; 8]> = evidence
            .iter()
            .map(|e| (e.len() as u64).to_be_bytes())
            .collect();
        for (part, len) in evidence.iter().zip(&lengths) {
            parts.push(len);
            parts.push(*part);
        }
        Self {
            scheme,
            fingerprint,
            payload_digest,
            evidence_digest: Digest::sha256_parts(&parts),
        }
    }
}

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Maximum number of remembered outcomes.
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// Counters for observing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Outcomes currently held.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
}

/// Bounded LRU of definite verification outcomes.
///
/// Shared by reference between gates; lookups and inserts take a short
/// internal lock that is never held across a verification.
pub struct VerificationCache {
    entries: Mutex<LruCache<CacheKey, VerificationOutcome>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl VerificationCache {
    /// Creates a cache with the given options. A zero capacity is raised to one.
    pub fn new(options: CacheOptions) -> Self {
        let capacity = NonZeroUsize::new(options.capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Looks up a previous outcome.
    pub fn get(&self, key: &CacheKey) -> Option<VerificationOutcome> {
        let found = self.entries.lock().get(key).copied();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Remembers a definite outcome. Returns `false` if it was not stored.
    pub fn insert(&self, key: CacheKey, outcome: VerificationOutcome) -> bool {
        if !outcome.is_definite() {
            return false;
        }
        self.entries.lock().put(key, outcome);
        true
    }

    /// Drops every remembered outcome.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for VerificationCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl std::fmt::Debug for VerificationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationCache")
            .field("stats", &self.stats())
            .finish()
    }
}
