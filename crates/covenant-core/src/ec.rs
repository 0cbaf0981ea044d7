//! secp256k1 ECDSA over SHA-256.
//!
//! Signatures are deterministic (RFC 6979) and travel as 64 raw bytes,
//! `r || s`, hex encoded. Public keys are accepted in compressed or
//! uncompressed SEC1 form, or as the bare 64-byte `x || y` coordinates.
//!
//! [`verify`] never errors: malformed keys, malformed signatures, curve
//! mismatches and high-S signatures all yield `false`.

use crate::errors::CoreError;
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

/// Length of an encoded signature.
pub const SIGNATURE_LEN: usize = 64;

/// A secp256k1 signing key.
#[derive(Clone)]
pub struct EcKeyPair {
    signing_key: SigningKey,
}

impl EcKeyPair {
    /// Generates a fresh key from the operating system RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Loads a key from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// The 32-byte secret scalar.
    pub fn secret_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// Compressed SEC1 public key (33 bytes).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Hex form of [`EcKeyPair::public_key_bytes`].
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

impl fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// A 64-byte `r || s` signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EcSignature([u8; SIGNATURE_LEN]);

impl EcSignature {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Signs `message` (already canonical bytes) with `key`.
pub fn sign(key: &EcKeyPair, message: &[u8]) -> EcSignature {
    let signature: Signature = key.signing_key.sign(message);
    let mut raw = [0u8; SIGNATURE_LEN];
    raw.copy_from_slice(&signature.to_bytes());
    EcSignature(raw)
}

/// Checks `signature` over `message` under `public_key`.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Some(verifying_key) = parse_public_key(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(message, &signature).is_ok()
}

/// Hex-decoding wrapper around [`verify`].
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    match (hex::decode(public_key_hex), hex::decode(signature_hex)) {
        (Ok(key), Ok(sig)) => verify(&key, message, &sig),
        _ => false,
    }
}

fn parse_public_key(bytes: &[u8]) -> Option<VerifyingKey> {
    match bytes.len() {
        33 | 65 => VerifyingKey::from_sec1_bytes(bytes).ok(),
        64 => {
            let mut sec1 = [0u8; 65];
            sec1[0] = 0x04;
            sec1[1..].copy_from_slice(bytes);
            VerifyingKey::from_sec1_bytes(&sec1).ok()
        }
        _ => None,
    }
}
