//! Digest type and hashing primitives shared by every tree and identifier
//! in the fraudchain commitment core.
//!
//! The hash function is truncated SHA-512/256: SHA-512 run to completion
//! with the IV specified for the 512/256 variant, yielding a 32-byte output.
//! `sha2::Sha512_256` implements exactly this.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha512_256};
use std::fmt;
use thiserror::Error;

/// Width, in bytes, of every digest produced by this crate.
pub const DIGEST_LENGTH: usize = 32;

/// A fixed 32-byte digest. All tree node labels, state roots, data roots,
/// and SMT keys share this width.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(#[serde(with = "serde_bytes_array")] [u8; DIGEST_LENGTH]);

/// The all-zero digest, used as the empty-tree root and as the stand-in
/// value for a key absent from the state tree.
pub const ZERO_DIGEST: Digest = Digest([0u8; DIGEST_LENGTH]);

impl Digest {
    pub fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LENGTH] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DigestError> {
        if bytes.len() != DIGEST_LENGTH {
            return Err(DigestError::WrongLength(bytes.len()));
        }
        let mut out = [0u8; DIGEST_LENGTH];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    /// Hash of the empty byte string, used as the canonical "no value" leaf.
    pub fn hash_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha512_256::new();
        hasher.update(data);
        let mut out = [0u8; DIGEST_LENGTH];
        out.copy_from_slice(&hasher.finalize());
        Self(out)
    }
}

impl Default for Digest {
    fn default() -> Self {
        ZERO_DIGEST
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("expected a {DIGEST_LENGTH}-byte digest, got {0} bytes")]
    WrongLength(usize),
}

/// Serde helper so `Digest`'s `[u8; 32]` serializes as a flat byte array
/// rather than a 32-element sequence of integers.
mod serde_bytes_array {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(&bytes[..], serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let slice: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        slice
            .try_into()
            .map_err(|v: Vec<u8>| serde::de::Error::invalid_length(v.len(), &"32"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_32_bytes() {
        let a = Digest::hash_bytes(b"fraud proof");
        let b = Digest::hash_bytes(b"fraud proof");
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), DIGEST_LENGTH);
    }

    #[test]
    fn different_input_different_digest() {
        let a = Digest::hash_bytes(b"alpha");
        let b = Digest::hash_bytes(b"beta");
        assert_ne!(a, b);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Digest::from_slice(&[0u8; 31]).is_err());
        assert!(Digest::from_slice(&[0u8; 33]).is_err());
        assert!(Digest::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn display_and_debug_are_hex() {
        let d = Digest::hash_bytes(b"x");
        assert_eq!(format!("{d}").len(), DIGEST_LENGTH * 2);
        assert!(format!("{d:?}").starts_with("Digest("));
    }
}
