//! Next-key commitment
//!
//! An establishment event commits to its successor keys without revealing
//! them: the digest of the canonical threshold string is XORed with the
//! digest of each next key, yielding one order-independent aggregate. The
//! commitment opens once the next establishment event reveals the actual
//! threshold and keys.
//!
//! The XOR aggregation is interop-sensitive; logs verified elsewhere depend
//! on this exact construction.

use cesr::{Digest, DigestCode, Matter as _};

use crate::error::KeriError;

/// Aggregate digest committing to a future threshold and key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextCommitment {
    digest: Digest,
}

impl NextCommitment {
    /// Derives the commitment for a threshold limen and the qualified next
    /// keys.
    pub fn derive(code: DigestCode, limen: &str, keys: &[String]) -> Result<Self, KeriError> {
        if keys.is_empty() {
            return Err(KeriError::Validation(
                "Next commitment requires at least one key".to_string(),
            ));
        }
        let mut aggregate = code.digest(limen.as_bytes());
        for key in keys {
            let key_digest = code.digest(key.as_bytes());
            for (acc, byte) in aggregate.iter_mut().zip(key_digest) {
                *acc ^= byte;
            }
        }
        Ok(Self {
            digest: Digest::from_raw(code, aggregate)?,
        })
    }

    pub fn qb64(&self) -> String {
        self.digest.qb64()
    }

    /// Checks a previously committed value against revealed threshold and
    /// keys, re-deriving under the commitment's own algorithm.
    pub fn verify(commitment: &str, limen: &str, keys: &[String]) -> Result<bool, KeriError> {
        let expected = Digest::from_qb64(commitment)?;
        let derived = Self::derive(expected.algorithm(), limen, keys)?;
        Ok(derived.digest == expected)
    }
}
