//! Qualified digests with algorithm agility

use blake2::Digest as _;
use sha2::Digest as _;
use sha3::Digest as _;

use crate::error::CesrError;
use crate::matter::{self, Matter};

/// Digest algorithm, selected by the material code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestCode {
    Blake3_256,
    Blake2b256,
    Blake2s256,
    Sha3_256,
    Sha2_256,
    Blake3_512,
    Sha3_512,
    Sha2_512,
}

impl DigestCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Blake3_256 => "E",
            Self::Blake2b256 => "F",
            Self::Blake2s256 => "G",
            Self::Sha3_256 => "H",
            Self::Sha2_256 => "I",
            Self::Blake3_512 => "0D",
            Self::Sha3_512 => "0F",
            Self::Sha2_512 => "0G",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CesrError> {
        match code {
            "E" => Ok(Self::Blake3_256),
            "F" => Ok(Self::Blake2b256),
            "G" => Ok(Self::Blake2s256),
            "H" => Ok(Self::Sha3_256),
            "I" => Ok(Self::Sha2_256),
            "0D" => Ok(Self::Blake3_512),
            "0F" => Ok(Self::Sha3_512),
            "0G" => Ok(Self::Sha2_512),
            _ => Err(CesrError::UnexpectedCode(code.to_string())),
        }
    }

    /// Digest length in bytes.
    pub fn raw_size(&self) -> usize {
        match self {
            Self::Blake3_512 | Self::Sha3_512 | Self::Sha2_512 => 64,
            _ => 32,
        }
    }

    /// Runs the selected algorithm over `ser`.
    pub fn digest(&self, ser: &[u8]) -> Vec<u8> {
        match self {
            Self::Blake3_256 => blake3::hash(ser).as_bytes().to_vec(),
            Self::Blake3_512 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(ser);
                let mut out = vec![0u8; 64];
                hasher.finalize_xof().fill(&mut out);
                out
            }
            Self::Blake2b256 => {
                blake2::Blake2b::<blake2::digest::consts::U32>::digest(ser).to_vec()
            }
            Self::Blake2s256 => blake2::Blake2s256::digest(ser).to_vec(),
            Self::Sha3_256 => sha3::Sha3_256::digest(ser).to_vec(),
            Self::Sha3_512 => sha3::Sha3_512::digest(ser).to_vec(),
            Self::Sha2_256 => sha2::Sha256::digest(ser).to_vec(),
            Self::Sha2_512 => sha2::Sha512::digest(ser).to_vec(),
        }
    }
}

/// A qualified digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    code: DigestCode,
    raw: Vec<u8>,
}

impl Digest {
    /// Digests `ser` under the given algorithm.
    pub fn new_with_code(code: DigestCode, ser: &[u8]) -> Self {
        Self {
            code,
            raw: code.digest(ser),
        }
    }

    /// Blake3-256 digest of `ser`, the default algorithm.
    pub fn blake3_256(ser: &[u8]) -> Self {
        Self::new_with_code(DigestCode::Blake3_256, ser)
    }

    /// Wraps an existing digest value.
    pub fn from_raw(code: DigestCode, raw: Vec<u8>) -> Result<Self, CesrError> {
        if raw.len() != code.raw_size() {
            return Err(CesrError::RawSize {
                code: code.code().to_string(),
                size: raw.len(),
            });
        }
        Ok(Self { code, raw })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, CesrError> {
        let (code, raw) = matter::decode_exact(qb64)?;
        Ok(Self {
            code: DigestCode::from_code(&code)?,
            raw,
        })
    }

    pub fn from_qb2(qb2: &[u8]) -> Result<Self, CesrError> {
        let (code, raw, consumed) = matter::decode_b2(qb2)?;
        if consumed != qb2.len() {
            return Err(CesrError::RawSize { code, size: qb2.len() });
        }
        Ok(Self {
            code: DigestCode::from_code(&code)?,
            raw,
        })
    }

    pub fn algorithm(&self) -> DigestCode {
        self.code
    }

    /// True when this digest matches `ser` under its own algorithm.
    pub fn verify(&self, ser: &[u8]) -> bool {
        self.code.digest(ser) == self.raw
    }

    /// Compares against another qualified digest of the same serialization.
    ///
    /// Equal qualified values short-circuit to true. Values under a different
    /// algorithm are equivalent when both verify against `ser` under their
    /// own algorithms; same-algorithm values that differ are a mismatch
    /// without recomputation.
    pub fn compare(&self, ser: &[u8], other: &str) -> Result<bool, CesrError> {
        if other == self.qb64() {
            return Ok(true);
        }
        let other = Digest::from_qb64(other)?;
        if other.algorithm() == self.code {
            return Ok(false);
        }
        Ok(self.verify(ser) && other.verify(ser))
    }
}

impl Matter for Digest {
    fn code(&self) -> &str {
        self.code.code()
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[DigestCode] = &[
        DigestCode::Blake3_256,
        DigestCode::Blake2b256,
        DigestCode::Blake2s256,
        DigestCode::Sha3_256,
        DigestCode::Sha2_256,
        DigestCode::Blake3_512,
        DigestCode::Sha3_512,
        DigestCode::Sha2_512,
    ];

    #[test]
    fn test_all_algorithms_roundtrip() {
        for &code in ALL {
            let digest = Digest::new_with_code(code, b"abc");
            assert_eq!(digest.raw().len(), code.raw_size());
            assert!(digest.verify(b"abc"));
            assert!(!digest.verify(b"abd"));

            let qb64 = digest.qb64();
            let parsed = Digest::from_qb64(&qb64).unwrap();
            assert_eq!(parsed, digest);

            let qb2 = digest.qb2();
            let parsed = Digest::from_qb2(&qb2).unwrap();
            assert_eq!(parsed, digest);
        }
    }

    #[test]
    fn test_code_strings() {
        for &code in ALL {
            assert_eq!(DigestCode::from_code(code.code()).unwrap(), code);
        }
        assert!(DigestCode::from_code("D").is_err());
    }

    #[test]
    fn test_blake3_default() {
        let digest = Digest::blake3_256(b"abc");
        assert_eq!(digest.algorithm(), DigestCode::Blake3_256);
        assert_eq!(digest.qb64().len(), 44);
        assert!(digest.qb64().starts_with('E'));
    }

    #[test]
    fn test_compare_equal_fast_path() {
        let digest = Digest::blake3_256(b"abc");
        assert!(digest.compare(b"abc", &digest.qb64()).unwrap());
    }

    #[test]
    fn test_compare_cross_algorithm() {
        let ser = b"the same serialization";
        let blake = Digest::blake3_256(ser);
        let sha = Digest::new_with_code(DigestCode::Sha3_256, ser);
        assert!(blake.compare(ser, &sha.qb64()).unwrap());
        assert!(sha.compare(ser, &blake.qb64()).unwrap());

        let other = Digest::new_with_code(DigestCode::Sha3_256, b"different");
        assert!(!blake.compare(ser, &other.qb64()).unwrap());
    }

    #[test]
    fn test_compare_same_algorithm_mismatch() {
        let a = Digest::blake3_256(b"a");
        let b = Digest::blake3_256(b"b");
        assert!(!a.compare(b"a", &b.qb64()).unwrap());
    }

    #[test]
    fn test_from_qb64_invalid() {
        assert!(Digest::from_qb64("invalid").is_err());
        assert!(Digest::from_qb64("").is_err());
    }
}
