//! Qualified unindexed signatures

use crate::error::CesrError;
use crate::matter::{self, Matter};

/// Signature algorithm, selected by the material code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigCode {
    Ed25519,
}

impl SigCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ed25519 => "0B",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CesrError> {
        match code {
            "0B" => Ok(Self::Ed25519),
            _ => Err(CesrError::UnexpectedCode(code.to_string())),
        }
    }

    pub fn raw_size(&self) -> usize {
        64
    }
}

/// An unindexed (receipt) signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    code: SigCode,
    raw: Vec<u8>,
}

impl Signature {
    pub fn from_raw(code: SigCode, raw: Vec<u8>) -> Result<Self, CesrError> {
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
            code: SigCode::from_code(&code)?,
            raw,
        })
    }

    /// Decodes one signature from the front of a text stream, returning the
    /// consumed char count alongside.
    pub fn from_stream_text(stream: &str) -> Result<(Self, usize), CesrError> {
        let (code, raw, consumed) = matter::decode_text(stream)?;
        Ok((
            Self {
                code: SigCode::from_code(&code)?,
                raw,
            },
            consumed,
        ))
    }

    /// Decodes one signature from the front of a binary stream.
    pub fn from_stream_b2(stream: &[u8]) -> Result<(Self, usize), CesrError> {
        let (code, raw, consumed) = matter::decode_b2(stream)?;
        Ok((
            Self {
                code: SigCode::from_code(&code)?,
                raw,
            },
            consumed,
        ))
    }

    pub fn algorithm(&self) -> SigCode {
        self.code
    }
}

impl Matter for Signature {
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

    #[test]
    fn test_roundtrip() {
        let sig = Signature::from_raw(SigCode::Ed25519, vec![9u8; 64]).unwrap();
        assert_eq!(sig.qb64().len(), 88);
        assert!(sig.qb64().starts_with("0B"));
        let parsed = Signature::from_qb64(&sig.qb64()).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_raw_size_enforced() {
        assert!(Signature::from_raw(SigCode::Ed25519, vec![0u8; 63]).is_err());
    }

    #[test]
    fn test_stream_decode_leaves_remainder() {
        let sig = Signature::from_raw(SigCode::Ed25519, vec![1u8; 64]).unwrap();
        let stream = format!("{}{}", sig.qb64(), "trailing");
        let (parsed, consumed) = Signature::from_stream_text(&stream).unwrap();
        assert_eq!(parsed, sig);
        assert_eq!(consumed, 88);
    }

    #[test]
    fn test_wrong_code_rejected() {
        let digest = crate::Digest::blake3_256(b"x");
        assert!(Signature::from_qb64(&digest.qb64()).is_err());
    }
}
