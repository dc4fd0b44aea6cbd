//! Indexed signature codec
//!
//! Indexed material reuses the primitive machinery but carries the signer's
//! position in the soft part of the code, so one counter can front an
//! arbitrary list of multi-signature attachments. Dual codes also commit to
//! an ondex, the signer's position in the prior (rotation) key list.

use crate::bext;
use crate::error::CesrError;
use crate::matter;

/// Indexed signature codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexCode {
    /// Ed25519, index and ondex equal, one soft char.
    Ed25519,
    /// Ed25519, current key list only, one soft char.
    Ed25519Crt,
    /// Ed25519, explicit index and ondex, two soft chars each.
    Ed25519Big,
    /// Ed25519, current key list only, big index.
    Ed25519BigCrt,
    /// Open-ended sized material; the index carries the payload length in
    /// quadlets rather than a list position.
    Variable,
}

/// Size table entry for an indexed code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSizage {
    pub hard: usize,
    /// Soft chars, ondex chars included.
    pub soft: usize,
    /// Chars of the soft part holding the ondex.
    pub ondex: usize,
    /// Full size in chars; `None` for open-ended codes where the index fixes
    /// the size as `index * 4 + hard + soft`.
    pub full: Option<usize>,
}

impl IndexSizage {
    pub const fn code_size(&self) -> usize {
        self.hard + self.soft
    }

    pub fn full_for(&self, index: u64) -> usize {
        match self.full {
            Some(full) => full,
            None => index as usize * 4 + self.code_size(),
        }
    }
}

impl IndexCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ed25519 => "A",
            Self::Ed25519Crt => "B",
            Self::Ed25519Big => "2A",
            Self::Ed25519BigCrt => "2B",
            Self::Variable => "0z",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CesrError> {
        match code {
            "A" => Ok(Self::Ed25519),
            "B" => Ok(Self::Ed25519Crt),
            "2A" => Ok(Self::Ed25519Big),
            "2B" => Ok(Self::Ed25519BigCrt),
            "0z" => Ok(Self::Variable),
            _ => Err(CesrError::UnknownCode(code.to_string())),
        }
    }

    pub fn sizage(&self) -> IndexSizage {
        match self {
            Self::Ed25519 | Self::Ed25519Crt => IndexSizage {
                hard: 1,
                soft: 1,
                ondex: 0,
                full: Some(88),
            },
            Self::Ed25519Big | Self::Ed25519BigCrt => IndexSizage {
                hard: 2,
                soft: 4,
                ondex: 2,
                full: Some(92),
            },
            Self::Variable => IndexSizage {
                hard: 2,
                soft: 2,
                ondex: 0,
                full: None,
            },
        }
    }

    /// True for codes whose ondex tracks the index implicitly or explicitly.
    pub fn is_dual(&self) -> bool {
        matches!(self, Self::Ed25519 | Self::Ed25519Big)
    }
}

/// Hard size of an indexed code from its leading selector character.
fn hard_size(selector: char) -> Result<usize, CesrError> {
    match selector {
        'A'..='Z' | 'a'..='z' => Ok(1),
        '0' | '2' => Ok(2),
        _ => Err(CesrError::UnknownCode(selector.to_string())),
    }
}

/// A signature qualified with its signer's key list position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSignature {
    code: IndexCode,
    index: u64,
    ondex: Option<u64>,
    raw: Vec<u8>,
}

impl IndexedSignature {
    pub fn new(
        code: IndexCode,
        index: u64,
        ondex: Option<u64>,
        raw: Vec<u8>,
    ) -> Result<Self, CesrError> {
        let sizes = code.sizage();
        let index_chars = sizes.soft - sizes.ondex;
        if index_chars < 10 && index >= 1u64 << (6 * index_chars as u32) {
            return Err(CesrError::BadIndex {
                code: code.code().to_string(),
                index,
            });
        }
        match (code.is_dual(), ondex) {
            (true, Some(o)) if sizes.ondex > 0 && o >= 1u64 << (6 * sizes.ondex as u32) => {
                return Err(CesrError::BadIndex {
                    code: code.code().to_string(),
                    index: o,
                });
            }
            (false, Some(_)) if code != IndexCode::Variable => {
                return Err(CesrError::BadIndex {
                    code: code.code().to_string(),
                    index,
                });
            }
            _ => {}
        }
        if let Some(full) = sizes.full {
            let expected = (full - sizes.code_size()) * 3 / 4;
            if raw.len() != expected {
                return Err(CesrError::RawSize {
                    code: code.code().to_string(),
                    size: raw.len(),
                });
            }
        } else if raw.len() != index as usize * 3 {
            return Err(CesrError::RawSize {
                code: code.code().to_string(),
                size: raw.len(),
            });
        }
        Ok(Self {
            code,
            index,
            ondex,
            raw,
        })
    }

    /// An Ed25519 signature where the signer holds the same position in the
    /// current and prior key lists. Picks the small or big code by index.
    pub fn new_dual(index: u32, raw: Vec<u8>) -> Result<Self, CesrError> {
        if index < 64 {
            Self::new(IndexCode::Ed25519, index as u64, Some(index as u64), raw)
        } else {
            Self::new(IndexCode::Ed25519Big, index as u64, Some(index as u64), raw)
        }
    }

    /// An Ed25519 signature indexed only against the current key list.
    pub fn new_current_only(index: u32, raw: Vec<u8>) -> Result<Self, CesrError> {
        if index < 64 {
            Self::new(IndexCode::Ed25519Crt, index as u64, None, raw)
        } else {
            Self::new(IndexCode::Ed25519BigCrt, index as u64, None, raw)
        }
    }

    pub fn code(&self) -> IndexCode {
        self.code
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn ondex(&self) -> Option<u64> {
        self.ondex
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Full code string, soft part included.
    fn full_code(&self) -> String {
        let sizes = self.code.sizage();
        let index_chars = sizes.soft - sizes.ondex;
        let mut code = self.code.code().to_string();
        // constructor bounds the index to the soft width
        code.push_str(&bext::u64_to_b64(self.index, index_chars).unwrap_or_default());
        if sizes.ondex > 0 {
            let ondex = self.ondex.unwrap_or(0);
            code.push_str(&bext::u64_to_b64(ondex, sizes.ondex).unwrap_or_default());
        }
        code
    }

    pub fn qb64(&self) -> String {
        matter::infil(&self.full_code(), &self.raw)
    }

    pub fn qb2(&self) -> Vec<u8> {
        matter::binfil(&self.full_code(), &self.raw)
    }

    pub fn full_size(&self) -> usize {
        self.code.sizage().full_for(self.index)
    }

    /// Decodes one indexed signature from the front of a text stream.
    pub fn from_stream_text(stream: &str) -> Result<(Self, usize), CesrError> {
        let selector = stream.chars().next().ok_or(CesrError::Shortage { needed: 1 })?;
        let hs = hard_size(selector)?;
        if stream.len() < hs {
            return Err(CesrError::Shortage {
                needed: hs - stream.len(),
            });
        }
        let code = IndexCode::from_code(matter::ascii_slice(stream, hs)?)?;
        let sizes = code.sizage();
        let cs = sizes.code_size();
        if stream.len() < cs {
            return Err(CesrError::Shortage {
                needed: cs - stream.len(),
            });
        }
        let soft = matter::ascii_slice(stream, cs)?;
        let index_chars = sizes.soft - sizes.ondex;
        let index = bext::b64_to_u64(&soft[hs..hs + index_chars])?;
        let ondex = match (code.is_dual(), sizes.ondex) {
            (true, 0) => Some(index),
            (true, os) => Some(bext::b64_to_u64(&soft[hs + index_chars..hs + index_chars + os])?),
            (false, _) => None,
        };
        let full = sizes.full_for(index);
        if stream.len() < full {
            return Err(CesrError::Shortage {
                needed: full - stream.len(),
            });
        }
        let raw = matter::exfil(matter::ascii_slice(stream, full)?, cs)?;
        Ok((
            Self {
                code,
                index,
                ondex,
                raw,
            },
            full,
        ))
    }

    /// Decodes one indexed signature from the front of a binary stream.
    pub fn from_stream_b2(stream: &[u8]) -> Result<(Self, usize), CesrError> {
        let first = bext::b2_leading_chars(stream, 1)?;
        let selector = first.chars().next().ok_or(CesrError::Shortage { needed: 1 })?;
        let hs = hard_size(selector)?;
        let code = IndexCode::from_code(&bext::b2_leading_chars(stream, hs)?)?;
        let sizes = code.sizage();
        let cs = sizes.code_size();
        let soft = bext::b2_leading_chars(stream, cs)?;
        let index_chars = sizes.soft - sizes.ondex;
        let index = bext::b64_to_u64(&soft[hs..hs + index_chars])?;
        let full = sizes.full_for(index);
        let bfs = full * 3 / 4;
        if stream.len() < bfs {
            return Err(CesrError::Shortage {
                needed: bfs - stream.len(),
            });
        }
        let text = bext::encode_b64(&stream[..bfs]);
        let (parsed, consumed) = Self::from_stream_text(&text)?;
        debug_assert_eq!(consumed, full);
        Ok((parsed, bfs))
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, CesrError> {
        let (parsed, consumed) = Self::from_stream_text(qb64)?;
        if consumed != qb64.len() {
            return Err(CesrError::RawSize {
                code: parsed.code.code().to_string(),
                size: qb64.len(),
            });
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_dual_roundtrip() {
        let sig = IndexedSignature::new_dual(5, vec![3u8; 64]).unwrap();
        assert_eq!(sig.code(), IndexCode::Ed25519);
        assert_eq!(sig.index(), 5);
        assert_eq!(sig.ondex(), Some(5));

        let qb64 = sig.qb64();
        assert_eq!(qb64.len(), 88);
        assert!(qb64.starts_with("AF")); // code A, index 5 -> 'F'

        let parsed = IndexedSignature::from_qb64(&qb64).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_big_dual_roundtrip() {
        let sig = IndexedSignature::new_dual(300, vec![7u8; 64]).unwrap();
        assert_eq!(sig.code(), IndexCode::Ed25519Big);
        assert_eq!(sig.qb64().len(), 92);

        let parsed = IndexedSignature::from_qb64(&sig.qb64()).unwrap();
        assert_eq!(parsed.index(), 300);
        assert_eq!(parsed.ondex(), Some(300));
    }

    #[test]
    fn test_current_only_has_no_ondex() {
        let sig = IndexedSignature::new_current_only(2, vec![1u8; 64]).unwrap();
        assert_eq!(sig.code(), IndexCode::Ed25519Crt);
        assert_eq!(sig.ondex(), None);

        let parsed = IndexedSignature::from_qb64(&sig.qb64()).unwrap();
        assert_eq!(parsed.ondex(), None);
    }

    #[test]
    fn test_binary_roundtrip() {
        for sig in [
            IndexedSignature::new_dual(0, vec![9u8; 64]).unwrap(),
            IndexedSignature::new_dual(63, vec![9u8; 64]).unwrap(),
            IndexedSignature::new_dual(64, vec![9u8; 64]).unwrap(),
            IndexedSignature::new_current_only(1, vec![9u8; 64]).unwrap(),
        ] {
            let qb2 = sig.qb2();
            let (parsed, consumed) = IndexedSignature::from_stream_b2(&qb2).unwrap();
            assert_eq!(parsed, sig);
            assert_eq!(consumed, qb2.len());
        }
    }

    #[test]
    fn test_variable_size_decode_reads_index_first() {
        // 2 quadlets of payload: raw length 6
        let sig = IndexedSignature::new(IndexCode::Variable, 2, None, vec![0xAB; 6]).unwrap();
        let qb64 = sig.qb64();
        assert_eq!(qb64.len(), 2 * 4 + 4);

        let (parsed, consumed) = IndexedSignature::from_stream_text(&qb64).unwrap();
        assert_eq!(consumed, 12);
        assert_eq!(parsed.raw(), &[0xAB; 6]);

        // truncated: the index promises more material than is buffered
        let err = IndexedSignature::from_stream_text(&qb64[..8]).unwrap_err();
        assert!(err.is_shortage());
    }

    #[test]
    fn test_index_bounds() {
        assert!(IndexedSignature::new(IndexCode::Ed25519, 64, Some(64), vec![0; 64]).is_err());
        assert!(IndexedSignature::new_dual(64, vec![0; 64]).is_ok());
    }

    #[test]
    fn test_truncation_signals_shortage() {
        let sig = IndexedSignature::new_dual(1, vec![5u8; 64]).unwrap();
        let qb64 = sig.qb64();
        for len in [0, 1, 2, 40, 87] {
            let err = IndexedSignature::from_stream_text(&qb64[..len]).unwrap_err();
            assert!(err.is_shortage(), "len {len}: {err}");
        }
    }

    #[test]
    fn test_raw_size_enforced() {
        assert!(IndexedSignature::new_dual(0, vec![0; 63]).is_err());
    }
}
