//! Counter codec
//!
//! Counters are zero-payload framing headers: `{code, count}` and nothing
//! else. A counter announces how many of the following primitives (or, for
//! group counters, how many quadlets of material) belong together, which is
//! what makes incremental stream parsing possible. Each kind has a small
//! four-char form and a big eight-char form for counts past the small range.

use crate::bext;
use crate::error::CesrError;
use crate::matter;

/// Counter kinds. The wire code differs between the small and big size
/// classes; the kind is what dispatch cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterCode {
    /// Indexed signatures by the identifier's controller keys.
    ControllerIdxSigs,
    /// Indexed signatures by witnesses.
    WitnessIdxSigs,
    /// (verification key, signature) couples from non-transferable receipters.
    NonTransReceiptCouples,
    /// Enclosing group counted in quadlets of following material. A bounded
    /// group may be dropped on error without losing outer-stream sync.
    AttachmentGroup,
}

const SMALL_SOFT: usize = 2;
const BIG_SOFT: usize = 5;
const SMALL_FULL: usize = 4;
const BIG_FULL: usize = 8;

/// Largest count the small size class can carry.
pub const SMALL_MAX: u64 = (1 << (6 * SMALL_SOFT as u32)) - 1;
/// Largest count the big size class can carry.
pub const BIG_MAX: u64 = (1 << (6 * BIG_SOFT as u32)) - 1;

impl CounterCode {
    pub fn small_code(&self) -> &'static str {
        match self {
            Self::ControllerIdxSigs => "-A",
            Self::WitnessIdxSigs => "-B",
            Self::NonTransReceiptCouples => "-C",
            Self::AttachmentGroup => "-V",
        }
    }

    pub fn big_code(&self) -> &'static str {
        match self {
            Self::ControllerIdxSigs => "-0A",
            Self::WitnessIdxSigs => "-0B",
            Self::NonTransReceiptCouples => "-0C",
            Self::AttachmentGroup => "-0V",
        }
    }

    fn from_code(code: &str) -> Result<(Self, bool), CesrError> {
        let kind = match code {
            "-A" | "-0A" => Self::ControllerIdxSigs,
            "-B" | "-0B" => Self::WitnessIdxSigs,
            "-C" | "-0C" => Self::NonTransReceiptCouples,
            "-V" | "-0V" => Self::AttachmentGroup,
            _ => return Err(CesrError::UnknownCode(code.to_string())),
        };
        Ok((kind, code.len() == 3))
    }
}

/// A framing header for a group of attached material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    code: CounterCode,
    count: u64,
}

impl Counter {
    pub fn new(code: CounterCode, count: u64) -> Result<Self, CesrError> {
        if count > BIG_MAX {
            return Err(CesrError::Overflow(format!("count {count}")));
        }
        Ok(Self { code, count })
    }

    pub fn code(&self) -> CounterCode {
        self.code
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Full text size of this counter: small or big by count.
    pub fn full_size(&self) -> usize {
        if self.count <= SMALL_MAX {
            SMALL_FULL
        } else {
            BIG_FULL
        }
    }

    fn full_code(&self) -> String {
        if self.count <= SMALL_MAX {
            format!(
                "{}{}",
                self.code.small_code(),
                bext::u64_to_b64(self.count, SMALL_SOFT).unwrap_or_default()
            )
        } else {
            format!(
                "{}{}",
                self.code.big_code(),
                bext::u64_to_b64(self.count, BIG_SOFT).unwrap_or_default()
            )
        }
    }

    pub fn qb64(&self) -> String {
        self.full_code()
    }

    pub fn qb2(&self) -> Vec<u8> {
        matter::binfil(&self.full_code(), &[])
    }

    /// Decodes one counter from the front of a text stream.
    pub fn from_stream_text(stream: &str) -> Result<(Self, usize), CesrError> {
        if stream.is_empty() {
            return Err(CesrError::Shortage { needed: 1 });
        }
        if !stream.starts_with('-') {
            return Err(CesrError::UnknownCode(
                stream.chars().take(1).collect::<String>(),
            ));
        }
        if stream.len() < 2 {
            return Err(CesrError::Shortage { needed: 1 });
        }
        let big = stream.as_bytes()[1] == b'0';
        let (hs, full) = if big { (3, BIG_FULL) } else { (2, SMALL_FULL) };
        if stream.len() < full {
            return Err(CesrError::Shortage {
                needed: full - stream.len(),
            });
        }
        let frame = matter::ascii_slice(stream, full)?;
        let (code, decoded_big) = CounterCode::from_code(&frame[..hs])?;
        debug_assert_eq!(big, decoded_big);
        let count = bext::b64_to_u64(&frame[hs..full])?;
        Ok((Self { code, count }, full))
    }

    /// Decodes one counter from the front of a binary stream.
    pub fn from_stream_b2(stream: &[u8]) -> Result<(Self, usize), CesrError> {
        let lead = bext::b2_leading_chars(stream, 2)?;
        let big = lead.as_bytes()[1] == b'0';
        let full = if big { BIG_FULL } else { SMALL_FULL };
        let bfs = full * 3 / 4;
        if stream.len() < bfs {
            return Err(CesrError::Shortage {
                needed: bfs - stream.len(),
            });
        }
        let text = bext::encode_b64(&stream[..bfs]);
        let (counter, consumed) = Self::from_stream_text(&text)?;
        debug_assert_eq!(consumed, full);
        Ok((counter, bfs))
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, CesrError> {
        let (counter, consumed) = Self::from_stream_text(qb64)?;
        if consumed != qb64.len() {
            return Err(CesrError::RawSize {
                code: counter.full_code(),
                size: qb64.len(),
            });
        }
        Ok(counter)
    }
}
