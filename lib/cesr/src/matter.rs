//! Primitive codec
//!
//! Every fixed-length primitive (key, digest, signature, seed) is a pair of
//! `{code, raw}` where the code selects an entry in a static size table.
//! The table entry `(hard, soft, full)` fixes the exact text length, and the
//! raw length falls out as `(full - hard - soft) * 3 / 4`.
//!
//! Text form: code characters followed by the base64 of the raw material,
//! with the code occupying the positions base64 padding would have used
//! (`code_len % 4 == pad_len`). Binary form: the code packed into 6-bit
//! sextets, left-aligned, concatenated with the raw bytes. The two forms are
//! bijective: the binary form is exactly the base64 decoding of the text
//! form.

use crate::bext;
use crate::error::CesrError;

/// Size table entry for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizage {
    /// Stable (hard) part of the code, in chars.
    pub hard: usize,
    /// Variable (soft) part of the code, in chars. Zero for all basic
    /// material; indexed material stores its index here.
    pub soft: usize,
    /// Full primitive size in text-domain chars. Always a multiple of four.
    pub full: usize,
}

impl Sizage {
    pub const fn code_size(&self) -> usize {
        self.hard + self.soft
    }

    /// Raw material length in bytes implied by this entry.
    pub const fn raw_size(&self) -> usize {
        (self.full - self.code_size()) * 3 / 4
    }

    /// Full primitive size in binary-domain bytes.
    pub const fn binary_size(&self) -> usize {
        self.full * 3 / 4
    }
}

/// All basic material codes.
pub const CODES: &[(&str, Sizage)] = &[
    // 32-byte material, one-char codes
    ("A", Sizage { hard: 1, soft: 0, full: 44 }), // Ed25519 seed
    ("B", Sizage { hard: 1, soft: 0, full: 44 }), // Ed25519 non-transferable public key
    ("D", Sizage { hard: 1, soft: 0, full: 44 }), // Ed25519 public key
    ("E", Sizage { hard: 1, soft: 0, full: 44 }), // Blake3-256 digest
    ("F", Sizage { hard: 1, soft: 0, full: 44 }), // Blake2b-256 digest
    ("G", Sizage { hard: 1, soft: 0, full: 44 }), // Blake2s-256 digest
    ("H", Sizage { hard: 1, soft: 0, full: 44 }), // SHA3-256 digest
    ("I", Sizage { hard: 1, soft: 0, full: 44 }), // SHA2-256 digest
    // 64-byte material, two-char codes
    ("0B", Sizage { hard: 2, soft: 0, full: 88 }), // Ed25519 signature
    ("0D", Sizage { hard: 2, soft: 0, full: 88 }), // Blake3-512 digest
    ("0F", Sizage { hard: 2, soft: 0, full: 88 }), // SHA3-512 digest
    ("0G", Sizage { hard: 2, soft: 0, full: 88 }), // SHA2-512 digest
];

/// Hard size of a code from its leading selector character.
pub fn hard_size(selector: char) -> Result<usize, CesrError> {
    match selector {
        'A'..='Z' | 'a'..='z' => Ok(1),
        '0' => Ok(2),
        _ => Err(CesrError::UnknownCode(selector.to_string())),
    }
}

/// Size table entry for a full code.
pub fn sizage(code: &str) -> Result<Sizage, CesrError> {
    CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, s)| *s)
        .ok_or_else(|| CesrError::UnknownCode(code.to_string()))
}

/// Common interface of all qualified material.
pub trait Matter {
    /// The type code.
    fn code(&self) -> &str;

    /// The raw material, without any qualification.
    fn raw(&self) -> &[u8];

    /// Qualified base64 text form.
    fn qb64(&self) -> String {
        infil(self.code(), self.raw())
    }

    /// Qualified binary form.
    fn qb2(&self) -> Vec<u8> {
        binfil(self.code(), self.raw())
    }

    /// Full size of the text form in chars.
    fn full_size(&self) -> usize {
        self.code().len() + self.raw().len().div_ceil(3) * 4 - pad_size(self.raw().len())
    }
}

/// Pad length base64 would need for `raw_len` bytes.
pub(crate) const fn pad_size(raw_len: usize) -> usize {
    (3 - raw_len % 3) % 3
}

/// Composes the text form from code and raw. Callers guarantee the code is a
/// table code whose raw size matches, so composition is total.
pub(crate) fn infil(code: &str, raw: &[u8]) -> String {
    let ps = pad_size(raw.len());
    debug_assert_eq!(code.len() % 4, ps, "code {code} misaligned for {} raw bytes", raw.len());
    let mut padded = vec![0u8; ps];
    padded.extend_from_slice(raw);
    let b64 = bext::encode_b64(&padded);
    format!("{code}{}", &b64[ps..])
}

/// Composes the binary form: code sextets left-aligned, then raw.
pub(crate) fn binfil(code: &str, raw: &[u8]) -> Vec<u8> {
    let mut out = code_to_b2(code);
    out.extend_from_slice(raw);
    out
}

/// Packs code characters into left-aligned sextet bytes. Code characters
/// come from the static tables, so every char is in the alphabet.
pub(crate) fn code_to_b2(code: &str) -> Vec<u8> {
    let cs = code.len();
    let n = (cs * 3).div_ceil(4);
    let mut value: u64 = 0;
    for c in code.chars() {
        value = value << 6 | bext::b64_index(c).unwrap_or(0);
    }
    value <<= 2 * (cs % 4);
    let mut out = vec![0u8; n];
    for slot in out.iter_mut().rev() {
        *slot = (value & 0xFF) as u8;
        value >>= 8;
    }
    out
}

/// Strips the code from a text frame and recovers the raw material,
/// verifying that the implicit pad bits are zero.
pub(crate) fn exfil(frame: &str, code_size: usize) -> Result<Vec<u8>, CesrError> {
    let ps = code_size % 4;
    let mut padded = String::with_capacity(ps + frame.len() - code_size);
    for _ in 0..ps {
        padded.push('A');
    }
    padded.push_str(&frame[code_size..]);
    let decoded = bext::decode_b64(&padded)?;
    if decoded[..ps].iter().any(|&b| b != 0) {
        return Err(CesrError::BadPad(frame[..code_size].to_string()));
    }
    Ok(decoded[ps..].to_vec())
}

/// Decodes one primitive from the front of a text stream.
///
/// Returns `(code, raw, consumed_chars)`. Signals `Shortage` when the stream
/// holds fewer chars than the code table requires; any other failure is a
/// hard error for this stream position.
pub fn decode_text(stream: &str) -> Result<(String, Vec<u8>, usize), CesrError> {
    let selector = stream.chars().next().ok_or(CesrError::Shortage { needed: 1 })?;
    let hs = hard_size(selector)?;
    if stream.len() < hs {
        return Err(CesrError::Shortage {
            needed: hs - stream.len(),
        });
    }
    let code = ascii_slice(stream, hs)?;
    let sizes = sizage(code)?;
    if stream.len() < sizes.full {
        return Err(CesrError::Shortage {
            needed: sizes.full - stream.len(),
        });
    }
    let raw = exfil(ascii_slice(stream, sizes.full)?, sizes.code_size())?;
    Ok((code.to_string(), raw, sizes.full))
}

/// First `len` bytes of `stream` as a str, rejecting non-ASCII material
/// before any slicing can split a multi-byte character.
pub(crate) fn ascii_slice(stream: &str, len: usize) -> Result<&str, CesrError> {
    let bytes = &stream.as_bytes()[..len];
    if !bytes.is_ascii() {
        return Err(CesrError::BadCharacter(stream.chars().take(4).collect()));
    }
    std::str::from_utf8(bytes).map_err(|_| CesrError::BadCharacter(stream.chars().take(4).collect()))
}

/// Decodes one primitive from the front of a binary stream.
///
/// Returns `(code, raw, consumed_bytes)`.
pub fn decode_b2(stream: &[u8]) -> Result<(String, Vec<u8>, usize), CesrError> {
    let first = bext::b2_leading_chars(stream, 1)?;
    let selector = first.chars().next().ok_or(CesrError::Shortage { needed: 1 })?;
    let hs = hard_size(selector)?;
    let code = bext::b2_leading_chars(stream, hs)?;
    let sizes = sizage(&code)?;
    let bfs = sizes.binary_size();
    if stream.len() < bfs {
        return Err(CesrError::Shortage {
            needed: bfs - stream.len(),
        });
    }
    let text = bext::encode_b64(&stream[..bfs]);
    let raw = exfil(&text, sizes.code_size())?;
    Ok((code, raw, bfs))
}

/// Decodes a complete qb64 string, requiring it to be exactly one primitive.
pub fn decode_exact(qb64: &str) -> Result<(String, Vec<u8>), CesrError> {
    let (code, raw, consumed) = decode_text(qb64)?;
    if consumed != qb64.len() {
        return Err(CesrError::RawSize {
            code,
            size: qb64.len(),
        });
    }
    Ok((code, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_table_invariants() {
        for (code, sizes) in CODES {
            assert_eq!(sizes.full % 4, 0, "{code}");
            assert_eq!(code.len(), sizes.code_size(), "{code}");
            assert!(sizes.full > sizes.code_size(), "{code}");
            // pad alignment: the code occupies exactly the pad positions
            assert_eq!(sizes.code_size() % 4, pad_size(sizes.raw_size()), "{code}");
            // hard size from the selector matches the table
            let selector = code.chars().next().unwrap();
            assert_eq!(hard_size(selector).unwrap(), sizes.hard, "{code}");
        }
    }

    #[test]
    fn test_roundtrip_all_codes() {
        for (code, sizes) in CODES {
            let raw: Vec<u8> = (0..sizes.raw_size() as u8).collect();
            let qb64 = infil(code, &raw);
            assert_eq!(qb64.len(), sizes.full);

            let (dcode, draw, consumed) = decode_text(&qb64).unwrap();
            assert_eq!(&dcode, code);
            assert_eq!(draw, raw);
            assert_eq!(consumed, sizes.full);

            let qb2 = binfil(code, &raw);
            assert_eq!(qb2.len(), sizes.binary_size());
            let (bcode, braw, bconsumed) = decode_b2(&qb2).unwrap();
            assert_eq!(&bcode, code);
            assert_eq!(braw, raw);
            assert_eq!(bconsumed, sizes.binary_size());
        }
    }

    #[test]
    fn test_text_binary_bijection() {
        for (code, sizes) in CODES {
            let raw = vec![0xA5u8; sizes.raw_size()];
            let qb64 = infil(code, &raw);
            let qb2 = binfil(code, &raw);
            assert_eq!(crate::bext::decode_b64(&qb64).unwrap(), qb2);
            assert_eq!(crate::bext::encode_b64(&qb2), qb64);
        }
    }

    #[test]
    fn test_truncation_signals_shortage() {
        let raw = [7u8; 32];
        let qb64 = infil("E", &raw);
        for len in 0..qb64.len() {
            let err = decode_text(&qb64[..len]).unwrap_err();
            assert!(err.is_shortage(), "len {len}: {err}");
        }
        let qb2 = binfil("E", &raw);
        for len in 0..qb2.len() {
            let err = decode_b2(&qb2[..len]).unwrap_err();
            assert!(err.is_shortage(), "len {len}: {err}");
        }
    }

    #[test]
    fn test_unknown_code_is_hard_failure() {
        let err = decode_text("#AAAA").unwrap_err();
        assert!(!err.is_shortage());
        let err = decode_text(&format!("1{}", "A".repeat(87))).unwrap_err();
        assert!(matches!(err, CesrError::UnknownCode(_)));
    }

    #[test]
    fn test_bad_pad_is_hard_failure() {
        // 'E' code expects the two high pad bits of the first soft char to be
        // zero; '_' (0b111111) violates that
        let bad = format!("E_{}", "A".repeat(42));
        let err = decode_text(&bad).unwrap_err();
        assert!(matches!(err, CesrError::BadPad(_)));
    }

    #[test]
    fn test_decode_exact_rejects_trailing() {
        let qb64 = infil("E", &[0u8; 32]);
        assert!(decode_exact(&qb64).is_ok());
        let longer = format!("{qb64}AAAA");
        assert!(decode_exact(&longer).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip_digest_code(raw in proptest::collection::vec(any::<u8>(), 32)) {
            let qb64 = infil("E", &raw);
            let (code, decoded, _) = decode_text(&qb64).unwrap();
            prop_assert_eq!(code, "E");
            prop_assert_eq!(decoded, raw);
        }

        #[test]
        fn prop_roundtrip_signature_code(raw in proptest::collection::vec(any::<u8>(), 64)) {
            let qb2 = binfil("0B", &raw);
            let (code, decoded, _) = decode_b2(&qb2).unwrap();
            prop_assert_eq!(code, "0B");
            prop_assert_eq!(decoded, raw);
        }
    }
}
