//! Base64 / Base2 conversion primitives
//!
//! All qualified material uses the URL-safe base64 alphabet (`A-Za-z0-9-_`).
//! The helpers here convert between that alphabet, unsigned integers, and
//! packed 6-bit sextets. Everything else in the crate is built on top of
//! these conversions.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::CesrError;

/// The URL-safe base64 alphabet in index order.
pub const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Index of a base64 character, or an error for anything outside the alphabet.
pub fn b64_index(c: char) -> Result<u64, CesrError> {
    match c {
        'A'..='Z' => Ok(c as u64 - 'A' as u64),
        'a'..='z' => Ok(c as u64 - 'a' as u64 + 26),
        '0'..='9' => Ok(c as u64 - '0' as u64 + 52),
        '-' => Ok(62),
        '_' => Ok(63),
        _ => Err(CesrError::BadCharacter(c.to_string())),
    }
}

/// Character for a sextet value in `0..64`.
pub fn b64_char(value: u8) -> char {
    B64_ALPHABET[(value & 0x3F) as usize] as char
}

/// Converts a base64 string to the unsigned integer it spells in base 64.
pub fn b64_to_u64(text: &str) -> Result<u64, CesrError> {
    if text.len() > 10 {
        return Err(CesrError::Overflow(text.to_string()));
    }
    let mut value: u64 = 0;
    for c in text.chars() {
        let digit = b64_index(c)?;
        value = value
            .checked_mul(64)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| CesrError::Overflow(text.to_string()))?;
    }
    Ok(value)
}

/// Converts an unsigned integer to a base64 string of exactly `length` chars.
pub fn u64_to_b64(value: u64, length: usize) -> Result<String, CesrError> {
    if length < 10 && value >= 1u64 << (6 * length as u32) {
        return Err(CesrError::Overflow(format!("{value} in {length} chars")));
    }
    let mut chars = vec!['A'; length];
    let mut rest = value;
    for slot in chars.iter_mut().rev() {
        *slot = b64_char((rest % 64) as u8);
        rest /= 64;
    }
    Ok(chars.into_iter().collect())
}

/// Base64-encodes bytes (no pad characters).
pub fn encode_b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64-decodes text (no pad characters expected).
pub fn decode_b64(text: &str) -> Result<Vec<u8>, CesrError> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| CesrError::BadCharacter(text.to_string()))
}

/// Reads the first `count` sextets of a packed base2 buffer as base64 chars.
///
/// Qualified base2 material is the base64 decoding of the qualified text
/// form, so the leading code characters sit in the top bits of the leading
/// bytes. Used to sniff codes before a full frame is available.
pub fn b2_leading_chars(bytes: &[u8], count: usize) -> Result<String, CesrError> {
    let needed = (count * 6).div_ceil(8);
    if bytes.len() < needed {
        return Err(CesrError::Shortage {
            needed: needed - bytes.len(),
        });
    }
    let mut out = String::with_capacity(count);
    for i in 0..count {
        let bit = i * 6;
        let byte = bit / 8;
        let offset = bit % 8;
        let sextet = if offset <= 2 {
            (bytes[byte] >> (2 - offset)) & 0x3F
        } else {
            let high = (bytes[byte] as u16) << 8 | *bytes.get(byte + 1).unwrap_or(&0) as u16;
            ((high >> (10 - offset)) & 0x3F) as u8
        };
        out.push(b64_char(sextet));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_b64_index_roundtrip() {
        for (i, &c) in B64_ALPHABET.iter().enumerate() {
            assert_eq!(b64_index(c as char).unwrap(), i as u64);
            assert_eq!(b64_char(i as u8), c as char);
        }
    }

    #[test]
    fn test_b64_index_rejects_illegal() {
        assert!(b64_index('=').is_err());
        assert!(b64_index('+').is_err());
        assert!(b64_index('/').is_err());
        assert!(b64_index(' ').is_err());
    }

    #[test]
    fn test_u64_to_b64() {
        assert_eq!(u64_to_b64(0, 1).unwrap(), "A");
        assert_eq!(u64_to_b64(0, 2).unwrap(), "AA");
        assert_eq!(u64_to_b64(1, 1).unwrap(), "B");
        assert_eq!(u64_to_b64(63, 1).unwrap(), "_");
        assert_eq!(u64_to_b64(64, 2).unwrap(), "BA");
        assert_eq!(u64_to_b64(4095, 2).unwrap(), "__");
    }

    #[test]
    fn test_u64_to_b64_overflow() {
        assert!(u64_to_b64(64, 1).is_err());
        assert!(u64_to_b64(4096, 2).is_err());
    }

    #[test]
    fn test_b64_to_u64_roundtrip() {
        for value in [0u64, 1, 63, 64, 4095, 262143, 1 << 29] {
            let text = u64_to_b64(value, 5).unwrap();
            assert_eq!(b64_to_u64(&text).unwrap(), value);
        }
    }

    #[test]
    fn test_b2_leading_chars() {
        // "Eabc" decoded then re-read should give back "Eabc"
        let text = "EabcEabc"; // 8 chars = 6 bytes
        let bytes = decode_b64(text).unwrap();
        assert_eq!(b2_leading_chars(&bytes, 4).unwrap(), "Eabc");
        assert_eq!(b2_leading_chars(&bytes, 8).unwrap(), "EabcEabc");
    }

    #[test]
    fn test_b2_leading_chars_shortage() {
        let err = b2_leading_chars(&[], 1).unwrap_err();
        assert!(err.is_shortage());
    }
}
