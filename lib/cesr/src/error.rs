//! CESR Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CesrError {
    /// Not enough material buffered to finish decoding. This is a suspension
    /// signal, not a failure: feed more bytes and retry.
    #[error("Insufficient material: need {needed} more")]
    Shortage { needed: usize },

    #[error("Unknown code: {0}")]
    UnknownCode(String),

    #[error("Unexpected code: {0}")]
    UnexpectedCode(String),

    #[error("Non-zeroed pad bits in {0}")]
    BadPad(String),

    #[error("Invalid base64 character in {0}")]
    BadCharacter(String),

    #[error("Raw size {size} invalid for code {code}")]
    RawSize { code: String, size: usize },

    #[error("Value out of range for {0}")]
    Overflow(String),

    #[error("Index {index} out of range for code {code}")]
    BadIndex { code: String, index: u64 },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl CesrError {
    /// True when the caller should buffer more input and retry rather than
    /// resynchronize the stream.
    pub fn is_shortage(&self) -> bool {
        matches!(self, CesrError::Shortage { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortage_is_not_fatal() {
        assert!(CesrError::Shortage { needed: 4 }.is_shortage());
        assert!(!CesrError::UnknownCode("z".to_string()).is_shortage());
    }

    #[test]
    fn test_error_display() {
        let err = CesrError::Shortage { needed: 12 };
        assert!(err.to_string().contains("12"));

        let err = CesrError::RawSize {
            code: "E".to_string(),
            size: 31,
        };
        assert!(err.to_string().contains("E"));
        assert!(err.to_string().contains("31"));
    }
}
