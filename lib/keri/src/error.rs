//! KERI Error Types

use thiserror::Error;

use cesr::CesrError;

#[derive(Error, Debug)]
pub enum KeriError {
    /// Not enough bytes buffered to extract the next message or attachment.
    /// A suspension signal: feed more input and re-invoke.
    #[error("Insufficient material: need {needed} more")]
    Shortage { needed: usize },

    /// The stream position cannot be trusted; the remainder must be flushed.
    #[error("Unrecognized cold start byte: {0:#04x}")]
    ColdStart(u8),

    #[error("Invalid version string: {0}")]
    BadVersion(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Malformed event, wrong sequence semantics, bad witness arithmetic.
    /// Never escrowed: logged and discarded.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Attached signatures do not satisfy the signing threshold yet.
    #[error("Missing signatures: {0}")]
    MissingSignatures(String),

    /// Delegated event lacks an anchoring seal in the delegator's log.
    #[error("Missing delegation approval: {0}")]
    MissingDelegation(String),

    /// Event sequence number is ahead of the current key state.
    #[error("Out of order event: {0}")]
    OutOfOrder(String),

    /// Different event content at an already-logged sequence number.
    #[error("Likely duplicitous event: {0}")]
    LikelyDuplicitous(String),

    /// Receipted event has not been seen yet.
    #[error("Missing receipted event: {0}")]
    MissingReceiptTarget(String),

    /// Receipter's establishment event has not been seen yet.
    #[error("Missing receipter key state: {0}")]
    MissingReceipterState(String),

    #[error("Codec error: {0}")]
    Cesr(CesrError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Storage error: {0}")]
    Store(String),
}

impl KeriError {
    /// True when the caller should buffer more input and retry.
    pub fn is_shortage(&self) -> bool {
        matches!(self, KeriError::Shortage { .. })
    }

    /// True for validation outcomes that may succeed later once a missing
    /// precondition (signatures, prior event, delegation seal, key state)
    /// arrives. These are escrowed rather than discarded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeriError::MissingSignatures(_)
                | KeriError::MissingDelegation(_)
                | KeriError::OutOfOrder(_)
                | KeriError::LikelyDuplicitous(_)
                | KeriError::MissingReceiptTarget(_)
                | KeriError::MissingReceipterState(_)
        )
    }
}

impl From<CesrError> for KeriError {
    fn from(e: CesrError) -> Self {
        match e {
            CesrError::Shortage { needed } => KeriError::Shortage { needed },
            other => KeriError::Cesr(other),
        }
    }
}
