//! Escrow tables and timeouts
//!
//! Events that fail validation for a reason that may resolve later are held
//! in one of five typed tables, keyed by `(prefix, sn)`, duplicate-keeping
//! and insertion-ordered. A periodic sweep replays entries through normal
//! processing: resolved entries are purged, entries that fail with the same
//! retryable class stay, everything else (including entries past their
//! table's timeout) is purged.

use chrono::{DateTime, Duration, Utc};

use crate::error::KeriError;

/// The five escrow tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EscrowTable {
    PartialSignature,
    OutOfOrder,
    LikelyDuplicitous,
    UnverifiedReceipt,
    UnverifiedTransferableReceipt,
}

impl EscrowTable {
    pub const ALL: [EscrowTable; 5] = [
        EscrowTable::PartialSignature,
        EscrowTable::OutOfOrder,
        EscrowTable::LikelyDuplicitous,
        EscrowTable::UnverifiedReceipt,
        EscrowTable::UnverifiedTransferableReceipt,
    ];

    /// Table an error class escrows into, if any.
    pub fn for_error(err: &KeriError) -> Option<Self> {
        match err {
            KeriError::MissingSignatures(_) => Some(Self::PartialSignature),
            // waiting on another event to arrive, like out-of-order
            KeriError::MissingDelegation(_) => Some(Self::OutOfOrder),
            KeriError::OutOfOrder(_) => Some(Self::OutOfOrder),
            KeriError::LikelyDuplicitous(_) => Some(Self::LikelyDuplicitous),
            KeriError::MissingReceiptTarget(_) => Some(Self::UnverifiedReceipt),
            KeriError::MissingReceipterState(_) => Some(Self::UnverifiedTransferableReceipt),
            _ => None,
        }
    }

    /// True when a replay failure with this error leaves an entry of this
    /// table in place instead of purging it.
    pub fn retains(&self, err: &KeriError) -> bool {
        EscrowTable::for_error(err) == Some(*self)
    }
}

/// A stored escrow entry: enough material to reconstruct the full wire
/// message without re-fetching anything.
#[derive(Debug, Clone, PartialEq)]
pub struct EscrowEntry {
    /// The event serialization exactly as received.
    pub event: Vec<u8>,
    /// Attachment section in text domain.
    pub attachments: Vec<u8>,
    pub escrowed_at: DateTime<Utc>,
}

impl EscrowEntry {
    pub fn new(event: Vec<u8>, attachments: Vec<u8>) -> Self {
        Self {
            event,
            attachments,
            escrowed_at: Utc::now(),
        }
    }

    /// The full wire message this entry was extracted from.
    pub fn wire_message(&self) -> Vec<u8> {
        let mut message = self.event.clone();
        message.extend_from_slice(&self.attachments);
        message
    }
}

/// Per-table escrow retention windows.
#[derive(Debug, Clone)]
pub struct EscrowTimeouts {
    pub partial_signature: Duration,
    pub out_of_order: Duration,
    pub likely_duplicitous: Duration,
    pub unverified_receipt: Duration,
    pub unverified_transferable_receipt: Duration,
}

impl Default for EscrowTimeouts {
    fn default() -> Self {
        Self {
            partial_signature: Duration::seconds(3600),
            out_of_order: Duration::seconds(1200),
            likely_duplicitous: Duration::seconds(3600),
            unverified_receipt: Duration::seconds(3600),
            unverified_transferable_receipt: Duration::seconds(3600),
        }
    }
}

impl EscrowTimeouts {
    pub fn for_table(&self, table: EscrowTable) -> Duration {
        match table {
            EscrowTable::PartialSignature => self.partial_signature,
            EscrowTable::OutOfOrder => self.out_of_order,
            EscrowTable::LikelyDuplicitous => self.likely_duplicitous,
            EscrowTable::UnverifiedReceipt => self.unverified_receipt,
            EscrowTable::UnverifiedTransferableReceipt => self.unverified_transferable_receipt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_to_table_mapping() {
        assert_eq!(
            EscrowTable::for_error(&KeriError::MissingSignatures("x".into())),
            Some(EscrowTable::PartialSignature)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::OutOfOrder("x".into())),
            Some(EscrowTable::OutOfOrder)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::MissingDelegation("x".into())),
            Some(EscrowTable::OutOfOrder)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::LikelyDuplicitous("x".into())),
            Some(EscrowTable::LikelyDuplicitous)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::MissingReceiptTarget("x".into())),
            Some(EscrowTable::UnverifiedReceipt)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::MissingReceipterState("x".into())),
            Some(EscrowTable::UnverifiedTransferableReceipt)
        );
        assert_eq!(
            EscrowTable::for_error(&KeriError::Validation("x".into())),
            None
        );
    }

    #[test]
    fn test_retains_only_same_class() {
        let table = EscrowTable::PartialSignature;
        assert!(table.retains(&KeriError::MissingSignatures("x".into())));
        assert!(!table.retains(&KeriError::OutOfOrder("x".into())));
        assert!(!table.retains(&KeriError::Validation("x".into())));
    }

    #[test]
    fn test_wire_message_concatenation() {
        let entry = EscrowEntry::new(b"event".to_vec(), b"-AAB....".to_vec());
        assert_eq!(entry.wire_message(), b"event-AAB....".to_vec());
    }
}
