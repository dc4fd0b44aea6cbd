//! Event store trait and in-memory implementation
//!
//! The durable store is a collaborator behind a narrow interface, keyed by
//! `(prefix, sn)` or `(prefix, digest)`. Key state is only ever a cache in
//! front of it: everything needed to rebuild state by replay lives here.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::KeriError;
use crate::escrow::{EscrowEntry, EscrowTable};

/// A verified receipt from a transferable receipter: who receipted, and
/// where their keys were established when they did.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferableReceipt {
    pub receipter: String,
    pub receipter_sn: u64,
    pub receipter_dig: String,
    pub signature: String,
}

/// Narrow persistence interface for event logs, receipts, and escrows.
pub trait EventStore: Send + Sync {
    /// Digest of the most recently accepted event at `(prefix, sn)`.
    fn last_digest_at(&self, prefix: &str, sn: u64) -> Result<Option<String>, KeriError>;

    fn event_bytes(&self, prefix: &str, dig: &str) -> Result<Option<Vec<u8>>, KeriError>;

    fn put_event_bytes(&self, prefix: &str, dig: &str, raw: &[u8]) -> Result<(), KeriError>;

    /// Records `dig` as the latest event at `(prefix, sn)`. Earlier digests
    /// at the same sn are retained for duplicity evidence.
    fn put_kel_at(&self, prefix: &str, sn: u64, dig: &str) -> Result<(), KeriError>;

    /// Appends signatures for an event, keeping duplicates out.
    fn put_signatures(&self, prefix: &str, dig: &str, sigs: &[String]) -> Result<(), KeriError>;

    fn signatures(&self, prefix: &str, dig: &str) -> Result<Vec<String>, KeriError>;

    /// Appends verified (verification key, signature) receipt couples.
    fn put_receipt_couples(
        &self,
        prefix: &str,
        dig: &str,
        couples: &[(String, String)],
    ) -> Result<(), KeriError>;

    fn receipt_couples(&self, prefix: &str, dig: &str) -> Result<Vec<(String, String)>, KeriError>;

    /// Appends verified transferable receipts.
    fn put_transferable_receipts(
        &self,
        prefix: &str,
        dig: &str,
        receipts: &[TransferableReceipt],
    ) -> Result<(), KeriError>;

    fn transferable_receipts(
        &self,
        prefix: &str,
        dig: &str,
    ) -> Result<Vec<TransferableReceipt>, KeriError>;

    fn put_timestamp(
        &self,
        prefix: &str,
        dig: &str,
        at: DateTime<Utc>,
    ) -> Result<(), KeriError>;

    /// Appends to the first-seen ordinal log, returning the ordinal.
    fn append_first_seen(&self, prefix: &str, dig: &str) -> Result<u64, KeriError>;

    fn first_seen(&self, prefix: &str) -> Result<Vec<String>, KeriError>;

    /// Adds an escrow entry; duplicates are kept in insertion order.
    fn escrow_add(
        &self,
        table: EscrowTable,
        prefix: &str,
        sn: u64,
        entry: EscrowEntry,
    ) -> Result<(), KeriError>;

    /// Removes the first entry at `(prefix, sn)` whose event bytes match.
    fn escrow_remove(
        &self,
        table: EscrowTable,
        prefix: &str,
        sn: u64,
        event: &[u8],
    ) -> Result<(), KeriError>;

    /// All entries of one table, FIFO over `(prefix, sn)` and insertion
    /// order within a key.
    fn escrow_entries(
        &self,
        table: EscrowTable,
    ) -> Result<Vec<(String, u64, EscrowEntry)>, KeriError>;
}

#[derive(Default)]
struct MemoryInner {
    events: HashMap<(String, String), Vec<u8>>,
    kels: BTreeMap<(String, u64), Vec<String>>,
    sigs: HashMap<(String, String), Vec<String>>,
    receipts: HashMap<(String, String), Vec<(String, String)>>,
    transferable: HashMap<(String, String), Vec<TransferableReceipt>>,
    timestamps: HashMap<(String, String), DateTime<Utc>>,
    first_seen: HashMap<String, Vec<String>>,
    escrows: HashMap<EscrowTable, BTreeMap<(String, u64), VecDeque<EscrowEntry>>>,
}

/// In-memory store. Suitable for tests and for embedders that persist some
/// other way.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, KeriError> {
        self.inner
            .lock()
            .map_err(|_| KeriError::Store("Store lock poisoned".to_string()))
    }
}

impl EventStore for MemoryEventStore {
    fn last_digest_at(&self, prefix: &str, sn: u64) -> Result<Option<String>, KeriError> {
        let inner = self.locked()?;
        Ok(inner
            .kels
            .get(&(prefix.to_string(), sn))
            .and_then(|digs| digs.last().cloned()))
    }

    fn event_bytes(&self, prefix: &str, dig: &str) -> Result<Option<Vec<u8>>, KeriError> {
        let inner = self.locked()?;
        Ok(inner
            .events
            .get(&(prefix.to_string(), dig.to_string()))
            .cloned())
    }

    fn put_event_bytes(&self, prefix: &str, dig: &str, raw: &[u8]) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        inner
            .events
            .insert((prefix.to_string(), dig.to_string()), raw.to_vec());
        Ok(())
    }

    fn put_kel_at(&self, prefix: &str, sn: u64, dig: &str) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        let digs = inner.kels.entry((prefix.to_string(), sn)).or_default();
        if digs.last().map(String::as_str) != Some(dig) {
            digs.push(dig.to_string());
        }
        Ok(())
    }

    fn put_signatures(&self, prefix: &str, dig: &str, sigs: &[String]) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        let stored = inner
            .sigs
            .entry((prefix.to_string(), dig.to_string()))
            .or_default();
        for sig in sigs {
            if !stored.contains(sig) {
                stored.push(sig.clone());
            }
        }
        Ok(())
    }

    fn signatures(&self, prefix: &str, dig: &str) -> Result<Vec<String>, KeriError> {
        let inner = self.locked()?;
        Ok(inner
            .sigs
            .get(&(prefix.to_string(), dig.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn put_receipt_couples(
        &self,
        prefix: &str,
        dig: &str,
        couples: &[(String, String)],
    ) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        let stored = inner
            .receipts
            .entry((prefix.to_string(), dig.to_string()))
            .or_default();
        for couple in couples {
            if !stored.contains(couple) {
                stored.push(couple.clone());
            }
        }
        Ok(())
    }

    fn receipt_couples(&self, prefix: &str, dig: &str) -> Result<Vec<(String, String)>, KeriError> {
        let inner = self.locked()?;
        Ok(inner
            .receipts
            .get(&(prefix.to_string(), dig.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn put_transferable_receipts(
        &self,
        prefix: &str,
        dig: &str,
        receipts: &[TransferableReceipt],
    ) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        let stored = inner
            .transferable
            .entry((prefix.to_string(), dig.to_string()))
            .or_default();
        for receipt in receipts {
            if !stored.contains(receipt) {
                stored.push(receipt.clone());
            }
        }
        Ok(())
    }

    fn transferable_receipts(
        &self,
        prefix: &str,
        dig: &str,
    ) -> Result<Vec<TransferableReceipt>, KeriError> {
        let inner = self.locked()?;
        Ok(inner
            .transferable
            .get(&(prefix.to_string(), dig.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn put_timestamp(
        &self,
        prefix: &str,
        dig: &str,
        at: DateTime<Utc>,
    ) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        inner
            .timestamps
            .insert((prefix.to_string(), dig.to_string()), at);
        Ok(())
    }

    fn append_first_seen(&self, prefix: &str, dig: &str) -> Result<u64, KeriError> {
        let mut inner = self.locked()?;
        let log = inner.first_seen.entry(prefix.to_string()).or_default();
        // an event is first seen once; re-persisting returns its ordinal
        if let Some(ordinal) = log.iter().position(|d| d == dig) {
            return Ok(ordinal as u64);
        }
        log.push(dig.to_string());
        Ok(log.len() as u64 - 1)
    }

    fn first_seen(&self, prefix: &str) -> Result<Vec<String>, KeriError> {
        let inner = self.locked()?;
        Ok(inner.first_seen.get(prefix).cloned().unwrap_or_default())
    }

    fn escrow_add(
        &self,
        table: EscrowTable,
        prefix: &str,
        sn: u64,
        entry: EscrowEntry,
    ) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        inner
            .escrows
            .entry(table)
            .or_default()
            .entry((prefix.to_string(), sn))
            .or_default()
            .push_back(entry);
        Ok(())
    }

    fn escrow_remove(
        &self,
        table: EscrowTable,
        prefix: &str,
        sn: u64,
        event: &[u8],
    ) -> Result<(), KeriError> {
        let mut inner = self.locked()?;
        let key = (prefix.to_string(), sn);
        let mut now_empty = false;
        if let Some(entries) = inner
            .escrows
            .get_mut(&table)
            .and_then(|t| t.get_mut(&key))
        {
            if let Some(position) = entries.iter().position(|e| e.event == event) {
                let _ = entries.remove(position);
            }
            now_empty = entries.is_empty();
        }
        if now_empty {
            if let Some(keyed) = inner.escrows.get_mut(&table) {
                keyed.remove(&key);
            }
        }
        Ok(())
    }

    fn escrow_entries(
        &self,
        table: EscrowTable,
    ) -> Result<Vec<(String, u64, EscrowEntry)>, KeriError> {
        let inner = self.locked()?;
        let mut out = Vec::new();
        if let Some(keyed) = inner.escrows.get(&table) {
            for ((prefix, sn), entries) in keyed {
                for entry in entries {
                    out.push((prefix.clone(), *sn, entry.clone()));
                }
            }
        }
        Ok(out)
    }
}
