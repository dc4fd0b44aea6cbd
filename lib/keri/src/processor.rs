//! Event dispatch and escrow management
//!
//! The processor routes parsed messages by ilk: key events to the
//! per-identifier state machine, receipts to couple verification, and
//! transferable receipts to the receipter's established keys. Retryable
//! validation failures are written to their escrow table; a periodic sweep
//! replays escrowed messages through the same dispatch path.

use std::collections::HashMap;
use std::sync::Arc;

use cesr::{IndexedSignature, Matter as _, PublicKey, Signature};
use chrono::Utc;

use crate::error::KeriError;
use crate::escrow::{EscrowEntry, EscrowTable, EscrowTimeouts};
use crate::parser::Attachments;
use crate::serder::EventMessage;
use crate::state::KeyState;
use crate::store::{EventStore, TransferableReceipt};
use crate::types::Ilk;

/// Verifies events against per-identifier key state and manages escrows.
///
/// The prefix-to-state map is a pure cache over the store; see
/// [`EventProcessor::reload`]. Nothing here locks per-identifier state:
/// concurrent updates to the same identifier from multiple tasks require
/// external mutual exclusion.
pub struct EventProcessor {
    states: HashMap<String, KeyState>,
    store: Arc<dyn EventStore>,
    timeouts: EscrowTimeouts,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_timeouts(store, EscrowTimeouts::default())
    }

    pub fn with_timeouts(store: Arc<dyn EventStore>, timeouts: EscrowTimeouts) -> Self {
        Self {
            states: HashMap::new(),
            store,
            timeouts,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Verified key state for a prefix, if its inception has been seen.
    pub fn state(&self, prefix: &str) -> Option<&KeyState> {
        self.states.get(prefix)
    }

    /// Routes one message with its attachments. Retryable failures are
    /// escrowed before the error is returned.
    pub fn process_message(
        &mut self,
        message: EventMessage,
        attachments: &Attachments,
    ) -> Result<(), KeriError> {
        let result = self.dispatch(&message, attachments);
        if let Err(err) = &result {
            if let Some(table) = EscrowTable::for_error(err) {
                self.write_escrow(table, &message, attachments, err);
            }
        }
        result
    }

    fn dispatch(
        &mut self,
        message: &EventMessage,
        attachments: &Attachments,
    ) -> Result<(), KeriError> {
        message.event().validate_structure()?;
        match message.ilk() {
            Ilk::Icp | Ilk::Rot | Ilk::Ixn | Ilk::Dip | Ilk::Drt => {
                self.process_event(message, &attachments.controller_signatures())
            }
            Ilk::Rct => self.process_receipt(message, &attachments.receipt_couples()),
            Ilk::Vrc => self.process_chit(message, &attachments.controller_signatures()),
        }
    }

    /// Validates a key event against (or into) its identifier's state.
    pub fn process_event(
        &mut self,
        message: &EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        let prefix = message.prefix().to_string();
        let sn = message.sn()?;

        if !self.states.contains_key(&prefix) {
            if message.ilk().is_inception() {
                let state = KeyState::incept(message.clone(), sigs, Arc::clone(&self.store))?;
                self.states.insert(prefix, state);
                return Ok(());
            }
            return Err(KeriError::OutOfOrder(format!(
                "No inception seen for {prefix}"
            )));
        }

        if message.ilk().is_inception() {
            // re-inception: byte-identical resubmission accretes signatures,
            // anything else is duplicity
            if let Some(dig) = self.store.last_digest_at(&prefix, 0)? {
                if message.compare(&dig)? {
                    return self.accrete_signatures(message, sigs);
                }
            }
            return Err(KeriError::LikelyDuplicitous(format!(
                "Conflicting re-inception of {prefix}"
            )));
        }

        let (state_sn, state_est_sn) = self
            .states
            .get(&prefix)
            .map(|s| (s.sn(), s.last_establishment().0))
            .unwrap_or_default();
        if sn <= state_sn {
            let logged_match = match self.store.last_digest_at(&prefix, sn)? {
                Some(dig) => message.compare(&dig)?,
                None => false,
            };
            if logged_match {
                // byte-identical resubmission accretes signatures, except
                // for a committed establishment the cached state has not
                // absorbed yet (replay of a superseding recovery), which
                // must go through update
                if !message.ilk().is_establishment() || sn <= state_est_sn {
                    return self.accrete_signatures(message, sigs);
                }
            } else if message.ilk() == Ilk::Ixn {
                return Err(KeriError::LikelyDuplicitous(format!(
                    "Conflicting interaction at logged sn {sn} of {prefix}"
                )));
            }
            // a rotation at a logged sn may be a superseding recovery;
            // the state machine decides
        }

        match self.states.get_mut(&prefix) {
            Some(state) => state.update(message.clone(), sigs),
            None => Err(KeriError::Store(format!("Key state for {prefix} vanished"))),
        }
    }

    /// Verifies receipt couples from non-transferable receipters against the
    /// receipted event and persists the ones that verify.
    pub fn process_receipt(
        &mut self,
        message: &EventMessage,
        couples: &[(PublicKey, Signature)],
    ) -> Result<(), KeriError> {
        let event = message.event();
        let prefix = message.prefix();
        let sn = message.sn()?;
        let dig = event
            .dig
            .as_deref()
            .ok_or_else(|| KeriError::Validation("Receipt without event digest".to_string()))?;
        if couples.is_empty() {
            return Err(KeriError::Validation(
                "Receipt without attached couples".to_string(),
            ));
        }

        let (target, target_dig) = match self.logged_message_at(prefix, sn)? {
            Some(found) => found,
            None => {
                return Err(KeriError::MissingReceiptTarget(format!(
                    "Receipted event at {prefix} sn {sn} not seen"
                )));
            }
        };
        if !target.compare(dig)? {
            return Err(KeriError::MissingReceiptTarget(format!(
                "Receipted digest is not the last-seen event at {prefix} sn {sn}"
            )));
        }

        let mut verified = Vec::new();
        for (verifier, cigar) in couples {
            if verifier.is_transferable() {
                tracing::warn!("Skipping transferable receipter in couple");
                continue;
            }
            match verifier.verify(target.raw(), cigar) {
                Ok(()) => verified.push((verifier.qb64(), cigar.qb64())),
                Err(_) => tracing::warn!("Skipping unverifiable receipt couple"),
            }
        }
        if verified.is_empty() {
            return Err(KeriError::Validation(
                "No verifiable receipt couples".to_string(),
            ));
        }
        self.store.put_receipt_couples(prefix, &target_dig, &verified)?;
        tracing::debug!(prefix, sn, count = verified.len(), "Stored receipt couples");
        Ok(())
    }

    /// Verifies indexed receipt signatures from a transferable receipter
    /// against its established keys and persists the ones that verify.
    pub fn process_chit(
        &mut self,
        message: &EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        let event = message.event();
        let prefix = message.prefix();
        let sn = message.sn()?;
        let dig = event
            .dig
            .as_deref()
            .ok_or_else(|| KeriError::Validation("Receipt without event digest".to_string()))?;
        let seal = event
            .receipter_seal()
            .ok_or_else(|| {
                KeriError::Validation("Transferable receipt without receipter seal".to_string())
            })?
            .clone();
        if sigs.is_empty() {
            return Err(KeriError::Validation(
                "Transferable receipt without signatures".to_string(),
            ));
        }

        let (target, target_dig) = match self.logged_message_at(prefix, sn)? {
            Some(found) => found,
            None => {
                return Err(KeriError::MissingReceipterState(format!(
                    "Receipted event at {prefix} sn {sn} not seen"
                )));
            }
        };
        if !target.compare(dig)? {
            return Err(KeriError::MissingReceipterState(format!(
                "Receipted digest is not the last-seen event at {prefix} sn {sn}"
            )));
        }

        // the receipter's establishment event supplies the verification keys
        let est_bytes = self
            .store
            .event_bytes(&seal.prefix, &seal.dig)?
            .ok_or_else(|| {
                KeriError::MissingReceipterState(format!(
                    "Establishment event {} of receipter {} not seen",
                    seal.dig, seal.prefix
                ))
            })?;
        let est = EventMessage::from_bytes(&est_bytes)?;
        if !est.ilk().is_establishment() {
            return Err(KeriError::Validation(format!(
                "Receipter seal references a {} event",
                est.ilk()
            )));
        }
        let verifiers = est.verifiers()?;

        let receipter_sn = seal.sn_u64()?;
        let mut verified = Vec::new();
        for sig in sigs {
            match verifiers.get(sig.index() as usize) {
                Some(verifier) if verifier.verify_indexed(target.raw(), sig).is_ok() => {
                    verified.push(TransferableReceipt {
                        receipter: seal.prefix.clone(),
                        receipter_sn,
                        receipter_dig: seal.dig.clone(),
                        signature: sig.qb64(),
                    });
                }
                _ => tracing::warn!(index = sig.index(), "Skipping unverifiable receipt signature"),
            }
        }
        if verified.is_empty() {
            return Err(KeriError::Validation(
                "No verifiable receipt signatures".to_string(),
            ));
        }
        self.store
            .put_transferable_receipts(prefix, &target_dig, &verified)?;
        tracing::debug!(prefix, sn, count = verified.len(), "Stored transferable receipts");
        Ok(())
    }

    /// Sweeps all escrow tables: purges entries past their table timeout,
    /// replays the rest, keeps entries that fail with their own table's
    /// retryable class, and purges everything else.
    pub fn process_escrows(&mut self) -> Result<(), KeriError> {
        let now = Utc::now();
        for table in EscrowTable::ALL {
            let timeout = self.timeouts.for_table(table);
            for (prefix, sn, entry) in self.store.escrow_entries(table)? {
                if now - entry.escrowed_at > timeout {
                    tracing::warn!(%prefix, sn, ?table, "Purging stale escrow entry");
                    self.store.escrow_remove(table, &prefix, sn, &entry.event)?;
                    continue;
                }
                match self.replay(table, &entry) {
                    Ok(()) => {
                        tracing::debug!(%prefix, sn, ?table, "Escrow entry resolved");
                        self.store.escrow_remove(table, &prefix, sn, &entry.event)?;
                    }
                    Err(err) if table.retains(&err) => {
                        tracing::debug!(%prefix, sn, ?table, %err, "Escrow entry retained");
                    }
                    Err(err) => {
                        tracing::warn!(%prefix, sn, ?table, %err, "Purging escrow entry");
                        self.store.escrow_remove(table, &prefix, sn, &entry.event)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replays one escrowed message through normal dispatch. A retryable
    /// failure belonging to a different table migrates the entry there.
    fn replay(&mut self, table: EscrowTable, entry: &EscrowEntry) -> Result<(), KeriError> {
        let message = EventMessage::from_bytes(&entry.event)?;
        let text = std::str::from_utf8(&entry.attachments)
            .map_err(|_| KeriError::Encoding("Non-text escrowed attachments".to_string()))?;
        let attachments = Attachments::from_text(text)?;
        let result = self.dispatch(&message, &attachments);
        if let Err(err) = &result {
            if let Some(target) = EscrowTable::for_error(err) {
                if target != table {
                    self.write_escrow(target, &message, &attachments, err);
                }
            }
        }
        result
    }

    /// Rebuilds an identifier's key state by replaying its first-seen log.
    /// Returns true when state exists afterwards.
    pub fn reload(&mut self, prefix: &str) -> Result<bool, KeriError> {
        self.states.remove(prefix);
        for dig in self.store.first_seen(prefix)? {
            let Some(bytes) = self.store.event_bytes(prefix, &dig)? else {
                return Err(KeriError::Store(format!("Missing event bytes for {dig}")));
            };
            let message = EventMessage::from_bytes(&bytes)?;
            let sigs = self
                .store
                .signatures(prefix, &dig)?
                .iter()
                .map(|s| IndexedSignature::from_qb64(s))
                .collect::<Result<Vec<_>, _>>()?;
            if let Err(err) = self.process_event(&message, &sigs) {
                tracing::warn!(%prefix, %dig, %err, "Skipping event during replay");
            }
        }
        Ok(self.states.contains_key(prefix))
    }

    /// Latest logged event at `(prefix, sn)` with its stored digest.
    fn logged_message_at(
        &self,
        prefix: &str,
        sn: u64,
    ) -> Result<Option<(EventMessage, String)>, KeriError> {
        let Some(dig) = self.store.last_digest_at(prefix, sn)? else {
            return Ok(None);
        };
        let Some(bytes) = self.store.event_bytes(prefix, &dig)? else {
            return Ok(None);
        };
        Ok(Some((EventMessage::from_bytes(&bytes)?, dig)))
    }

    /// Appends newly verifying signatures to a byte-identical resubmission
    /// of an already-logged event. No state advances.
    fn accrete_signatures(
        &self,
        message: &EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        let prefix = message.prefix();
        let sn = message.sn()?;
        let verifiers = self.keys_in_effect_at(prefix, sn)?;
        let mut verified = Vec::new();
        for sig in sigs {
            if let Some(verifier) = verifiers.get(sig.index() as usize) {
                if verifier.verify_indexed(message.raw(), sig).is_ok() {
                    verified.push(sig.qb64());
                }
            }
        }
        if verified.is_empty() {
            return Err(KeriError::Validation(
                "No verifiable signatures on resubmission".to_string(),
            ));
        }
        self.store
            .put_signatures(prefix, &message.said().qb64(), &verified)?;
        tracing::debug!(prefix, sn, count = verified.len(), "Accreted signatures");
        Ok(())
    }

    /// Signing keys governing events at `(prefix, sn)`: those declared by
    /// the establishment event at or nearest before that sn.
    fn keys_in_effect_at(&self, prefix: &str, sn: u64) -> Result<Vec<PublicKey>, KeriError> {
        for s in (0..=sn).rev() {
            let Some((message, _)) = self.logged_message_at(prefix, s)? else {
                continue;
            };
            if message.ilk().is_establishment() {
                return message.verifiers();
            }
        }
        Err(KeriError::Validation(format!(
            "No establishment event for {prefix} at or before sn {sn}"
        )))
    }

    fn write_escrow(
        &self,
        table: EscrowTable,
        message: &EventMessage,
        attachments: &Attachments,
        err: &KeriError,
    ) {
        let sn = match message.sn() {
            Ok(sn) => sn,
            Err(_) => return,
        };
        let entry = EscrowEntry::new(
            message.raw().to_vec(),
            attachments.to_text().into_bytes(),
        );
        match self
            .store
            .escrow_add(table, message.prefix(), sn, entry)
        {
            Ok(()) => {
                tracing::debug!(prefix = message.prefix(), sn, ?table, %err, "Escrowed message");
            }
            Err(store_err) => {
                tracing::warn!(%store_err, "Failed to write escrow entry");
            }
        }
    }
}
