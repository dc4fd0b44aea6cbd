//! Per-identifier key state machine
//!
//! A `KeyState` is created by one verified inception event and mutated in
//! place by each subsequent verified establishment or interaction event. It
//! is a cache: the append-only log behind the store stays authoritative, and
//! any state can be rebuilt by replay.

use std::collections::HashSet;
use std::sync::Arc;

use cesr::{IndexedSignature, Matter as _, PublicKey};
use chrono::Utc;

use crate::commitment::NextCommitment;
use crate::error::KeriError;
use crate::prefix;
use crate::serder::EventMessage;
use crate::store::EventStore;
use crate::threshold::SigningThreshold;
use crate::types::{Ilk, Seal};

/// Verified key state for one identifier prefix.
pub struct KeyState {
    prefix: String,
    sn: u64,
    message: EventMessage,
    threshold: SigningThreshold,
    keys: Vec<PublicKey>,
    /// Commitment to the next key set; `None` locks the identifier against
    /// further establishment.
    next_commitment: Option<String>,
    witness_threshold: u64,
    witnesses: Vec<String>,
    last_establishment: (u64, String),
    establishment_only: bool,
    delegator: Option<String>,
    store: Arc<dyn EventStore>,
}

impl std::fmt::Debug for KeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyState")
            .field("prefix", &self.prefix)
            .field("sn", &self.sn)
            .field("message", &self.message)
            .field("threshold", &self.threshold)
            .field("keys", &self.keys)
            .field("next_commitment", &self.next_commitment)
            .field("witness_threshold", &self.witness_threshold)
            .field("witnesses", &self.witnesses)
            .field("last_establishment", &self.last_establishment)
            .field("establishment_only", &self.establishment_only)
            .field("delegator", &self.delegator)
            .finish_non_exhaustive()
    }
}

impl KeyState {
    /// Creates key state from a verified inception event, committing it to
    /// the store.
    pub fn incept(
        message: EventMessage,
        sigs: &[IndexedSignature],
        store: Arc<dyn EventStore>,
    ) -> Result<Self, KeriError> {
        let event = message.event();
        event.validate_structure()?;
        if !event.ilk.is_inception() {
            return Err(KeriError::Validation(format!(
                "{} is not an inception ilk",
                event.ilk
            )));
        }

        let threshold = message.threshold()?;
        let keys = message.verifiers()?;
        if keys.len() < threshold.size() {
            return Err(KeriError::Validation(format!(
                "Key list of {} below threshold size {}",
                keys.len(),
                threshold.size()
            )));
        }

        if !prefix::verify(event, message.kind())? {
            return Err(KeriError::Validation(format!(
                "Prefix derivation mismatch for {}",
                event.prefix
            )));
        }

        let witnesses = event.witnesses.clone().unwrap_or_default();
        let toad = event.toad_u64()?;
        validate_witness_set(&witnesses, toad)?;

        let transferable = match PublicKey::from_qb64(&event.prefix) {
            Ok(key) => key.is_transferable(),
            Err(_) => true,
        };
        let next = event.next.clone().unwrap_or_default();
        if !transferable && !next.is_empty() {
            return Err(KeriError::Validation(
                "Non-transferable prefix with a next-key commitment".to_string(),
            ));
        }
        let next_commitment = if next.is_empty() { None } else { Some(next) };

        let indices = verified_indices(&message, &keys, sigs)?;
        if !threshold.satisfy(&indices) {
            return Err(KeriError::MissingSignatures(format!(
                "{} of {} required signatures on inception of {}",
                indices.len(),
                threshold.size(),
                event.prefix
            )));
        }

        let delegator = if event.ilk == Ilk::Dip {
            Some(validate_delegation(store.as_ref(), &message, None)?)
        } else {
            None
        };

        let prefix = event.prefix.clone();
        let establishment_only = event.is_establishment_only();
        let dig = persist(store.as_ref(), &message, sigs)?;

        tracing::debug!(%prefix, "Accepted inception");

        Ok(Self {
            prefix,
            sn: 0,
            threshold,
            keys,
            next_commitment,
            witness_threshold: toad,
            witnesses,
            last_establishment: (0, dig),
            establishment_only,
            delegator,
            store,
            message,
        })
    }

    /// Applies a rotation, delegated rotation, or interaction event.
    pub fn update(
        &mut self,
        message: EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        let event = message.event();
        event.validate_structure()?;
        if event.prefix != self.prefix {
            return Err(KeriError::Validation(format!(
                "Event prefix {} does not match state {}",
                event.prefix, self.prefix
            )));
        }
        match event.ilk {
            Ilk::Rot | Ilk::Drt => self.rotate(message, sigs),
            Ilk::Ixn => self.interact(message, sigs),
            other => Err(KeriError::Validation(format!(
                "{other} cannot update key state"
            ))),
        }
    }

    fn rotate(
        &mut self,
        message: EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        let event = message.event();
        let sn = message.sn()?;

        let committed = self.next_commitment.clone().ok_or_else(|| {
            KeriError::Validation(format!(
                "Identifier {} is locked non-transferable",
                self.prefix
            ))
        })?;

        if sn > self.sn + 1 {
            return Err(KeriError::OutOfOrder(format!(
                "Rotation at sn {sn} while state is at {}",
                self.sn
            )));
        }

        let prior = event
            .prior
            .as_deref()
            .ok_or_else(|| KeriError::Validation("Rotation without prior digest".to_string()))?;

        if sn == self.sn + 1 {
            if !self.message.compare(prior)? {
                return Err(KeriError::Validation(format!(
                    "Prior digest mismatch at sn {sn}"
                )));
            }
        } else {
            // Superseding recovery: only uncommitted interaction events may
            // be overwritten, never an establishment event.
            if sn <= self.last_establishment.0 {
                return Err(KeriError::LikelyDuplicitous(format!(
                    "Rotation at sn {sn} would supersede establishment at {}",
                    self.last_establishment.0
                )));
            }
            let displaced = self.committed_message_at(sn)?;
            // re-applying an already-committed recovery (state rebuild)
            // displaces nothing; otherwise only an uncommitted interaction
            // may be overwritten
            let reapplying = displaced.raw() == message.raw();
            if !reapplying && displaced.ilk() != Ilk::Ixn {
                return Err(KeriError::LikelyDuplicitous(format!(
                    "Rotation at sn {sn} conflicts with a committed {} event",
                    displaced.ilk()
                )));
            }
            let previous = self.committed_message_at(sn - 1)?;
            if !previous.compare(prior)? {
                return Err(KeriError::Validation(format!(
                    "Recovery prior digest mismatch at sn {sn}"
                )));
            }
        }

        let threshold = message.threshold()?;
        let keys = message.verifiers()?;
        if keys.len() < threshold.size() {
            return Err(KeriError::Validation(format!(
                "Key list of {} below threshold size {}",
                keys.len(),
                threshold.size()
            )));
        }

        let revealed = event.keys.clone().unwrap_or_default();
        if !NextCommitment::verify(&committed, &threshold.limen(), &revealed)? {
            return Err(KeriError::Validation(format!(
                "Revealed keys do not open the next-key commitment at sn {sn}"
            )));
        }

        let cuts = event.cuts.clone().unwrap_or_default();
        let adds = event.adds.clone().unwrap_or_default();
        let toad = event.toad_u64()?;
        let witnesses = apply_witness_changes(&self.witnesses, &cuts, &adds)?;
        validate_witness_set(&witnesses, toad)?;

        let indices = verified_indices(&message, &keys, sigs)?;
        if !threshold.satisfy(&indices) {
            return Err(KeriError::MissingSignatures(format!(
                "{} of {} required signatures on rotation of {}",
                indices.len(),
                threshold.size(),
                self.prefix
            )));
        }

        match (event.ilk, self.delegator.as_deref()) {
            (Ilk::Drt, Some(delegator)) => {
                validate_delegation(self.store.as_ref(), &message, Some(delegator))?;
            }
            (Ilk::Drt, None) => {
                return Err(KeriError::Validation(
                    "Delegated rotation of a non-delegated identifier".to_string(),
                ));
            }
            (Ilk::Rot, Some(_)) => {
                return Err(KeriError::Validation(
                    "Plain rotation of a delegated identifier".to_string(),
                ));
            }
            _ => {}
        }

        let next = event.next.clone().unwrap_or_default();
        let dig = persist(self.store.as_ref(), &message, sigs)?;

        self.sn = sn;
        self.message = message;
        self.threshold = threshold;
        self.keys = keys;
        self.next_commitment = if next.is_empty() { None } else { Some(next) };
        self.witness_threshold = toad;
        self.witnesses = witnesses;
        self.last_establishment = (sn, dig);

        tracing::debug!(prefix = %self.prefix, sn, "Accepted rotation");
        Ok(())
    }

    fn interact(
        &mut self,
        message: EventMessage,
        sigs: &[IndexedSignature],
    ) -> Result<(), KeriError> {
        if self.establishment_only {
            return Err(KeriError::Validation(format!(
                "Identifier {} accepts establishment events only",
                self.prefix
            )));
        }
        let sn = message.sn()?;
        if sn > self.sn + 1 {
            return Err(KeriError::OutOfOrder(format!(
                "Interaction at sn {sn} while state is at {}",
                self.sn
            )));
        }
        if sn <= self.sn {
            return Err(KeriError::LikelyDuplicitous(format!(
                "Interaction at already-logged sn {sn}"
            )));
        }
        let prior = message.event().prior.as_deref().ok_or_else(|| {
            KeriError::Validation("Interaction without prior digest".to_string())
        })?;
        if !self.message.compare(prior)? {
            return Err(KeriError::Validation(format!(
                "Prior digest mismatch at sn {sn}"
            )));
        }

        // signatures verify against the existing, unchanged keys
        let indices = verified_indices(&message, &self.keys, sigs)?;
        if !self.threshold.satisfy(&indices) {
            return Err(KeriError::MissingSignatures(format!(
                "{} of {} required signatures on interaction of {}",
                indices.len(),
                self.threshold.size(),
                self.prefix
            )));
        }

        persist(self.store.as_ref(), &message, sigs)?;
        self.sn = sn;
        self.message = message;

        tracing::debug!(prefix = %self.prefix, sn, "Accepted interaction");
        Ok(())
    }

    fn committed_message_at(&self, sn: u64) -> Result<EventMessage, KeriError> {
        let dig = self
            .store
            .last_digest_at(&self.prefix, sn)?
            .ok_or_else(|| KeriError::Validation(format!("No committed event at sn {sn}")))?;
        let bytes = self
            .store
            .event_bytes(&self.prefix, &dig)?
            .ok_or_else(|| KeriError::Store(format!("Missing event bytes for {dig}")))?;
        EventMessage::from_bytes(&bytes)
    }

    // ==================== Accessors ====================

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn sn(&self) -> u64 {
        self.sn
    }

    /// The latest accepted event.
    pub fn message(&self) -> &EventMessage {
        &self.message
    }

    pub fn threshold(&self) -> &SigningThreshold {
        &self.threshold
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    pub fn next_commitment(&self) -> Option<&str> {
        self.next_commitment.as_deref()
    }

    /// True once no further establishment events can be accepted.
    pub fn is_locked(&self) -> bool {
        self.next_commitment.is_none()
    }

    pub fn witness_threshold(&self) -> u64 {
        self.witness_threshold
    }

    pub fn witnesses(&self) -> &[String] {
        &self.witnesses
    }

    /// Location `(sn, digest)` of the latest establishment event.
    pub fn last_establishment(&self) -> (u64, &str) {
        (self.last_establishment.0, &self.last_establishment.1)
    }

    pub fn delegator(&self) -> Option<&str> {
        self.delegator.as_deref()
    }
}

/// Verifies attached indexed signatures, returning the key positions that
/// verified. Unverifiable signatures are dropped with a warning; an index
/// past the key list is a hard failure.
pub(crate) fn verified_indices(
    message: &EventMessage,
    verifiers: &[PublicKey],
    sigs: &[IndexedSignature],
) -> Result<Vec<u64>, KeriError> {
    let mut indices = Vec::new();
    for sig in sigs {
        let verifier = verifiers.get(sig.index() as usize).ok_or_else(|| {
            KeriError::Validation(format!(
                "Signature index {} out of range for {} keys",
                sig.index(),
                verifiers.len()
            ))
        })?;
        match verifier.verify_indexed(message.raw(), sig) {
            Ok(()) => indices.push(sig.index()),
            Err(_) => {
                tracing::warn!(index = sig.index(), "Discarding unverifiable signature");
            }
        }
    }
    Ok(indices)
}

fn validate_witness_set(witnesses: &[String], toad: u64) -> Result<(), KeriError> {
    let unique: HashSet<&String> = witnesses.iter().collect();
    if unique.len() != witnesses.len() {
        return Err(KeriError::Validation("Duplicate witnesses".to_string()));
    }
    if witnesses.is_empty() {
        if toad != 0 {
            return Err(KeriError::Validation(format!(
                "Witness threshold {toad} with no witnesses"
            )));
        }
    } else if toad == 0 || toad > witnesses.len() as u64 {
        return Err(KeriError::Validation(format!(
            "Witness threshold {toad} out of bounds for {} witnesses",
            witnesses.len()
        )));
    }
    Ok(())
}

fn apply_witness_changes(
    current: &[String],
    cuts: &[String],
    adds: &[String],
) -> Result<Vec<String>, KeriError> {
    let cut_set: HashSet<&String> = cuts.iter().collect();
    let add_set: HashSet<&String> = adds.iter().collect();
    if cut_set.len() != cuts.len() || add_set.len() != adds.len() {
        return Err(KeriError::Validation(
            "Duplicate entries in witness cuts or adds".to_string(),
        ));
    }
    if cut_set.intersection(&add_set).next().is_some() {
        return Err(KeriError::Validation(
            "Witness cuts and adds overlap".to_string(),
        ));
    }
    let current_set: HashSet<&String> = current.iter().collect();
    if cuts.iter().any(|c| !current_set.contains(c)) {
        return Err(KeriError::Validation(
            "Witness cut not in current witness set".to_string(),
        ));
    }
    if adds.iter().any(|a| current_set.contains(a)) {
        return Err(KeriError::Validation(
            "Witness add already in current witness set".to_string(),
        ));
    }
    let mut result: Vec<String> = current
        .iter()
        .filter(|w| !cut_set.contains(*w))
        .cloned()
        .collect();
    result.extend(adds.iter().cloned());
    Ok(result)
}

/// Validates that a delegated event is anchored in its delegator's log,
/// returning the delegator prefix.
///
/// The seal names the delegating event by location and by the digest of its
/// prior event (the delegating event's own digest cannot appear inside the
/// delegate, since the delegating event anchors the delegate's digest).
fn validate_delegation(
    store: &dyn EventStore,
    message: &EventMessage,
    expected_delegator: Option<&str>,
) -> Result<String, KeriError> {
    let event = message.event();
    let seal = event.delegation.as_ref().ok_or_else(|| {
        KeriError::Validation(format!("{} event without delegation seal", event.ilk))
    })?;

    if let Some(expected) = expected_delegator {
        if seal.prefix != expected {
            return Err(KeriError::Validation(format!(
                "Delegation seal names {} but delegator is {expected}",
                seal.prefix
            )));
        }
    }

    let seal_sn = seal.sn_u64()?;
    let delegating_dig = store
        .last_digest_at(&seal.prefix, seal_sn)?
        .ok_or_else(|| {
            KeriError::MissingDelegation(format!(
                "No delegating event at {} sn {seal_sn}",
                seal.prefix
            ))
        })?;
    let bytes = store
        .event_bytes(&seal.prefix, &delegating_dig)?
        .ok_or_else(|| {
            KeriError::MissingDelegation(format!(
                "Delegating event bytes for {delegating_dig} absent"
            ))
        })?;
    let delegating = EventMessage::from_bytes(&bytes)?;

    // corroborate the location against the seal's prior digest
    if delegating.event().prior.as_deref() != Some(seal.prior.as_str()) {
        return Err(KeriError::MissingDelegation(format!(
            "Delegating event at sn {seal_sn} does not chain from {}",
            seal.prior
        )));
    }

    let anchored = delegating
        .event()
        .seals
        .iter()
        .flatten()
        .any(|anchor| match anchor {
            Seal::Event(anchor) => {
                anchor.prefix == event.prefix
                    && anchor.sn == event.sn
                    && message.compare(&anchor.dig).unwrap_or(false)
            }
            Seal::Digest(anchor) => message.compare(&anchor.dig).unwrap_or(false),
        });
    if !anchored {
        return Err(KeriError::MissingDelegation(format!(
            "Delegating event does not anchor {} at sn {}",
            event.prefix, event.sn
        )));
    }
    Ok(seal.prefix.clone())
}

/// Persists an accepted event: bytes, signatures, timestamp, log position,
/// and first-seen ordinal.
fn persist(
    store: &dyn EventStore,
    message: &EventMessage,
    sigs: &[IndexedSignature],
) -> Result<String, KeriError> {
    let prefix = message.prefix();
    let dig = message.said().qb64();
    let sn = message.sn()?;
    store.put_event_bytes(prefix, &dig, message.raw())?;
    let sig_texts: Vec<String> = sigs.iter().map(|s| s.qb64()).collect();
    store.put_signatures(prefix, &dig, &sig_texts)?;
    store.put_timestamp(prefix, &dig, Utc::now())?;
    store.put_kel_at(prefix, sn, &dig)?;
    store.append_first_seen(prefix, &dig)?;
    Ok(dig)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{InceptionBuilder, RotationBuilder, interact};
    use crate::prefix::PrefixDerivation;
    use crate::store::MemoryEventStore;
    use crate::types::{DigestSeal, ThresholdSpec};
    use cesr::{PrivateKey, generate_ed25519};

    fn keypairs(n: usize) -> Vec<(cesr::PublicKey, PrivateKey)> {
        (0..n).map(|_| generate_ed25519().unwrap()).collect()
    }

    fn sign_all(message: &EventMessage, seeds: &[&PrivateKey]) -> Vec<IndexedSignature> {
        seeds
            .iter()
            .enumerate()
            .map(|(i, seed)| seed.sign_indexed(message.raw(), i as u32).unwrap())
            .collect()
    }

    fn anchor_seal() -> Seal {
        Seal::Digest(DigestSeal {
            dig: cesr::Digest::blake3_256(b"anchor").qb64(),
        })
    }

    #[test]
    fn test_single_key_inception() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()]).build().unwrap();
        let sigs = sign_all(&icp, &[&private]);

        let state = KeyState::incept(icp.clone(), &sigs, store.clone()).unwrap();
        assert_eq!(state.sn(), 0);
        assert_eq!(state.prefix(), public.qb64());
        assert!(state.is_locked()); // empty next commitment
        assert_eq!(state.keys().len(), 1);

        // committed to the log
        let dig = icp.said().qb64();
        assert_eq!(
            store.last_digest_at(state.prefix(), 0).unwrap().as_deref(),
            Some(dig.as_str())
        );
        assert_eq!(store.first_seen(state.prefix()).unwrap().len(), 1);
        assert!(!store.signatures(state.prefix(), &dig).unwrap().is_empty());
    }

    #[test]
    fn test_inception_below_threshold_is_retryable() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let pairs = keypairs(2);
        let keys: Vec<String> = pairs.iter().map(|(p, _)| p.qb64()).collect();
        let icp = InceptionBuilder::new(keys)
            .with_threshold(ThresholdSpec::count(2))
            .build()
            .unwrap();

        let sigs = vec![pairs[0].1.sign_indexed(icp.raw(), 0).unwrap()];
        let err = KeyState::incept(icp, &sigs, store).unwrap_err();
        assert!(matches!(err, KeriError::MissingSignatures(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_inception_prefix_mismatch_is_fatal() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (other, _) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()]).build().unwrap();

        // graft a foreign prefix onto the signed bytes
        let mut event = icp.event().clone();
        event.prefix = other.qb64();
        let forged = EventMessage::new(event, icp.kind()).unwrap();
        let sigs = sign_all(&forged, &[&private]);

        let err = KeyState::incept(forged, &sigs, store).unwrap_err();
        assert!(matches!(err, KeriError::Validation(_)));
    }

    #[test]
    fn test_rotation_happy_path() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, next_private) = generate_ed25519().unwrap();

        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();
        assert!(!state.is_locked());

        let (third_public, _) = generate_ed25519().unwrap();
        let rot = RotationBuilder::new(&icp, vec![next_public.qb64()])
            .unwrap()
            .with_next_keys(vec![third_public.qb64()], None)
            .build()
            .unwrap();

        state
            .update(rot.clone(), &sign_all(&rot, &[&next_private]))
            .unwrap();
        assert_eq!(state.sn(), 1);
        assert_eq!(state.last_establishment().0, 1);
        assert_eq!(state.keys()[0].qb64(), next_public.qb64());
    }

    #[test]
    fn test_rotation_of_locked_identifier_rejected() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()]).build().unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();

        let (next_public, next_private) = generate_ed25519().unwrap();
        let rot = RotationBuilder::new(&icp, vec![next_public.qb64()])
            .unwrap()
            .build()
            .unwrap();
        let err = state
            .update(rot.clone(), &sign_all(&rot, &[&next_private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::Validation(_)));
        assert_eq!(state.sn(), 0);
    }

    #[test]
    fn test_rotation_wrong_reveal_rejected() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, _) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();

        // reveal a key that was never committed to
        let (wrong_public, wrong_private) = generate_ed25519().unwrap();
        let rot = RotationBuilder::new(&icp, vec![wrong_public.qb64()])
            .unwrap()
            .build()
            .unwrap();
        let err = state
            .update(rot.clone(), &sign_all(&rot, &[&wrong_private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::Validation(_)));
    }

    #[test]
    fn test_interaction_happy_path_and_bad_prior() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, _) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();

        let ixn = interact(&icp, vec![anchor_seal()]).unwrap();
        state
            .update(ixn.clone(), &sign_all(&ixn, &[&private]))
            .unwrap();
        assert_eq!(state.sn(), 1);
        // interaction does not move the establishment location
        assert_eq!(state.last_establishment().0, 0);

        // wrong prior digest: chain from the inception again
        let bad = interact(&icp, vec![anchor_seal()]).unwrap();
        let mut event = bad.event().clone();
        event.sn = "2".to_string();
        event.prior = Some(cesr::Digest::blake3_256(b"wrong").qb64());
        let bad = EventMessage::new(event, bad.kind()).unwrap();
        let err = state
            .update(bad.clone(), &sign_all(&bad, &[&private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::Validation(_)));
        assert_eq!(state.sn(), 1);
    }

    #[test]
    fn test_out_of_order_is_retryable() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, _) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();

        let ixn = interact(&icp, vec![anchor_seal()]).unwrap();
        let mut event = ixn.event().clone();
        event.sn = "5".to_string();
        let skipped = EventMessage::new(event, ixn.kind()).unwrap();
        let err = state
            .update(skipped.clone(), &sign_all(&skipped, &[&private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::OutOfOrder(_)));
        assert!(err.is_retryable());
        assert_eq!(state.sn(), 0);
    }

    #[test]
    fn test_recovery_supersedes_interaction_not_establishment() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, next_private) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), Arc::clone(&store))
                .unwrap();

        // two interactions the controller later disavows
        let ixn1 = interact(&icp, vec![anchor_seal()]).unwrap();
        state
            .update(ixn1.clone(), &sign_all(&ixn1, &[&private]))
            .unwrap();
        let ixn2 = interact(&ixn1, vec![anchor_seal()]).unwrap();
        state
            .update(ixn2.clone(), &sign_all(&ixn2, &[&private]))
            .unwrap();
        assert_eq!(state.sn(), 2);

        // recovery rotation at sn 1 supersedes the first interaction
        let (third_public, _) = generate_ed25519().unwrap();
        let recovery = RotationBuilder::new(&icp, vec![next_public.qb64()])
            .unwrap()
            .with_next_keys(vec![third_public.qb64()], None)
            .recovering_at(1, icp.said().qb64())
            .build()
            .unwrap();
        state
            .update(recovery.clone(), &sign_all(&recovery, &[&next_private]))
            .unwrap();
        assert_eq!(state.sn(), 1);
        assert_eq!(state.last_establishment().0, 1);

        // the recovered branch is now the latest at sn 1
        assert_eq!(
            store.last_digest_at(state.prefix(), 1).unwrap().as_deref(),
            Some(recovery.said().qb64().as_str())
        );

        // a second recovery aimed at the establishment event must fail
        let (fourth_public, fourth_private) = generate_ed25519().unwrap();
        let bad = RotationBuilder::new(&icp, vec![third_public.qb64()])
            .unwrap()
            .with_next_keys(vec![fourth_public.qb64()], None)
            .recovering_at(1, icp.said().qb64())
            .build()
            .unwrap();
        let err = state
            .update(bad.clone(), &sign_all(&bad, &[&fourth_private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::LikelyDuplicitous(_)));
    }

    #[test]
    fn test_establishment_only_rejects_interaction() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let (public, private) = generate_ed25519().unwrap();
        let (next_public, _) = generate_ed25519().unwrap();
        let icp = InceptionBuilder::new(vec![public.qb64()])
            .with_next_keys(vec![next_public.qb64()], None)
            .with_traits(vec![crate::types::TRAIT_ESTABLISHMENT_ONLY.to_string()])
            .build()
            .unwrap();
        let mut state =
            KeyState::incept(icp.clone(), &sign_all(&icp, &[&private]), store).unwrap();

        let ixn = interact(&icp, vec![anchor_seal()]).unwrap();
        let err = state
            .update(ixn.clone(), &sign_all(&ixn, &[&private]))
            .unwrap_err();
        assert!(matches!(err, KeriError::Validation(_)));
    }

    #[test]
    fn test_witness_arithmetic() {
        let wits: Vec<String> = (0..3)
            .map(|_| {
                generate_ed25519()
                    .unwrap()
                    .1
                    .public_key_with(cesr::KeyCode::Ed25519NonTransferable)
                    .qb64()
            })
            .collect();

        // plain application
        let next = apply_witness_changes(&wits, &wits[..1].to_vec(), &[]).unwrap();
        assert_eq!(next.len(), 2);

        // overlapping cut/add
        let overlap = apply_witness_changes(&wits, &wits[..1].to_vec(), &wits[..1].to_vec());
        assert!(overlap.is_err());

        // cut of an unknown witness
        let unknown = apply_witness_changes(&wits, &["Bunknown".to_string()], &[]);
        assert!(unknown.is_err());

        // duplicate adds
        let dup = apply_witness_changes(&wits, &[], &["Bx".to_string(), "Bx".to_string()]);
        assert!(dup.is_err());

        // toad bounds
        assert!(validate_witness_set(&wits, 0).is_err());
        assert!(validate_witness_set(&wits, 4).is_err());
        assert!(validate_witness_set(&wits, 2).is_ok());
        assert!(validate_witness_set(&[], 0).is_ok());
        assert!(validate_witness_set(&[], 1).is_err());
    }

    #[test]
    fn test_delegated_inception_requires_anchor() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());

        // delegator with its own key state
        let (del_public, del_private) = generate_ed25519().unwrap();
        let (del_next, _) = generate_ed25519().unwrap();
        let del_icp = InceptionBuilder::new(vec![del_public.qb64()])
            .with_next_keys(vec![del_next.qb64()], None)
            .build()
            .unwrap();
        let mut delegator = KeyState::incept(
            del_icp.clone(),
            &sign_all(&del_icp, &[&del_private]),
            Arc::clone(&store),
        )
        .unwrap();

        // the delegate commits to the delegating event's future location:
        // the delegator's next interaction, at sn 1, chaining from inception
        let (public, private) = generate_ed25519().unwrap();
        let seal = crate::types::DelegationSeal::new(
            delegator.prefix(),
            1,
            del_icp.said().qb64(),
        );
        let dip = InceptionBuilder::new(vec![public.qb64()])
            .with_delegation(seal)
            .with_derivation(PrefixDerivation::SelfAddressing(
                cesr::DigestCode::Blake3_256,
            ))
            .build()
            .unwrap();
        let dip_sigs = sign_all(&dip, &[&private]);

        // the delegator has not anchored it yet: retryable
        let err =
            KeyState::incept(dip.clone(), &dip_sigs, Arc::clone(&store)).unwrap_err();
        assert!(matches!(err, KeriError::MissingDelegation(_)));
        assert!(err.is_retryable());

        // delegator anchors the delegate's digest at the committed location
        let anchor = Seal::Event(crate::types::EventSeal::new(
            dip.prefix(),
            0,
            dip.said().qb64(),
        ));
        let ixn = interact(&del_icp, vec![anchor]).unwrap();
        delegator
            .update(ixn.clone(), &sign_all(&ixn, &[&del_private]))
            .unwrap();

        // the same delegated inception now validates
        let state = KeyState::incept(dip.clone(), &dip_sigs, store).unwrap();
        assert_eq!(state.delegator(), Some(delegator.prefix()));
        assert_eq!(state.sn(), 0);
    }
}
