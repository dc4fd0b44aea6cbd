//! Key event builders
//!
//! Assemble well-formed events with derived identifiers, defaulted
//! thresholds, and computed next-key commitments. The builders produce
//! `EventMessage`s ready to sign and feed to a processor.

use cesr::{DigestCode, Matter as _};

use crate::commitment::NextCommitment;
use crate::error::KeriError;
use crate::prefix::{self, PrefixDerivation};
use crate::serder::{EventMessage, SerializationKind};
use crate::threshold::SigningThreshold;
use crate::types::{DelegationSeal, EventSeal, Ilk, KeyEvent, Seal, ThresholdSpec};

fn default_threshold(count: usize) -> ThresholdSpec {
    ThresholdSpec::count((count as u64).div_ceil(2).max(1))
}

fn default_toad(witnesses: usize) -> u64 {
    if witnesses == 0 {
        0
    } else {
        witnesses as u64 / 2 + 1
    }
}

fn commitment_for(
    next_keys: &[String],
    next_sith: Option<&ThresholdSpec>,
) -> Result<String, KeriError> {
    if next_keys.is_empty() {
        return Ok(String::new());
    }
    let spec = match next_sith {
        Some(spec) => spec.clone(),
        None => default_threshold(next_keys.len()),
    };
    let threshold = SigningThreshold::from_spec(&spec)?;
    Ok(NextCommitment::derive(DigestCode::Blake3_256, &threshold.limen(), next_keys)?.qb64())
}

/// Builds inception (and delegated inception) events.
pub struct InceptionBuilder {
    keys: Vec<String>,
    sith: Option<ThresholdSpec>,
    next_keys: Vec<String>,
    next_sith: Option<ThresholdSpec>,
    witnesses: Vec<String>,
    toad: Option<u64>,
    traits: Vec<String>,
    delegation: Option<DelegationSeal>,
    derivation: Option<PrefixDerivation>,
    seed: Option<cesr::PrivateKey>,
    kind: SerializationKind,
}

impl InceptionBuilder {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            sith: None,
            next_keys: Vec::new(),
            next_sith: None,
            witnesses: Vec::new(),
            toad: None,
            traits: Vec::new(),
            delegation: None,
            derivation: None,
            seed: None,
            kind: SerializationKind::Json,
        }
    }

    pub fn with_threshold(mut self, sith: ThresholdSpec) -> Self {
        self.sith = Some(sith);
        self
    }

    /// Commits to the next key set (and optionally its threshold).
    pub fn with_next_keys(mut self, keys: Vec<String>, sith: Option<ThresholdSpec>) -> Self {
        self.next_keys = keys;
        self.next_sith = sith;
        self
    }

    pub fn with_witnesses(mut self, witnesses: Vec<String>, toad: Option<u64>) -> Self {
        self.witnesses = witnesses;
        self.toad = toad;
        self
    }

    pub fn with_traits(mut self, traits: Vec<String>) -> Self {
        self.traits = traits;
        self
    }

    /// Makes this a delegated inception anchored at the given location in
    /// the delegator's log.
    pub fn with_delegation(mut self, seal: DelegationSeal) -> Self {
        self.delegation = Some(seal);
        self
    }

    pub fn with_derivation(mut self, derivation: PrefixDerivation) -> Self {
        self.derivation = Some(derivation);
        self
    }

    /// Seed for self-signing derivation.
    pub fn with_seed(mut self, seed: cesr::PrivateKey) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_kind(mut self, kind: SerializationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn build(self) -> Result<EventMessage, KeriError> {
        let sith = self
            .sith
            .unwrap_or_else(|| default_threshold(self.keys.len()));
        let next = commitment_for(&self.next_keys, self.next_sith.as_ref())?;
        let toad = self.toad.unwrap_or_else(|| default_toad(self.witnesses.len()));
        let ilk = if self.delegation.is_some() {
            Ilk::Dip
        } else {
            Ilk::Icp
        };

        let derivation = self.derivation.unwrap_or(if self.keys.len() == 1 {
            PrefixDerivation::Basic
        } else {
            PrefixDerivation::SelfAddressing(DigestCode::Blake3_256)
        });

        let mut event = KeyEvent {
            version: String::new(),
            prefix: String::new(),
            sn: "0".to_string(),
            ilk,
            dig: None,
            prior: None,
            sith: Some(sith),
            keys: Some(self.keys),
            next: Some(next),
            toad: Some(format!("{toad:x}")),
            witnesses: Some(self.witnesses),
            cuts: None,
            adds: None,
            traits: Some(self.traits),
            seals: None,
            delegation: self.delegation,
        };

        event.prefix = prefix::derive(&event, self.kind, derivation, self.seed.as_ref())?;
        let message = EventMessage::new(event, self.kind)?;
        message.event().validate_structure()?;
        Ok(message)
    }
}

/// Builds rotation (and delegated rotation) events.
pub struct RotationBuilder {
    prefix: String,
    sn: u64,
    prior: String,
    keys: Vec<String>,
    sith: Option<ThresholdSpec>,
    next_keys: Vec<String>,
    next_sith: Option<ThresholdSpec>,
    cuts: Vec<String>,
    adds: Vec<String>,
    toad: Option<u64>,
    toad_base: usize,
    delegation: Option<DelegationSeal>,
    kind: SerializationKind,
}

impl RotationBuilder {
    /// Chains a rotation after `prior`, revealing the new signing keys.
    pub fn new(prior: &EventMessage, keys: Vec<String>) -> Result<Self, KeriError> {
        Ok(Self {
            prefix: prior.prefix().to_string(),
            sn: prior.sn()? + 1,
            prior: prior.said().qb64(),
            keys,
            sith: None,
            next_keys: Vec::new(),
            next_sith: None,
            cuts: Vec::new(),
            adds: Vec::new(),
            toad: None,
            toad_base: 0,
            delegation: None,
            kind: prior.kind(),
        })
    }

    pub fn with_threshold(mut self, sith: ThresholdSpec) -> Self {
        self.sith = Some(sith);
        self
    }

    pub fn with_next_keys(mut self, keys: Vec<String>, sith: Option<ThresholdSpec>) -> Self {
        self.next_keys = keys;
        self.next_sith = sith;
        self
    }

    /// Witness changes; `base` is the size of the resulting witness set,
    /// used for the default threshold.
    pub fn with_witness_changes(
        mut self,
        cuts: Vec<String>,
        adds: Vec<String>,
        base: usize,
    ) -> Self {
        self.cuts = cuts;
        self.adds = adds;
        self.toad_base = base;
        self
    }

    pub fn with_toad(mut self, toad: u64) -> Self {
        self.toad = Some(toad);
        self
    }

    /// Supersedes an uncommitted interaction event at an explicit earlier
    /// sequence number. `prior_dig` must reference the event just before it.
    pub fn recovering_at(mut self, sn: u64, prior_dig: String) -> Self {
        self.sn = sn;
        self.prior = prior_dig;
        self
    }

    /// Makes this a delegated rotation.
    pub fn with_delegation(mut self, seal: DelegationSeal) -> Self {
        self.delegation = Some(seal);
        self
    }

    pub fn build(self) -> Result<EventMessage, KeriError> {
        let sith = self
            .sith
            .unwrap_or_else(|| default_threshold(self.keys.len()));
        let next = commitment_for(&self.next_keys, self.next_sith.as_ref())?;
        let toad = self.toad.unwrap_or_else(|| default_toad(self.toad_base));
        let ilk = if self.delegation.is_some() {
            Ilk::Drt
        } else {
            Ilk::Rot
        };

        let event = KeyEvent {
            version: String::new(),
            prefix: self.prefix,
            sn: format!("{:x}", self.sn),
            ilk,
            dig: None,
            prior: Some(self.prior),
            sith: Some(sith),
            keys: Some(self.keys),
            next: Some(next),
            toad: Some(format!("{toad:x}")),
            witnesses: None,
            cuts: Some(self.cuts),
            adds: Some(self.adds),
            traits: None,
            seals: None,
            delegation: self.delegation,
        };

        let message = EventMessage::new(event, self.kind)?;
        message.event().validate_structure()?;
        Ok(message)
    }
}

/// Chains an interaction event anchoring the given seals after `prior`.
pub fn interact(prior: &EventMessage, seals: Vec<Seal>) -> Result<EventMessage, KeriError> {
    let event = KeyEvent {
        version: String::new(),
        prefix: prior.prefix().to_string(),
        sn: format!("{:x}", prior.sn()? + 1),
        ilk: Ilk::Ixn,
        dig: None,
        prior: Some(prior.said().qb64()),
        sith: None,
        keys: None,
        next: None,
        toad: None,
        witnesses: None,
        cuts: None,
        adds: None,
        traits: None,
        seals: Some(seals),
        delegation: None,
    };
    let message = EventMessage::new(event, prior.kind())?;
    message.event().validate_structure()?;
    Ok(message)
}

/// A receipt message for `receipted` from a non-transferable receipter.
/// Couples are attached separately.
pub fn receipt(receipted: &EventMessage) -> Result<EventMessage, KeriError> {
    let event = KeyEvent {
        version: String::new(),
        prefix: receipted.prefix().to_string(),
        sn: receipted.event().sn.clone(),
        ilk: Ilk::Rct,
        dig: Some(receipted.said().qb64()),
        prior: None,
        sith: None,
        keys: None,
        next: None,
        toad: None,
        witnesses: None,
        cuts: None,
        adds: None,
        traits: None,
        seals: None,
        delegation: None,
    };
    let message = EventMessage::new(event, receipted.kind())?;
    message.event().validate_structure()?;
    Ok(message)
}

/// A receipt message for `receipted` from a transferable receipter whose
/// keys were established at `receipter_seal`. Indexed signatures are
/// attached separately.
pub fn chit(
    receipted: &EventMessage,
    receipter_seal: EventSeal,
) -> Result<EventMessage, KeriError> {
    let event = KeyEvent {
        version: String::new(),
        prefix: receipted.prefix().to_string(),
        sn: receipted.event().sn.clone(),
        ilk: Ilk::Vrc,
        dig: Some(receipted.said().qb64()),
        prior: None,
        sith: None,
        keys: None,
        next: None,
        toad: None,
        witnesses: None,
        cuts: None,
        adds: None,
        traits: None,
        seals: Some(vec![Seal::Event(receipter_seal)]),
        delegation: None,
    };
    let message = EventMessage::new(event, receipted.kind())?;
    message.event().validate_structure()?;
    Ok(message)
}
