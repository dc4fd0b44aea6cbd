//! Key event model

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::KeriError;

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ilk {
    Icp, // Inception
    Rot, // Rotation
    Ixn, // Interaction (anchor)
    Dip, // Delegated inception
    Drt, // Delegated rotation
    Rct, // Receipt (non-transferable receipter)
    Vrc, // Receipt (transferable receipter)
}

impl Ilk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Icp => "icp",
            Self::Rot => "rot",
            Self::Ixn => "ixn",
            Self::Dip => "dip",
            Self::Drt => "drt",
            Self::Rct => "rct",
            Self::Vrc => "vrc",
        }
    }

    pub fn is_inception(&self) -> bool {
        matches!(self, Self::Icp | Self::Dip)
    }

    /// Establishment events may change keys, thresholds, or witnesses.
    pub fn is_establishment(&self) -> bool {
        matches!(self, Self::Icp | Self::Rot | Self::Dip | Self::Drt)
    }

    pub fn is_rotation(&self) -> bool {
        matches!(self, Self::Rot | Self::Drt)
    }

    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Dip | Self::Drt)
    }

    pub fn is_receipt(&self) -> bool {
        matches!(self, Self::Rct | Self::Vrc)
    }
}

impl fmt::Display for Ilk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Ilk {
    type Err = KeriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icp" => Ok(Self::Icp),
            "rot" => Ok(Self::Rot),
            "ixn" => Ok(Self::Ixn),
            "dip" => Ok(Self::Dip),
            "drt" => Ok(Self::Drt),
            "rct" => Ok(Self::Rct),
            "vrc" => Ok(Self::Vrc),
            _ => Err(KeriError::Validation(format!("Unknown ilk: {}", s))),
        }
    }
}

/// Signing threshold as it appears on the wire: either a plain count or
/// clauses of fractional weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Count(String),
    Weighted(Vec<Vec<String>>),
}

impl ThresholdSpec {
    pub fn count(value: u64) -> Self {
        Self::Count(format!("{value:x}"))
    }
}

/// Reference to an event in some identifier's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventSeal {
    #[serde(rename = "i")]
    pub prefix: String,
    #[serde(rename = "s")]
    pub sn: String,
    #[serde(rename = "d")]
    pub dig: String,
}

impl EventSeal {
    pub fn new(prefix: impl Into<String>, sn: u64, dig: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sn: format!("{sn:x}"),
            dig: dig.into(),
        }
    }

    pub fn sn_u64(&self) -> Result<u64, KeriError> {
        parse_hex(&self.sn)
    }
}

/// Location of a delegating event in the delegator's log.
///
/// Carries the digest of the event *prior* to the delegating one rather
/// than the delegating event's own digest: the delegating event anchors the
/// delegate's digest, so referencing it by digest from inside the delegate
/// would be circular.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegationSeal {
    #[serde(rename = "i")]
    pub prefix: String,
    #[serde(rename = "s")]
    pub sn: String,
    #[serde(rename = "p")]
    pub prior: String,
}

impl DelegationSeal {
    pub fn new(prefix: impl Into<String>, sn: u64, prior: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sn: format!("{sn:x}"),
            prior: prior.into(),
        }
    }

    pub fn sn_u64(&self) -> Result<u64, KeriError> {
        parse_hex(&self.sn)
    }
}

/// Bare digest anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DigestSeal {
    #[serde(rename = "d")]
    pub dig: String,
}

/// Anchored data: either a full event location or a bare digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seal {
    Event(EventSeal),
    Digest(DigestSeal),
}

impl Seal {
    pub fn dig(&self) -> &str {
        match self {
            Seal::Event(seal) => &seal.dig,
            Seal::Digest(seal) => &seal.dig,
        }
    }
}

/// Config trait: identifier accepts establishment events only.
pub const TRAIT_ESTABLISHMENT_ONLY: &str = "EO";

/// A key event as an ordered field map. Field declaration order is
/// serialization order for every supported encoding, and the version string
/// must come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    #[serde(rename = "v")]
    pub version: String,
    #[serde(rename = "i")]
    pub prefix: String,
    #[serde(rename = "s")]
    pub sn: String,
    #[serde(rename = "t")]
    pub ilk: Ilk,
    /// Digest of the receipted event (receipts only).
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    pub dig: Option<String>,
    /// Digest of the prior event.
    #[serde(rename = "p", skip_serializing_if = "Option::is_none")]
    pub prior: Option<String>,
    #[serde(rename = "kt", skip_serializing_if = "Option::is_none")]
    pub sith: Option<ThresholdSpec>,
    #[serde(rename = "k", skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    /// Next-key commitment digest; empty string locks the identifier.
    #[serde(rename = "n", skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Witness threshold of accountable duplicity.
    #[serde(rename = "wt", skip_serializing_if = "Option::is_none")]
    pub toad: Option<String>,
    #[serde(rename = "w", skip_serializing_if = "Option::is_none")]
    pub witnesses: Option<Vec<String>>,
    /// Witnesses removed by this rotation.
    #[serde(rename = "wr", skip_serializing_if = "Option::is_none")]
    pub cuts: Option<Vec<String>>,
    /// Witnesses added by this rotation.
    #[serde(rename = "wa", skip_serializing_if = "Option::is_none")]
    pub adds: Option<Vec<String>>,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    pub traits: Option<Vec<String>>,
    #[serde(rename = "a", skip_serializing_if = "Option::is_none")]
    pub seals: Option<Vec<Seal>>,
    /// Delegating event location (delegated ilks only).
    #[serde(rename = "da", skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationSeal>,
}

pub(crate) fn parse_hex(text: &str) -> Result<u64, KeriError> {
    u64::from_str_radix(text, 16)
        .map_err(|_| KeriError::Validation(format!("Invalid hex number: {}", text)))
}

impl KeyEvent {
    pub fn sn_u64(&self) -> Result<u64, KeriError> {
        parse_hex(&self.sn)
    }

    pub fn toad_u64(&self) -> Result<u64, KeriError> {
        parse_hex(self.toad.as_deref().unwrap_or("0"))
    }

    pub fn is_establishment(&self) -> bool {
        self.ilk.is_establishment()
    }

    /// True when the config traits restrict this identifier to establishment
    /// events.
    pub fn is_establishment_only(&self) -> bool {
        self.traits
            .as_deref()
            .is_some_and(|ts| ts.iter().any(|t| t == TRAIT_ESTABLISHMENT_ONLY))
    }

    /// Validates that exactly the fields required for this event's ilk are
    /// present.
    pub fn validate_structure(&self) -> Result<(), KeriError> {
        let require = |name: &str, present: bool| -> Result<(), KeriError> {
            if present {
                Ok(())
            } else {
                Err(KeriError::Validation(format!(
                    "{} event requires {}",
                    self.ilk, name
                )))
            }
        };
        let forbid = |name: &str, present: bool| -> Result<(), KeriError> {
            if present {
                Err(KeriError::Validation(format!(
                    "{} event must not have {}",
                    self.ilk, name
                )))
            } else {
                Ok(())
            }
        };

        require("i", !self.prefix.is_empty())?;
        self.sn_u64()?;

        match self.ilk {
            Ilk::Icp | Ilk::Dip => {
                require("kt", self.sith.is_some())?;
                require("k", self.keys.is_some())?;
                require("n", self.next.is_some())?;
                require("wt", self.toad.is_some())?;
                require("w", self.witnesses.is_some())?;
                require("c", self.traits.is_some())?;
                forbid("d", self.dig.is_some())?;
                forbid("p", self.prior.is_some())?;
                forbid("wr", self.cuts.is_some())?;
                forbid("wa", self.adds.is_some())?;
                forbid("a", self.seals.is_some())?;
                if self.ilk == Ilk::Dip {
                    require("da", self.delegation.is_some())?;
                } else {
                    forbid("da", self.delegation.is_some())?;
                }
                if self.sn != "0" {
                    return Err(KeriError::Validation(format!(
                        "Inception sequence number must be 0, got {}",
                        self.sn
                    )));
                }
            }
            Ilk::Rot | Ilk::Drt => {
                require("p", self.prior.is_some())?;
                require("kt", self.sith.is_some())?;
                require("k", self.keys.is_some())?;
                require("n", self.next.is_some())?;
                require("wt", self.toad.is_some())?;
                require("wr", self.cuts.is_some())?;
                require("wa", self.adds.is_some())?;
                forbid("d", self.dig.is_some())?;
                forbid("w", self.witnesses.is_some())?;
                forbid("c", self.traits.is_some())?;
                if self.ilk == Ilk::Drt {
                    require("da", self.delegation.is_some())?;
                } else {
                    forbid("da", self.delegation.is_some())?;
                }
            }
            Ilk::Ixn => {
                require("p", self.prior.is_some())?;
                require("a", self.seals.is_some())?;
                forbid("d", self.dig.is_some())?;
                forbid("kt", self.sith.is_some())?;
                forbid("k", self.keys.is_some())?;
                forbid("n", self.next.is_some())?;
                forbid("wt", self.toad.is_some())?;
                forbid("w", self.witnesses.is_some())?;
                forbid("wr", self.cuts.is_some())?;
                forbid("wa", self.adds.is_some())?;
                forbid("c", self.traits.is_some())?;
                forbid("da", self.delegation.is_some())?;
            }
            Ilk::Rct => {
                require("d", self.dig.is_some())?;
                forbid("p", self.prior.is_some())?;
                forbid("kt", self.sith.is_some())?;
                forbid("k", self.keys.is_some())?;
                forbid("n", self.next.is_some())?;
                forbid("wt", self.toad.is_some())?;
                forbid("w", self.witnesses.is_some())?;
                forbid("wr", self.cuts.is_some())?;
                forbid("wa", self.adds.is_some())?;
                forbid("c", self.traits.is_some())?;
                forbid("a", self.seals.is_some())?;
                forbid("da", self.delegation.is_some())?;
            }
            Ilk::Vrc => {
                require("d", self.dig.is_some())?;
                require("a", self.seals.is_some())?;
                let seal_ok = matches!(
                    self.seals.as_deref(),
                    Some([Seal::Event(_)])
                );
                require("a single event seal in a", seal_ok)?;
                forbid("p", self.prior.is_some())?;
                forbid("kt", self.sith.is_some())?;
                forbid("k", self.keys.is_some())?;
                forbid("n", self.next.is_some())?;
                forbid("wt", self.toad.is_some())?;
                forbid("w", self.witnesses.is_some())?;
                forbid("wr", self.cuts.is_some())?;
                forbid("wa", self.adds.is_some())?;
                forbid("c", self.traits.is_some())?;
                forbid("da", self.delegation.is_some())?;
            }
        }

        Ok(())
    }

    /// The receipter's establishment event seal on a transferable receipt.
    pub fn receipter_seal(&self) -> Option<&EventSeal> {
        match self.seals.as_deref() {
            Some([Seal::Event(seal)]) if self.ilk == Ilk::Vrc => Some(seal),
            _ => None,
        }
    }
}
