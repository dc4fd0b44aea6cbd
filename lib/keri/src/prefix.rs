//! Identifier prefix derivation
//!
//! An identifier prefix is self-certifying: it is either a controlling
//! public key directly, or a digest of (or signature over) the inception
//! event itself. Digest and signature variants substitute a same-length
//! placeholder for the identifier field before serializing, so the derived
//! value can be written back without changing the event's size.

use cesr::{Digest, DigestCode, Matter as _, PrivateKey, PublicKey, SigCode, Signature};

use crate::error::KeriError;
use crate::serder::{EventMessage, SerializationKind};
use crate::types::KeyEvent;

/// Character filling the identifier field while deriving over it.
pub const PLACEHOLDER: char = '#';

/// How an identifier prefix is derived from its inception event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixDerivation {
    /// Prefix is the sole public key; the identifier can never rotate.
    BasicNonTransferable,
    /// Prefix is the sole public key.
    Basic,
    /// Prefix is a digest of the placeholder-substituted inception event.
    SelfAddressing(DigestCode),
    /// Prefix is a signature over the placeholder-substituted inception
    /// event, made by the seed behind the sole declared key.
    SelfSigning,
}

fn sole_key(event: &KeyEvent) -> Result<&str, KeriError> {
    match event.keys.as_deref() {
        Some([key]) => Ok(key),
        _ => Err(KeriError::Validation(
            "Basic derivation requires exactly one key".to_string(),
        )),
    }
}

/// Serialization of `event` with the identifier replaced by a placeholder of
/// `width` characters.
fn placeholder_serialization(
    event: &KeyEvent,
    kind: SerializationKind,
    width: usize,
) -> Result<Vec<u8>, KeriError> {
    let mut substituted = event.clone();
    substituted.prefix = PLACEHOLDER.to_string().repeat(width);
    Ok(EventMessage::new(substituted, kind)?.raw().to_vec())
}

fn text_width(code: &str) -> Result<usize, KeriError> {
    Ok(cesr::matter::sizage(code)?.full)
}

/// Derives the identifier prefix for an inception event.
///
/// The event's identifier field is ignored; callers write the returned
/// value into it afterwards.
pub fn derive(
    event: &KeyEvent,
    kind: SerializationKind,
    derivation: PrefixDerivation,
    seed: Option<&PrivateKey>,
) -> Result<String, KeriError> {
    match derivation {
        PrefixDerivation::BasicNonTransferable => {
            let key = sole_key(event)?;
            let parsed = PublicKey::from_qb64(key)?;
            if parsed.is_transferable() {
                return Err(KeriError::Validation(
                    "Non-transferable derivation requires a non-transferable key".to_string(),
                ));
            }
            if event.next.as_deref().is_some_and(|n| !n.is_empty()) {
                return Err(KeriError::Validation(
                    "Non-transferable identifier must have an empty next commitment".to_string(),
                ));
            }
            Ok(key.to_string())
        }
        PrefixDerivation::Basic => {
            let key = sole_key(event)?;
            PublicKey::from_qb64(key)?;
            Ok(key.to_string())
        }
        PrefixDerivation::SelfAddressing(code) => {
            let width = text_width(code.code())?;
            let ser = placeholder_serialization(event, kind, width)?;
            Ok(Digest::new_with_code(code, &ser).qb64())
        }
        PrefixDerivation::SelfSigning => {
            let seed = seed.ok_or_else(|| {
                KeriError::Validation("Self-signing derivation requires a seed".to_string())
            })?;
            let key = sole_key(event)?;
            if seed.public_key().qb64() != key {
                return Err(KeriError::Validation(
                    "Seed does not correspond to the declared key".to_string(),
                ));
            }
            let width = text_width(SigCode::Ed25519.code())?;
            let ser = placeholder_serialization(event, kind, width)?;
            Ok(seed.sign(&ser)?.qb64())
        }
    }
}

/// Re-derives and compares the prefix of an inception event against its
/// declared identifier. The derivation variant is read off the prefix's own
/// code.
pub fn verify(event: &KeyEvent, kind: SerializationKind) -> Result<bool, KeriError> {
    let prefix = &event.prefix;
    if prefix.is_empty() {
        return Ok(false);
    }

    if let Ok(key) = PublicKey::from_qb64(prefix) {
        let derivation = if key.is_transferable() {
            PrefixDerivation::Basic
        } else {
            PrefixDerivation::BasicNonTransferable
        };
        return match derive(event, kind, derivation, None) {
            Ok(derived) => Ok(&derived == prefix),
            Err(KeriError::Validation(_)) => Ok(false),
            Err(e) => Err(e),
        };
    }

    if let Ok(digest) = Digest::from_qb64(prefix) {
        let ser = placeholder_serialization(event, kind, prefix.len())?;
        return Ok(digest.verify(&ser));
    }

    if let Ok(signature) = Signature::from_qb64(prefix) {
        let key = match sole_key(event) {
            Ok(key) => key,
            Err(_) => return Ok(false),
        };
        let verifier = PublicKey::from_qb64(key)?;
        let ser = placeholder_serialization(event, kind, prefix.len())?;
        return Ok(verifier.verify(&ser, &signature).is_ok());
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ilk, ThresholdSpec};
    use cesr::generate_ed25519;

    fn icp_with_keys(keys: Vec<String>, next: &str) -> KeyEvent {
        KeyEvent {
            version: String::new(),
            prefix: String::new(),
            sn: "0".to_string(),
            ilk: Ilk::Icp,
            dig: None,
            prior: None,
            sith: Some(ThresholdSpec::count(1)),
            keys: Some(keys),
            next: Some(next.to_string()),
            toad: Some("0".to_string()),
            witnesses: Some(vec![]),
            cuts: None,
            adds: None,
            traits: Some(vec![]),
            seals: None,
            delegation: None,
        }
    }

    #[test]
    fn test_basic_derivation_is_the_key() {
        let (public, _) = generate_ed25519().unwrap();
        let event = icp_with_keys(vec![public.qb64()], "");
        let prefix =
            derive(&event, SerializationKind::Json, PrefixDerivation::Basic, None).unwrap();
        assert_eq!(prefix, public.qb64());

        let mut event = event;
        event.prefix = prefix;
        assert!(verify(&event, SerializationKind::Json).unwrap());
    }

    #[test]
    fn test_nontransferable_requires_empty_commitment() {
        let (_, private) = generate_ed25519().unwrap();
        let key = private.public_key_with(cesr::KeyCode::Ed25519NonTransferable);

        let event = icp_with_keys(vec![key.qb64()], "Ecommitment");
        assert!(derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::BasicNonTransferable,
            None
        )
        .is_err());

        let event = icp_with_keys(vec![key.qb64()], "");
        let prefix = derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::BasicNonTransferable,
            None,
        )
        .unwrap();
        assert_eq!(prefix, key.qb64());
    }

    #[test]
    fn test_self_addressing_roundtrip() {
        let (public, _) = generate_ed25519().unwrap();
        let mut event = icp_with_keys(vec![public.qb64()], "");
        let prefix = derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::SelfAddressing(DigestCode::Blake3_256),
            None,
        )
        .unwrap();
        assert!(prefix.starts_with('E'));
        assert_eq!(prefix.len(), 44);

        event.prefix = prefix;
        assert!(verify(&event, SerializationKind::Json).unwrap());
    }

    #[test]
    fn test_self_addressing_breaks_on_field_change() {
        let (public, _) = generate_ed25519().unwrap();
        let mut event = icp_with_keys(vec![public.qb64()], "");
        event.prefix = derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::SelfAddressing(DigestCode::Blake3_256),
            None,
        )
        .unwrap();
        assert!(verify(&event, SerializationKind::Json).unwrap());

        let mut tampered = event.clone();
        tampered.toad = Some("1".to_string());
        assert!(!verify(&tampered, SerializationKind::Json).unwrap());

        let mut tampered = event.clone();
        tampered.keys = Some(vec![generate_ed25519().unwrap().0.qb64()]);
        assert!(!verify(&tampered, SerializationKind::Json).unwrap());
    }

    #[test]
    fn test_self_signing_roundtrip() {
        let (public, private) = generate_ed25519().unwrap();
        let mut event = icp_with_keys(vec![public.qb64()], "");
        let prefix = derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::SelfSigning,
            Some(&private),
        )
        .unwrap();
        assert!(prefix.starts_with("0B"));
        assert_eq!(prefix.len(), 88);

        event.prefix = prefix;
        assert!(verify(&event, SerializationKind::Json).unwrap());

        let mut tampered = event.clone();
        tampered.sith = Some(ThresholdSpec::count(2));
        assert!(!verify(&tampered, SerializationKind::Json).unwrap());
    }

    #[test]
    fn test_self_signing_requires_matching_seed() {
        let (public, _) = generate_ed25519().unwrap();
        let (_, wrong_seed) = generate_ed25519().unwrap();
        let event = icp_with_keys(vec![public.qb64()], "");
        assert!(derive(
            &event,
            SerializationKind::Json,
            PrefixDerivation::SelfSigning,
            Some(&wrong_seed)
        )
        .is_err());
    }

    #[test]
    fn test_verify_rejects_foreign_prefix() {
        let (public, _) = generate_ed25519().unwrap();
        let (other, _) = generate_ed25519().unwrap();
        let mut event = icp_with_keys(vec![public.qb64()], "");
        event.prefix = other.qb64();
        assert!(!verify(&event, SerializationKind::Json).unwrap());
    }
}
