//! Versioned event envelope
//!
//! Events travel as a serialized field map whose first field is a version
//! string of the form `KERI10JSON0000fb_`: protocol, major and minor hex
//! digits, serialization kind, and the exact byte size of the enclosing
//! serialization in six hex digits. The size is a fixed point: the event is
//! serialized once to learn its length, the size field is rewritten in
//! place, and the result re-serialized without changing length.

use cesr::{Digest, DigestCode, PublicKey};

use crate::error::KeriError;
use crate::threshold::SigningThreshold;
use crate::types::{Ilk, KeyEvent};

pub const PROTOCOL: &str = "KERI";
pub const MAJOR: u8 = 1;
pub const MINOR: u8 = 0;

/// Length of a version string in bytes.
pub const VERSION_STRING_SIZE: usize = 17;
/// Latest offset at which a version string may start within a
/// serialization.
pub const MAX_VERSION_OFFSET: usize = 12;

/// Wire serialization kind, named in the version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializationKind {
    Json,
    Cbor,
    Mgpk,
}

impl SerializationKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Cbor => "CBOR",
            Self::Mgpk => "MGPK",
        }
    }

    pub fn from_label(label: &str) -> Result<Self, KeriError> {
        match label {
            "JSON" => Ok(Self::Json),
            "CBOR" => Ok(Self::Cbor),
            "MGPK" => Ok(Self::Mgpk),
            _ => Err(KeriError::BadVersion(format!(
                "Unknown serialization kind: {label}"
            ))),
        }
    }

    fn serialize(&self, event: &KeyEvent) -> Result<Vec<u8>, KeriError> {
        match self {
            Self::Json => Ok(serde_json::to_vec(event)?),
            Self::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(event, &mut buf)
                    .map_err(|e| KeriError::Encoding(e.to_string()))?;
                Ok(buf)
            }
            Self::Mgpk => {
                rmp_serde::to_vec_named(event).map_err(|e| KeriError::Encoding(e.to_string()))
            }
        }
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<KeyEvent, KeriError> {
        match self {
            Self::Json => {
                serde_json::from_slice(bytes).map_err(|e| KeriError::Deserialization(e.to_string()))
            }
            Self::Cbor => ciborium::de::from_reader(bytes)
                .map_err(|e| KeriError::Deserialization(e.to_string())),
            Self::Mgpk => {
                rmp_serde::from_slice(bytes).map_err(|e| KeriError::Deserialization(e.to_string()))
            }
        }
    }
}

/// Renders a version string with the given kind and size.
pub fn version_string(kind: SerializationKind, size: usize) -> String {
    format!(
        "{PROTOCOL}{MAJOR:x}{MINOR:x}{}{size:06x}_",
        kind.label()
    )
}

/// Parses a version string, returning the kind and declared size.
pub fn parse_version_string(text: &str) -> Result<(SerializationKind, usize), KeriError> {
    if text.len() < VERSION_STRING_SIZE || !text.is_ascii() {
        return Err(KeriError::BadVersion(text.to_string()));
    }
    let text = &text[..VERSION_STRING_SIZE];
    if !text.starts_with(PROTOCOL) || !text.ends_with('_') {
        return Err(KeriError::BadVersion(text.to_string()));
    }
    let major = u8::from_str_radix(&text[4..5], 16)
        .map_err(|_| KeriError::BadVersion(text.to_string()))?;
    let minor = u8::from_str_radix(&text[5..6], 16)
        .map_err(|_| KeriError::BadVersion(text.to_string()))?;
    if major != MAJOR {
        return Err(KeriError::BadVersion(format!(
            "Unsupported protocol version {major}.{minor}"
        )));
    }
    let kind = SerializationKind::from_label(&text[6..10])?;
    let size = usize::from_str_radix(&text[10..16], 16)
        .map_err(|_| KeriError::BadVersion(text.to_string()))?;
    Ok((kind, size))
}

/// A key event bound to its exact wire serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    raw: Vec<u8>,
    event: KeyEvent,
    kind: SerializationKind,
}

impl EventMessage {
    /// Serializes an event, resolving the version-string size fixed point.
    pub fn new(mut event: KeyEvent, kind: SerializationKind) -> Result<Self, KeriError> {
        event.version = version_string(kind, 0);
        let provisional = kind.serialize(&event)?;
        event.version = version_string(kind, provisional.len());
        let raw = kind.serialize(&event)?;
        if raw.len() != provisional.len() {
            return Err(KeriError::Encoding(format!(
                "Serialization size not a fixed point: {} then {}",
                provisional.len(),
                raw.len()
            )));
        }
        Ok(Self { raw, event, kind })
    }

    /// Extracts one event from the front of a byte stream.
    ///
    /// Locates the version string near the buffer start, reads the declared
    /// kind and size, and deserializes exactly that many bytes. Returns the
    /// consumed byte count alongside; signals `Shortage` when the buffer
    /// holds less than the declared size.
    pub fn from_stream(stream: &[u8]) -> Result<(Self, usize), KeriError> {
        let window = stream
            .len()
            .min(MAX_VERSION_OFFSET + VERSION_STRING_SIZE);
        let offset = stream[..window]
            .windows(PROTOCOL.len())
            .position(|w| w == PROTOCOL.as_bytes());
        let offset = match offset {
            Some(off) if off <= MAX_VERSION_OFFSET => off,
            Some(_) | None => {
                if stream.len() < MAX_VERSION_OFFSET + VERSION_STRING_SIZE {
                    return Err(KeriError::Shortage {
                        needed: MAX_VERSION_OFFSET + VERSION_STRING_SIZE - stream.len(),
                    });
                }
                return Err(KeriError::BadVersion(
                    "No version string near stream start".to_string(),
                ));
            }
        };
        if stream.len() < offset + VERSION_STRING_SIZE {
            return Err(KeriError::Shortage {
                needed: offset + VERSION_STRING_SIZE - stream.len(),
            });
        }
        let text = std::str::from_utf8(&stream[offset..offset + VERSION_STRING_SIZE])
            .map_err(|_| KeriError::BadVersion("Non-ASCII version string".to_string()))?;
        let (kind, size) = parse_version_string(text)?;
        if size < offset + VERSION_STRING_SIZE {
            return Err(KeriError::BadVersion(format!(
                "Declared size {size} too small"
            )));
        }
        if stream.len() < size {
            return Err(KeriError::Shortage {
                needed: size - stream.len(),
            });
        }
        let raw = &stream[..size];
        let event = kind.deserialize(raw)?;
        Ok((
            Self {
                raw: raw.to_vec(),
                event,
                kind,
            },
            size,
        ))
    }

    /// Parses a complete serialization, rejecting trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeriError> {
        let (message, consumed) = Self::from_stream(bytes)?;
        if consumed != bytes.len() {
            return Err(KeriError::Deserialization(format!(
                "{} trailing bytes after event",
                bytes.len() - consumed
            )));
        }
        Ok(message)
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn kind(&self) -> SerializationKind {
        self.kind
    }

    pub fn event(&self) -> &KeyEvent {
        &self.event
    }

    pub fn ilk(&self) -> Ilk {
        self.event.ilk
    }

    pub fn prefix(&self) -> &str {
        &self.event.prefix
    }

    pub fn sn(&self) -> Result<u64, KeriError> {
        self.event.sn_u64()
    }

    /// Digest of this exact serialization under the default algorithm.
    pub fn said(&self) -> Digest {
        Digest::blake3_256(&self.raw)
    }

    /// Digest under an explicit algorithm.
    pub fn said_with(&self, code: DigestCode) -> Digest {
        Digest::new_with_code(code, &self.raw)
    }

    /// True when `dig` is a digest of this serialization under the digest's
    /// own algorithm.
    pub fn compare(&self, dig: &str) -> Result<bool, KeriError> {
        Ok(self.said().compare(&self.raw, dig)?)
    }

    /// Declared signing keys as verifier objects.
    pub fn verifiers(&self) -> Result<Vec<PublicKey>, KeriError> {
        self.event
            .keys
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|k| PublicKey::from_qb64(k).map_err(KeriError::from))
            .collect()
    }

    /// Declared signing threshold.
    pub fn threshold(&self) -> Result<SigningThreshold, KeriError> {
        let spec = self.event.sith.as_ref().ok_or_else(|| {
            KeriError::Validation(format!("{} event has no threshold", self.event.ilk))
        })?;
        SigningThreshold::from_spec(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThresholdSpec;
    use cesr::Matter as _;

    const KINDS: &[SerializationKind] = &[
        SerializationKind::Json,
        SerializationKind::Cbor,
        SerializationKind::Mgpk,
    ];

    fn sample_event() -> KeyEvent {
        KeyEvent {
            version: String::new(),
            prefix: "DAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            sn: "0".to_string(),
            ilk: Ilk::Icp,
            dig: None,
            prior: None,
            sith: Some(ThresholdSpec::count(1)),
            keys: Some(vec![
                "DAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            ]),
            next: Some(String::new()),
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
    fn test_version_string_shape() {
        let text = version_string(SerializationKind::Json, 0xfb);
        assert_eq!(text, "KERI10JSON0000fb_");
        assert_eq!(text.len(), VERSION_STRING_SIZE);

        let (kind, size) = parse_version_string(&text).unwrap();
        assert_eq!(kind, SerializationKind::Json);
        assert_eq!(size, 0xfb);
    }

    #[test]
    fn test_bad_version_strings() {
        assert!(parse_version_string("XERI10JSON0000fb_").is_err());
        assert!(parse_version_string("KERI20JSON0000fb_").is_err());
        assert!(parse_version_string("KERI10YAML0000fb_").is_err());
        assert!(parse_version_string("KERI10JSON0000fbX").is_err());
        assert!(parse_version_string("KERI10JSONzzzzzz_").is_err());
        assert!(parse_version_string("short").is_err());
    }

    #[test]
    fn test_size_fixed_point_all_kinds() {
        for &kind in KINDS {
            let message = EventMessage::new(sample_event(), kind).unwrap();
            let declared = parse_version_string(&message.event().version).unwrap();
            assert_eq!(declared.0, kind);
            assert_eq!(declared.1, message.size(), "{kind:?}");
        }
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        for &kind in KINDS {
            let message = EventMessage::new(sample_event(), kind).unwrap();
            let (parsed, consumed) = EventMessage::from_stream(message.raw()).unwrap();
            assert_eq!(consumed, message.size());
            assert_eq!(parsed.event(), message.event());
            assert_eq!(parsed.kind(), kind);
        }
    }

    #[test]
    fn test_from_stream_with_trailing_material() {
        let message = EventMessage::new(sample_event(), SerializationKind::Json).unwrap();
        let mut stream = message.raw().to_vec();
        stream.extend_from_slice(b"-AABtrailing");
        let (parsed, consumed) = EventMessage::from_stream(&stream).unwrap();
        assert_eq!(consumed, message.size());
        assert_eq!(parsed.raw(), message.raw());
    }

    #[test]
    fn test_truncation_signals_shortage() {
        for &kind in KINDS {
            let message = EventMessage::new(sample_event(), kind).unwrap();
            let raw = message.raw();
            for len in [0, 4, 10, raw.len() / 2, raw.len() - 1] {
                let err = EventMessage::from_stream(&raw[..len]).unwrap_err();
                assert!(err.is_shortage(), "{kind:?} len {len}: {err}");
            }
        }
    }

    #[test]
    fn test_garbage_is_bad_version() {
        let garbage = vec![b'x'; 64];
        let err = EventMessage::from_stream(&garbage).unwrap_err();
        assert!(matches!(err, KeriError::BadVersion(_)));
    }

    #[test]
    fn test_said_and_compare() {
        let message = EventMessage::new(sample_event(), SerializationKind::Json).unwrap();
        let said = message.said();
        assert!(message.compare(&said.qb64()).unwrap());

        // digest agility: a sha3 digest of the same bytes is equivalent
        let other = message.said_with(DigestCode::Sha3_256);
        assert!(message.compare(&other.qb64()).unwrap());

        let unrelated = Digest::blake3_256(b"unrelated");
        assert!(!message.compare(&unrelated.qb64()).unwrap());
    }

    #[test]
    fn test_verifiers_and_threshold() {
        let message = EventMessage::new(sample_event(), SerializationKind::Json).unwrap();
        let verifiers = message.verifiers().unwrap();
        assert_eq!(verifiers.len(), 1);
        let threshold = message.threshold().unwrap();
        assert_eq!(threshold.size(), 1);
    }

    #[test]
    fn test_rejects_trailing_in_exact_parse() {
        let message = EventMessage::new(sample_event(), SerializationKind::Json).unwrap();
        let mut bytes = message.raw().to_vec();
        bytes.push(b' ');
        assert!(EventMessage::from_bytes(&bytes).is_err());
    }
}
