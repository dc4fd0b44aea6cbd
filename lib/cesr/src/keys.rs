//! Ed25519 key material and signing operations

use ed25519_dalek::{Signer as _, Verifier as _};
use rand::rngs::OsRng;

use crate::error::CesrError;
use crate::indexer::IndexedSignature;
use crate::matter::{self, Matter};
use crate::signature::{SigCode, Signature};

/// Public key derivation code.
///
/// Non-transferable keys double as final identifiers: a prefix derived with
/// the non-transferable code commits to never rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Ed25519,
    Ed25519NonTransferable,
}

impl KeyCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ed25519 => "D",
            Self::Ed25519NonTransferable => "B",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, CesrError> {
        match code {
            "D" => Ok(Self::Ed25519),
            "B" => Ok(Self::Ed25519NonTransferable),
            _ => Err(CesrError::UnexpectedCode(code.to_string())),
        }
    }

    pub fn is_transferable(&self) -> bool {
        matches!(self, Self::Ed25519)
    }
}

/// A qualified Ed25519 verification key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    code: KeyCode,
    raw: Vec<u8>,
}

impl PublicKey {
    pub fn from_raw(code: KeyCode, raw: Vec<u8>) -> Result<Self, CesrError> {
        if raw.len() != 32 {
            return Err(CesrError::RawSize {
                code: code.code().to_string(),
                size: raw.len(),
            });
        }
        Ok(Self { code, raw })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, CesrError> {
        let (code, raw) = matter::decode_exact(qb64)?;
        Ok(Self {
            code: KeyCode::from_code(&code)?,
            raw,
        })
    }

    /// Decodes one key from the front of a text stream.
    pub fn from_stream_text(stream: &str) -> Result<(Self, usize), CesrError> {
        let (code, raw, consumed) = matter::decode_text(stream)?;
        Ok((
            Self {
                code: KeyCode::from_code(&code)?,
                raw,
            },
            consumed,
        ))
    }

    /// Decodes one key from the front of a binary stream.
    pub fn from_stream_b2(stream: &[u8]) -> Result<(Self, usize), CesrError> {
        let (code, raw, consumed) = matter::decode_b2(stream)?;
        Ok((
            Self {
                code: KeyCode::from_code(&code)?,
                raw,
            },
            consumed,
        ))
    }

    pub fn algorithm(&self) -> KeyCode {
        self.code
    }

    pub fn is_transferable(&self) -> bool {
        self.code.is_transferable()
    }

    fn verifying_key(&self) -> Result<ed25519_dalek::VerifyingKey, CesrError> {
        let bytes: [u8; 32] = self
            .raw
            .as_slice()
            .try_into()
            .map_err(|_| CesrError::Crypto("bad key length".to_string()))?;
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(|e| CesrError::Crypto(e.to_string()))
    }

    /// Verifies an unindexed signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &Signature) -> Result<(), CesrError> {
        self.verify_raw(data, signature.raw())
    }

    /// Verifies an indexed signature over `data`.
    pub fn verify_indexed(
        &self,
        data: &[u8],
        signature: &IndexedSignature,
    ) -> Result<(), CesrError> {
        self.verify_raw(data, signature.raw())
    }

    fn verify_raw(&self, data: &[u8], raw: &[u8]) -> Result<(), CesrError> {
        let sig_bytes: [u8; 64] = raw
            .try_into()
            .map_err(|_| CesrError::Crypto("bad signature length".to_string()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        self.verifying_key()?
            .verify(data, &signature)
            .map_err(|_| CesrError::VerificationFailed)
    }
}

impl Matter for PublicKey {
    fn code(&self) -> &str {
        self.code.code()
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// An Ed25519 private seed. Derives its verification key at construction.
#[derive(Clone)]
pub struct PrivateKey {
    raw: Vec<u8>,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose seed material in logs
        f.debug_struct("PrivateKey").finish_non_exhaustive()
    }
}

impl PrivateKey {
    /// Seed material code.
    pub const CODE: &'static str = "A";

    pub fn from_raw(raw: Vec<u8>) -> Result<Self, CesrError> {
        if raw.len() != 32 {
            return Err(CesrError::RawSize {
                code: Self::CODE.to_string(),
                size: raw.len(),
            });
        }
        Ok(Self { raw })
    }

    pub fn from_qb64(qb64: &str) -> Result<Self, CesrError> {
        let (code, raw) = matter::decode_exact(qb64)?;
        if code != Self::CODE {
            return Err(CesrError::UnexpectedCode(code));
        }
        Self::from_raw(raw)
    }

    fn signing_key(&self) -> ed25519_dalek::SigningKey {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.raw);
        ed25519_dalek::SigningKey::from_bytes(&bytes)
    }

    /// The paired transferable verification key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key_with(KeyCode::Ed25519)
    }

    /// The paired verification key under an explicit code.
    pub fn public_key_with(&self, code: KeyCode) -> PublicKey {
        PublicKey {
            code,
            raw: self.signing_key().verifying_key().to_bytes().to_vec(),
        }
    }

    /// Signs `data`, producing an unindexed signature.
    pub fn sign(&self, data: &[u8]) -> Result<Signature, CesrError> {
        let signature = self.signing_key().sign(data);
        Signature::from_raw(SigCode::Ed25519, signature.to_bytes().to_vec())
    }

    /// Signs `data`, producing a signature carrying the signer's position in
    /// the current key list.
    pub fn sign_indexed(&self, data: &[u8], index: u32) -> Result<IndexedSignature, CesrError> {
        let signature = self.signing_key().sign(data);
        IndexedSignature::new_dual(index, signature.to_bytes().to_vec())
    }
}

impl Matter for PrivateKey {
    fn code(&self) -> &str {
        Self::CODE
    }

    fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Generates a fresh Ed25519 keypair.
pub fn generate_ed25519() -> Result<(PublicKey, PrivateKey), CesrError> {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let private = PrivateKey::from_raw(signing_key.to_bytes().to_vec())?;
    let public = private.public_key();
    Ok((public, private))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_roundtrip() {
        let (public, private) = generate_ed25519().unwrap();
        assert_eq!(public.qb64().len(), 44);
        assert!(public.qb64().starts_with('D'));
        assert_eq!(private.qb64().len(), 44);
        assert!(private.qb64().starts_with('A'));

        let parsed = PublicKey::from_qb64(&public.qb64()).unwrap();
        assert_eq!(parsed, public);
        let restored = PrivateKey::from_qb64(&private.qb64()).unwrap();
        assert_eq!(restored.public_key(), public);
    }

    #[test]
    fn test_sign_verify() {
        let (public, private) = generate_ed25519().unwrap();
        let sig = private.sign(b"message").unwrap();
        assert!(public.verify(b"message", &sig).is_ok());
        assert!(public.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_sign_indexed() {
        let (public, private) = generate_ed25519().unwrap();
        let sig = private.sign_indexed(b"message", 3).unwrap();
        assert_eq!(sig.index(), 3);
        assert!(public.verify_indexed(b"message", &sig).is_ok());
    }

    #[test]
    fn test_nontransferable_code() {
        let (_, private) = generate_ed25519().unwrap();
        let public = private.public_key_with(KeyCode::Ed25519NonTransferable);
        assert!(!public.is_transferable());
        assert!(public.qb64().starts_with('B'));

        let sig = private.sign(b"data").unwrap();
        assert!(public.verify(b"data", &sig).is_ok());
    }

    #[test]
    fn test_debug_hides_seed() {
        let (_, private) = generate_ed25519().unwrap();
        let rendered = format!("{private:?}");
        assert!(!rendered.contains(&private.qb64()));
    }
}
