//! CESR - composable event streaming representation
//!
//! A self-describing, dual text/binary encoding for cryptographic material.
//! Every primitive carries its type code in-band, the code fixes the exact
//! size, and the text (qb64) and binary (qb2) forms are bijective, so
//! primitives can be framed, concatenated, and incrementally parsed without
//! any out-of-band schema.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod bext;
pub mod counter;
pub mod digest;
pub mod error;
pub mod indexer;
pub mod keys;
pub mod matter;
pub mod signature;

pub use counter::{Counter, CounterCode};
pub use digest::{Digest, DigestCode};
pub use error::CesrError;
pub use indexer::{IndexCode, IndexedSignature};
pub use keys::{KeyCode, PrivateKey, PublicKey, generate_ed25519};
pub use matter::{Matter, Sizage};
pub use signature::{SigCode, Signature};
