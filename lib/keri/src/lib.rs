//! KERI core: key event verification and stream processing
//!
//! An identifier's authoritative state is derived by replaying its
//! self-certifying, append-only log of signed key events. This crate
//! provides the event model and multi-format envelope, the identifier
//! derivation and next-key commitment schemes, the signing-threshold
//! evaluator, the per-identifier verification state machine, and the
//! resumable stream processor with typed, timeout-swept escrows.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod builder;
pub mod commitment;
pub mod error;
pub mod escrow;
pub mod parser;
pub mod prefix;
pub mod processor;
pub mod serder;
pub mod state;
pub mod store;
pub mod threshold;
pub mod types;

pub use builder::{InceptionBuilder, RotationBuilder, chit, interact, receipt};
pub use commitment::NextCommitment;
pub use error::KeriError;
pub use escrow::{EscrowEntry, EscrowTable, EscrowTimeouts};
pub use parser::{Attachments, AttachmentGroup, Cold, StreamParser, sniff};
pub use prefix::PrefixDerivation;
pub use processor::EventProcessor;
pub use serder::{EventMessage, SerializationKind};
pub use state::KeyState;
pub use store::{EventStore, MemoryEventStore, TransferableReceipt};
pub use threshold::SigningThreshold;
pub use types::{
    DelegationSeal, DigestSeal, EventSeal, Ilk, KeyEvent, Seal, ThresholdSpec,
};
