//! # shared-types
//!
//! Core domain entities for the ForceMove engine.
//!
//! ## Clusters
//!
//! - **Channel**: `Channel`, `ChannelId` — the fixed identity of a state
//!   channel (participants, nonce, application contract).
//! - **Commitment**: `Commitment`, `SignedCommitment`, `CommitmentType` —
//!   one signed, turn-numbered snapshot of the channel's agreed outcome.
//!
//! A commitment is owned by the participant whose turn it is; once signed
//! and sent it becomes shared, immutable evidence. Everything that decides
//! whether one commitment may follow another lives in `fm-validator`; this
//! crate only defines the shapes and the canonical encoding they are
//! hashed and signed over.

pub mod entities;
pub mod errors;

pub use entities::{
    Address, Channel, ChannelId, Commitment, CommitmentType, Hash, SignedCommitment, Signature,
    U256,
};
pub use errors::{TypeError, TypeResult};
