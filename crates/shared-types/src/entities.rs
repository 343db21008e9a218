//! # Core Domain Entities
//!
//! The channel and commitment model shared by every engine subsystem.
//!
//! All byte-level identities (channel ids, signer addresses) are Keccak-256
//! based so they agree with the on-chain adjudicator.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha3::{Digest, Keccak256};

use crate::errors::{TypeError, TypeResult};

// Re-export U256 from primitive-types for use across all subsystems
pub use primitive_types::U256;

/// A 32-byte Keccak-256 hash.
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style address.
pub type Address = [u8; 20];

/// A channel identifier: the Keccak-256 hash of the channel's canonical
/// encoding.
pub type ChannelId = Hash;

/// A 65-byte recoverable ECDSA signature (r || s || v).
pub type Signature = [u8; 65];

/// The fixed identity of a state channel.
///
/// Immutable once any commitment to it has been signed: changing the nonce
/// produces a different channel id and therefore a different channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Address of the application rules contract this channel runs.
    pub channel_type: Address,
    /// Uniquifying nonce chosen at channel creation.
    pub nonce: U256,
    /// Participant addresses in move order.
    pub participants: Vec<Address>,
}

impl Channel {
    pub fn new(channel_type: Address, nonce: U256, participants: Vec<Address>) -> TypeResult<Self> {
        if participants.len() < 2 {
            return Err(TypeError::TooFewParticipants(participants.len()));
        }
        Ok(Self {
            channel_type,
            nonce,
            participants,
        })
    }

    /// Derive the channel id from the fixed identity fields:
    /// `channel_type || nonce (32-byte big-endian) || participants`.
    pub fn id(&self) -> ChannelId {
        let mut preimage = Vec::with_capacity(52 + 20 * self.participants.len());
        preimage.extend_from_slice(&self.channel_type);
        let mut nonce_bytes = [0u8; 32];
        self.nonce.to_big_endian(&mut nonce_bytes);
        preimage.extend_from_slice(&nonce_bytes);
        for participant in &self.participants {
            preimage.extend_from_slice(participant);
        }
        keccak256(&preimage)
    }

    /// Number of participants in the channel.
    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }
}

/// The phase a commitment belongs to.
///
/// The derived ordering is load-bearing: phases may only ever advance
/// (`PreFundSetup < PostFundSetup < App < Conclude`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommitmentType {
    PreFundSetup,
    PostFundSetup,
    App,
    Conclude,
}

/// One turn-numbered snapshot of a channel's agreed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub channel: Channel,
    /// Strictly increases by exactly 1 between accepted commitments.
    pub turn_num: u64,
    /// Position within a setup/conclude round; resets to 0 on a phase change.
    pub commitment_count: u32,
    /// Amounts owed, index-aligned with `destination`.
    pub allocation: Vec<U256>,
    /// Where each allocated amount is owed.
    pub destination: Vec<Address>,
    pub commitment_type: CommitmentType,
    /// Opaque application attributes; interpreted only by the app rule set.
    pub app_attributes: Vec<u8>,
}

impl Commitment {
    /// Check the structural invariant every commitment must satisfy.
    pub fn check_shape(&self) -> TypeResult<()> {
        if self.allocation.len() != self.destination.len() {
            return Err(TypeError::AllocationDestinationMismatch {
                allocations: self.allocation.len(),
                destinations: self.destination.len(),
            });
        }
        Ok(())
    }

    /// The id of the channel this commitment belongs to.
    pub fn channel_id(&self) -> ChannelId {
        self.channel.id()
    }

    /// The canonical byte encoding participants sign.
    pub fn encode(&self) -> TypeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TypeError::Encoding(e.to_string()))
    }

    /// Index of the participant whose turn it is to have signed this
    /// commitment.
    pub fn mover_index(&self) -> usize {
        (self.turn_num % self.channel.participants.len() as u64) as usize
    }

    /// Address of the participant who must have signed this commitment.
    pub fn mover(&self) -> Address {
        self.channel.participants[self.mover_index()]
    }

    /// The successor of a setup commitment within the setup rounds.
    ///
    /// Returns `None` if this commitment is not part of the setup phase
    /// (`App` and `Conclude` successors are application/protocol decisions).
    pub fn next_setup(&self) -> Option<Commitment> {
        let num_participants = self.channel.num_participants() as u32;
        let (commitment_type, commitment_count) = match self.commitment_type {
            CommitmentType::PreFundSetup => {
                if self.commitment_count == num_participants - 1 {
                    (CommitmentType::PostFundSetup, 0)
                } else {
                    (CommitmentType::PreFundSetup, self.commitment_count + 1)
                }
            }
            CommitmentType::PostFundSetup => {
                if self.commitment_count == num_participants - 1 {
                    return None;
                }
                (CommitmentType::PostFundSetup, self.commitment_count + 1)
            }
            CommitmentType::App | CommitmentType::Conclude => return None,
        };
        Some(Commitment {
            turn_num: self.turn_num + 1,
            commitment_count,
            commitment_type,
            ..self.clone()
        })
    }
}

/// A commitment together with its mover's signature over the canonical
/// encoding.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCommitment {
    pub commitment: Commitment,
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// Keccak-256 of the input bytes.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_channel(nonce: u64) -> Channel {
        Channel::new([0xaa; 20], U256::from(nonce), vec![[1u8; 20], [2u8; 20]]).unwrap()
    }

    #[test]
    fn test_channel_id_depends_on_nonce() {
        let a = create_channel(0);
        let b = create_channel(1);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_channel_id_is_stable() {
        let a = create_channel(7);
        assert_eq!(a.id(), a.id());
    }

    #[test]
    fn test_channel_id_depends_on_every_identity_field() {
        let base = create_channel(7);
        let other_type =
            Channel::new([0xbb; 20], U256::from(7), base.participants.clone()).unwrap();
        let other_participants =
            Channel::new([0xaa; 20], U256::from(7), vec![[1u8; 20], [3u8; 20]]).unwrap();
        assert_ne!(base.id(), other_type.id());
        assert_ne!(base.id(), other_participants.id());
    }

    #[test]
    fn test_channel_requires_two_participants() {
        let result = Channel::new([0xaa; 20], U256::zero(), vec![[1u8; 20]]);
        assert!(matches!(result, Err(TypeError::TooFewParticipants(1))));
    }

    #[test]
    fn test_commitment_type_ordering() {
        assert!(CommitmentType::PreFundSetup < CommitmentType::PostFundSetup);
        assert!(CommitmentType::PostFundSetup < CommitmentType::App);
        assert!(CommitmentType::App < CommitmentType::Conclude);
    }

    #[test]
    fn test_mover_rotates_with_turn_num() {
        let channel = create_channel(0);
        let commitment = Commitment {
            channel: channel.clone(),
            turn_num: 3,
            commitment_count: 0,
            allocation: vec![U256::from(5), U256::from(5)],
            destination: vec![[1u8; 20], [2u8; 20]],
            commitment_type: CommitmentType::App,
            app_attributes: vec![],
        };
        assert_eq!(commitment.mover(), channel.participants[1]);
    }

    #[test]
    fn test_shape_check_rejects_length_mismatch() {
        let commitment = Commitment {
            channel: create_channel(0),
            turn_num: 0,
            commitment_count: 0,
            allocation: vec![U256::from(5)],
            destination: vec![[1u8; 20], [2u8; 20]],
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: vec![],
        };
        assert!(commitment.check_shape().is_err());
    }

    #[test]
    fn test_next_setup_walks_prefund_into_postfund() {
        let channel = create_channel(0);
        let first = Commitment {
            channel,
            turn_num: 0,
            commitment_count: 0,
            allocation: vec![U256::from(6), U256::from(4)],
            destination: vec![[1u8; 20], [2u8; 20]],
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: vec![],
        };
        let second = first.next_setup().unwrap();
        assert_eq!(second.commitment_type, CommitmentType::PreFundSetup);
        assert_eq!(second.commitment_count, 1);
        assert_eq!(second.turn_num, 1);

        let third = second.next_setup().unwrap();
        assert_eq!(third.commitment_type, CommitmentType::PostFundSetup);
        assert_eq!(third.commitment_count, 0);
        assert_eq!(third.turn_num, 2);
    }

    #[test]
    fn test_next_setup_ends_after_last_postfund() {
        let channel = create_channel(0);
        let last_postfund = Commitment {
            channel,
            turn_num: 3,
            commitment_count: 1,
            allocation: vec![U256::from(6), U256::from(4)],
            destination: vec![[1u8; 20], [2u8; 20]],
            commitment_type: CommitmentType::PostFundSetup,
            app_attributes: vec![],
        };
        assert!(last_postfund.next_setup().is_none());
    }
}
