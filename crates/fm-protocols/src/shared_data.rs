//! Shared engine state: the channel store, chain mirror, and outbox.
//!
//! Every protocol instance reduces against the same `SharedData`. The
//! store owns the append-only commitment history per channel; protocols
//! never hold commitments themselves, they ask the store to sign, check
//! and append.

use std::collections::HashMap;

use primitive_types::U256;
use shared_crypto::{recover_signer, PrivateKey, RecoverableSignature};
use shared_types::{Address, Channel, ChannelId, Commitment, SignedCommitment, TypeError};
use thiserror::Error;
use tracing::debug;

use fm_validator::{valid_transition, ApplicationRules, ConsensusAppRules, ValidationError};

use crate::locator::ProtocolLocator;
use crate::outbox::{MessagePayload, Outbox, OutboundMessage, TransactionRequest};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown channel {}", hex::encode(.0))]
    ChannelNotFound(ChannelId),
    #[error("channel {} already registered", hex::encode(.0))]
    ChannelExists(ChannelId),
    #[error("not our turn to sign (mover index {mover}, our index {ours})")]
    NotOurTurn { mover: usize, ours: usize },
    #[error("commitment not signed by its mover")]
    WrongSigner,
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("stale commitment: turn {received} <= stored turn {stored}")]
    StaleTurnNum { received: u64, stored: u64 },
    #[error("first commitment must be a pre-fund-setup at turn 0")]
    BadFirstCommitment,
    #[error("guarantor must be sufficiently funded: holds {held}, claim needs {required}")]
    GuarantorUnderfunded { held: U256, required: U256 },
    #[error(transparent)]
    InvalidTransition(#[from] ValidationError),
    #[error(transparent)]
    Malformed(#[from] TypeError),
    #[error("signing failed: {0}")]
    Signing(#[from] shared_crypto::CryptoError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Which rule set governs App-phase transitions in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Ledger channels run the unanimous-consensus rules.
    Ledger,
    /// Application channels run rules the engine does not interpret;
    /// the application layer vouches for App-phase transitions.
    Application,
}

/// Application rules for channels whose app logic lives outside the
/// engine. Generic transition rules still apply in full.
struct OpaqueAppRules;

impl ApplicationRules for OpaqueAppRules {
    fn validate(&self, _from: &Commitment, _to: &Commitment) -> Result<(), ValidationError> {
        Ok(())
    }
}

fn rules_for(kind: ChannelKind) -> &'static dyn ApplicationRules {
    static CONSENSUS: ConsensusAppRules = ConsensusAppRules;
    static OPAQUE: OpaqueAppRules = OpaqueAppRules;
    match kind {
        ChannelKind::Ledger => &CONSENSUS,
        ChannelKind::Application => &OPAQUE,
    }
}

/// How a channel is funded, once a funding protocol has settled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingSource {
    /// Funded by on-chain deposits against the channel id.
    Direct,
    /// Funded by an allocation inside a ledger channel.
    Ledger(ChannelId),
}

/// The mirror of an on-chain challenge against a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    pub challenge_commitment: Commitment,
    pub expires_at: u64,
}

/// Everything the engine knows about one channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel: Channel,
    pub kind: ChannelKind,
    /// Our position in `channel.participants`.
    pub our_index: usize,
    /// Append-only history, ascending turn numbers.
    pub commitments: Vec<SignedCommitment>,
    /// On-chain adjudicator holdings for this channel id.
    pub holdings: U256,
}

impl ChannelState {
    pub fn last_commitment(&self) -> Option<&SignedCommitment> {
        self.commitments.last()
    }

    pub fn penultimate_commitment(&self) -> Option<&SignedCommitment> {
        self.commitments.len().checked_sub(2).map(|i| &self.commitments[i])
    }

    pub fn turn_num(&self) -> Option<u64> {
        self.last_commitment().map(|sc| sc.commitment.turn_num)
    }

    /// Whether we are the mover of the next commitment.
    pub fn our_turn(&self) -> bool {
        match self.last_commitment() {
            Some(sc) => {
                let next = sc.commitment.turn_num + 1;
                (next % self.channel.num_participants() as u64) as usize == self.our_index
            }
            None => self.our_index == 0,
        }
    }

    /// Sum of the latest allocation, i.e. what full funding requires.
    pub fn total_allocated(&self) -> U256 {
        self.last_commitment()
            .map(|sc| {
                sc.commitment
                    .allocation
                    .iter()
                    .fold(U256::zero(), |acc, a| acc.saturating_add(*a))
            })
            .unwrap_or_default()
    }

    pub fn is_fully_funded(&self) -> bool {
        self.holdings >= self.total_allocated()
    }

    pub fn our_address(&self) -> Address {
        self.channel.participants[self.our_index]
    }

    /// The participant after us in move order, the peer we relay
    /// commitments to.
    pub fn next_participant(&self) -> Address {
        let n = self.channel.num_participants();
        self.channel.participants[(self.our_index + 1) % n]
    }
}

pub struct SharedData {
    address: Address,
    private_key: PrivateKey,
    channels: HashMap<ChannelId, ChannelState>,
    /// Process ids to notify when a chain event lands on a channel.
    subscriptions: HashMap<ChannelId, Vec<String>>,
    challenges: HashMap<ChannelId, ChallengeRecord>,
    funding: HashMap<ChannelId, FundingSource>,
    pub outbox: Outbox,
}

impl SharedData {
    pub fn new(private_key: PrivateKey) -> Self {
        let address = private_key.address();
        Self {
            address,
            private_key,
            channels: HashMap::new(),
            subscriptions: HashMap::new(),
            challenges: HashMap::new(),
            funding: HashMap::new(),
            outbox: Outbox::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn channel(&self, channel_id: &ChannelId) -> StoreResult<&ChannelState> {
        self.channels
            .get(channel_id)
            .ok_or(StoreError::ChannelNotFound(*channel_id))
    }

    fn channel_mut(&mut self, channel_id: &ChannelId) -> StoreResult<&mut ChannelState> {
        self.channels
            .get_mut(channel_id)
            .ok_or(StoreError::ChannelNotFound(*channel_id))
    }

    pub fn has_channel(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// Sign `commitment` as our own and append it to the channel history.
    ///
    /// We must be the commitment's mover and the transition from the
    /// stored latest commitment must be valid. The first commitment of a
    /// channel is registered with [`SharedData::sign_and_initialize`].
    pub fn sign_and_store(&mut self, commitment: Commitment) -> StoreResult<SignedCommitment> {
        let channel_id = commitment.channel_id();
        let state = self.channel(&channel_id)?;
        if commitment.mover_index() != state.our_index {
            return Err(StoreError::NotOurTurn {
                mover: commitment.mover_index(),
                ours: state.our_index,
            });
        }
        if let Some(last) = state.last_commitment() {
            valid_transition(&last.commitment, &commitment, rules_for(state.kind))?;
        }
        let signed = self.sign(commitment)?;
        self.channel_mut(&channel_id)?.commitments.push(signed.clone());
        Ok(signed)
    }

    /// Verify an opponent commitment and append it to the channel history.
    pub fn check_and_store(&mut self, signed: SignedCommitment) -> StoreResult<()> {
        let channel_id = signed.commitment.channel_id();
        let state = self.channel(&channel_id)?;
        verify_signature(&signed)?;
        if let Some(last) = state.last_commitment() {
            if signed.commitment.turn_num <= last.commitment.turn_num {
                return Err(StoreError::StaleTurnNum {
                    received: signed.commitment.turn_num,
                    stored: last.commitment.turn_num,
                });
            }
            valid_transition(&last.commitment, &signed.commitment, rules_for(state.kind))?;
        }
        debug!(
            channel_id = %hex::encode(channel_id),
            turn_num = signed.commitment.turn_num,
            "stored opponent commitment"
        );
        self.channel_mut(&channel_id)?.commitments.push(signed);
        Ok(())
    }

    /// Register a new channel by signing its first pre-fund commitment.
    pub fn sign_and_initialize(
        &mut self,
        commitment: Commitment,
        kind: ChannelKind,
    ) -> StoreResult<SignedCommitment> {
        let channel_id = self.register_channel(&commitment, kind)?;
        let signed = self.sign(commitment)?;
        self.channel_mut(&channel_id)?.commitments.push(signed.clone());
        Ok(signed)
    }

    /// Register a new channel from an opponent's first pre-fund commitment.
    pub fn check_and_initialize(
        &mut self,
        signed: SignedCommitment,
        kind: ChannelKind,
    ) -> StoreResult<()> {
        verify_signature(&signed)?;
        let channel_id = self.register_channel(&signed.commitment, kind)?;
        self.channel_mut(&channel_id)?.commitments.push(signed);
        Ok(())
    }

    fn register_channel(
        &mut self,
        first: &Commitment,
        kind: ChannelKind,
    ) -> StoreResult<ChannelId> {
        first.check_shape()?;
        if first.turn_num != 0
            || first.commitment_type != shared_types::CommitmentType::PreFundSetup
        {
            return Err(StoreError::BadFirstCommitment);
        }
        let channel_id = first.channel_id();
        if self.channels.contains_key(&channel_id) {
            return Err(StoreError::ChannelExists(channel_id));
        }
        let our_index = first
            .channel
            .participants
            .iter()
            .position(|p| *p == self.address)
            .ok_or(StoreError::WrongSigner)?;
        self.channels.insert(
            channel_id,
            ChannelState {
                channel: first.channel.clone(),
                kind,
                our_index,
                commitments: Vec::new(),
                holdings: U256::zero(),
            },
        );
        Ok(channel_id)
    }

    fn sign(&self, commitment: Commitment) -> StoreResult<SignedCommitment> {
        let encoded = commitment.encode()?;
        let signature = self.private_key.sign(&encoded)?;
        Ok(SignedCommitment {
            commitment,
            signature: signature.0,
        })
    }

    // ---- chain mirror -------------------------------------------------

    pub fn set_holdings(&mut self, channel_id: &ChannelId, total: U256) -> StoreResult<()> {
        self.channel_mut(channel_id)?.holdings = total;
        Ok(())
    }

    pub fn holdings(&self, channel_id: &ChannelId) -> U256 {
        self.channels
            .get(channel_id)
            .map(|state| state.holdings)
            .unwrap_or_default()
    }

    pub fn register_challenge(&mut self, channel_id: ChannelId, record: ChallengeRecord) {
        self.challenges.insert(channel_id, record);
    }

    pub fn clear_challenge(&mut self, channel_id: &ChannelId) {
        self.challenges.remove(channel_id);
    }

    pub fn challenge(&self, channel_id: &ChannelId) -> Option<&ChallengeRecord> {
        self.challenges.get(channel_id)
    }

    /// Move `amount` of a guarantor channel's holdings to the channel it
    /// guarantees. Fails when the guarantor does not hold enough.
    pub fn claim_from_guarantor(
        &mut self,
        guarantor_id: &ChannelId,
        target_id: &ChannelId,
        amount: U256,
    ) -> StoreResult<()> {
        let held = self.channel(guarantor_id)?.holdings;
        if held < amount {
            return Err(StoreError::GuarantorUnderfunded {
                held,
                required: amount,
            });
        }
        self.channel_mut(guarantor_id)?.holdings = held - amount;
        let target = self.channel_mut(target_id)?;
        target.holdings = target.holdings.saturating_add(amount);
        Ok(())
    }

    // ---- funding bookkeeping ------------------------------------------

    pub fn set_funding_source(&mut self, channel_id: ChannelId, source: FundingSource) {
        self.funding.insert(channel_id, source);
    }

    pub fn funding_source(&self, channel_id: &ChannelId) -> Option<FundingSource> {
        self.funding.get(channel_id).copied()
    }

    pub fn clear_funding_source(&mut self, channel_id: &ChannelId) {
        self.funding.remove(channel_id);
    }

    // ---- subscriptions ------------------------------------------------

    /// Route future chain events on `channel_id` to `process_id`.
    pub fn subscribe(&mut self, channel_id: ChannelId, process_id: String) {
        let subscribers = self.subscriptions.entry(channel_id).or_default();
        if !subscribers.contains(&process_id) {
            subscribers.push(process_id);
        }
    }

    pub fn unsubscribe(&mut self, channel_id: &ChannelId, process_id: &str) {
        if let Some(subscribers) = self.subscriptions.get_mut(channel_id) {
            subscribers.retain(|p| p != process_id);
        }
    }

    /// Drop every subscription held by `process_id`, across all channels.
    pub fn unsubscribe_all(&mut self, process_id: &str) {
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(|p| p != process_id);
        }
    }

    pub fn subscribers(&self, channel_id: &ChannelId) -> &[String] {
        self.subscriptions
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ---- outbox helpers -----------------------------------------------

    /// Queue the channel's full commitment history to the next participant.
    pub fn send_commitments(
        &mut self,
        channel_id: &ChannelId,
        process_id: &str,
        protocol_locator: ProtocolLocator,
    ) -> StoreResult<()> {
        let state = self.channel(channel_id)?;
        let recipient = state.next_participant();
        let signed_commitments = state.commitments.clone();
        self.outbox.queue_message(OutboundMessage {
            recipient,
            process_id: process_id.to_string(),
            payload: MessagePayload::Commitments {
                protocol_locator,
                signed_commitments,
            },
        });
        Ok(())
    }

    pub fn queue_message(&mut self, message: OutboundMessage) {
        self.outbox.queue_message(message);
    }

    pub fn queue_transaction(&mut self, request: TransactionRequest) {
        self.outbox.queue_transaction(request);
    }
}

/// Check that a signed commitment carries its mover's signature.
pub fn verify_signature(signed: &SignedCommitment) -> StoreResult<()> {
    let encoded = signed.commitment.encode()?;
    let signature = RecoverableSignature::from_bytes(signed.signature);
    let signer = recover_signer(&encoded, &signature).map_err(|_| StoreError::InvalidSignature)?;
    if signer != signed.commitment.mover() {
        return Err(StoreError::WrongSigner);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::CommitmentType;

    fn create_keys() -> (PrivateKey, PrivateKey) {
        (
            PrivateKey::from_bytes([1u8; 32]).unwrap(),
            PrivateKey::from_bytes([2u8; 32]).unwrap(),
        )
    }

    fn create_channel(a: &PrivateKey, b: &PrivateKey) -> Channel {
        Channel::new(
            [0xaa; 20],
            U256::from(11),
            vec![a.address(), b.address()],
        )
        .unwrap()
    }

    fn create_prefund(channel: &Channel, turn_num: u64) -> Commitment {
        Commitment {
            channel: channel.clone(),
            turn_num,
            commitment_count: turn_num as u32,
            allocation: vec![U256::from(5), U256::from(5)],
            destination: vec![channel.participants[0], channel.participants[1]],
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: vec![],
        }
    }

    #[test]
    fn test_sign_and_initialize_then_check_opponent() {
        let (key_a, key_b) = create_keys();
        let channel = create_channel(&key_a, &key_b);

        let mut store_a = SharedData::new(key_a);
        let mut store_b = SharedData::new(key_b.clone());

        let first = store_a
            .sign_and_initialize(create_prefund(&channel, 0), ChannelKind::Application)
            .unwrap();
        store_b
            .check_and_initialize(first.clone(), ChannelKind::Application)
            .unwrap();

        let second = Commitment {
            turn_num: 1,
            commitment_count: 1,
            ..first.commitment.clone()
        };
        let encoded = second.encode().unwrap();
        let signature = key_b.sign(&encoded).unwrap();
        store_a
            .check_and_store(SignedCommitment {
                commitment: second,
                signature: signature.0,
            })
            .unwrap();
        assert_eq!(store_a.channel(&channel.id()).unwrap().turn_num(), Some(1));
    }

    #[test]
    fn test_sign_and_store_rejects_out_of_turn() {
        let (key_a, key_b) = create_keys();
        let channel = create_channel(&key_a, &key_b);
        let mut store_a = SharedData::new(key_a);
        store_a
            .sign_and_initialize(create_prefund(&channel, 0), ChannelKind::Application)
            .unwrap();
        // Turn 1 belongs to the second participant.
        let result = store_a.sign_and_store(create_prefund(&channel, 1));
        assert!(matches!(result, Err(StoreError::NotOurTurn { .. })));
    }

    #[test]
    fn test_check_and_store_rejects_bad_signature() {
        let (key_a, key_b) = create_keys();
        let channel = create_channel(&key_a, &key_b);
        let mut store_a = SharedData::new(key_a.clone());
        store_a
            .sign_and_initialize(create_prefund(&channel, 0), ChannelKind::Application)
            .unwrap();

        // Signed by the wrong key for turn 1's mover.
        let second = create_prefund(&channel, 1);
        let encoded = second.encode().unwrap();
        let signature = key_a.sign(&encoded).unwrap();
        let result = store_a.check_and_store(SignedCommitment {
            commitment: second,
            signature: signature.0,
        });
        assert!(matches!(result, Err(StoreError::WrongSigner)));
        let _ = key_b;
    }

    #[test]
    fn test_stale_commitment_rejected() {
        let (key_a, key_b) = create_keys();
        let channel = create_channel(&key_a, &key_b);
        let mut store_a = SharedData::new(key_a);
        let first = store_a
            .sign_and_initialize(create_prefund(&channel, 0), ChannelKind::Application)
            .unwrap();
        let result = store_a.check_and_store(first);
        assert!(matches!(result, Err(StoreError::StaleTurnNum { .. })));
    }

    #[test]
    fn test_unknown_channel_error_names_the_id() {
        let err = StoreError::ChannelNotFound([0x11; 32]);
        assert_eq!(
            err.to_string(),
            format!("unknown channel {}", "11".repeat(32))
        );
    }

    #[test]
    fn test_claim_from_guarantor_requires_funding() {
        let (key_a, key_b) = create_keys();
        let channel = create_channel(&key_a, &key_b);
        let guarantor =
            Channel::new([0xbb; 20], U256::from(12), channel.participants.clone()).unwrap();
        let mut store = SharedData::new(key_a);
        store
            .sign_and_initialize(create_prefund(&channel, 0), ChannelKind::Application)
            .unwrap();
        store
            .sign_and_initialize(create_prefund(&guarantor, 0), ChannelKind::Ledger)
            .unwrap();
        store.set_holdings(&guarantor.id(), U256::from(3)).unwrap();

        let result = store.claim_from_guarantor(&guarantor.id(), &channel.id(), U256::from(5));
        assert!(matches!(
            result,
            Err(StoreError::GuarantorUnderfunded { .. })
        ));

        store
            .claim_from_guarantor(&guarantor.id(), &channel.id(), U256::from(2))
            .unwrap();
        assert_eq!(store.holdings(&guarantor.id()), U256::from(1));
        assert_eq!(store.holdings(&channel.id()), U256::from(2));
    }

    #[test]
    fn test_subscriptions_deduplicate() {
        let (key_a, _) = create_keys();
        let mut store = SharedData::new(key_a);
        store.subscribe([9u8; 32], "funding-x".into());
        store.subscribe([9u8; 32], "funding-x".into());
        assert_eq!(store.subscribers(&[9u8; 32]).len(), 1);
    }
}
