//! Actions: every external event a protocol reducer can receive.
//!
//! Reducers never poll. Peers, the chain adapter, the transaction
//! submitter, and the user all feed results back in as actions; a reducer
//! that is waiting simply ignores everything except the action its
//! current state expects.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_types::{Address, ChannelId, SignedCommitment};

use crate::locator::ProtocolLocator;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolAction {
    // Peer traffic
    CommitmentsReceived {
        process_id: String,
        protocol_locator: ProtocolLocator,
        signed_commitments: Vec<SignedCommitment>,
    },
    /// The counterparty (or an enclosing protocol) lifted a send embargo.
    ClearedToSend {
        process_id: String,
        protocol_locator: ProtocolLocator,
    },

    // Transaction submission lifecycle
    TransactionSent {
        process_id: String,
    },
    TransactionSubmissionFailed {
        process_id: String,
    },
    TransactionSubmitted {
        process_id: String,
    },
    TransactionConfirmed {
        process_id: String,
        contract_address: Option<Address>,
    },
    TransactionRetryApproved {
        process_id: String,
    },
    TransactionRetryDenied {
        process_id: String,
    },
    TransactionFailed {
        process_id: String,
    },

    // Chain events, fanned out to every process watching the channel
    DepositedEvent {
        process_id: String,
        protocol_locator: ProtocolLocator,
        channel_id: ChannelId,
        amount: U256,
        total_holdings: U256,
    },
    ChallengeRegisteredEvent {
        process_id: String,
        channel_id: ChannelId,
        challenge_commitment: shared_types::Commitment,
        expires_at: u64,
    },
    ChallengeExpirySetEvent {
        process_id: String,
        channel_id: ChannelId,
        expires_at: u64,
    },
    ChallengeClearedEvent {
        process_id: String,
        channel_id: ChannelId,
        new_turn_num: u64,
    },
    RespondWithMoveEvent {
        process_id: String,
        channel_id: ChannelId,
        response_commitment: shared_types::Commitment,
        #[serde_as(as = "Bytes")]
        signature: shared_types::Signature,
    },
    RefutedEvent {
        process_id: String,
        channel_id: ChannelId,
        refute_commitment: shared_types::Commitment,
    },
    ChallengeExpiredEvent {
        process_id: String,
        channel_id: ChannelId,
        timestamp: u64,
    },
    ConcludedEvent {
        process_id: String,
        channel_id: ChannelId,
    },
    AssetTransferredEvent {
        process_id: String,
        channel_id: ChannelId,
        destination: Address,
        amount: U256,
    },

    // User decisions
    ChallengeApproved {
        process_id: String,
    },
    ChallengeDenied {
        process_id: String,
    },
    ChallengeRequested {
        process_id: String,
        channel_id: ChannelId,
    },
    ExitChallenge {
        process_id: String,
    },
    Acknowledged {
        process_id: String,
    },
    /// The application layer produced our next commitment for a running
    /// application channel.
    OwnCommitment {
        process_id: String,
        commitment: shared_types::Commitment,
    },
    /// An opponent commitment arrived for a running application channel.
    OpponentCommitment {
        process_id: String,
        commitment: shared_types::Commitment,
        #[serde_as(as = "Bytes")]
        signature: shared_types::Signature,
    },
    WithdrawalApproved {
        process_id: String,
        withdrawal_address: Address,
    },
    WithdrawalRejected {
        process_id: String,
    },
    WithdrawalSuccessAcknowledged {
        process_id: String,
    },
}

impl ProtocolAction {
    pub fn process_id(&self) -> &str {
        use ProtocolAction::*;
        match self {
            CommitmentsReceived { process_id, .. }
            | ClearedToSend { process_id, .. }
            | TransactionSent { process_id }
            | TransactionSubmissionFailed { process_id }
            | TransactionSubmitted { process_id }
            | TransactionConfirmed { process_id, .. }
            | TransactionRetryApproved { process_id }
            | TransactionRetryDenied { process_id }
            | TransactionFailed { process_id }
            | DepositedEvent { process_id, .. }
            | ChallengeRegisteredEvent { process_id, .. }
            | ChallengeExpirySetEvent { process_id, .. }
            | ChallengeClearedEvent { process_id, .. }
            | RespondWithMoveEvent { process_id, .. }
            | RefutedEvent { process_id, .. }
            | ChallengeExpiredEvent { process_id, .. }
            | ConcludedEvent { process_id, .. }
            | AssetTransferredEvent { process_id, .. }
            | ChallengeApproved { process_id }
            | ChallengeDenied { process_id }
            | ChallengeRequested { process_id, .. }
            | ExitChallenge { process_id }
            | Acknowledged { process_id }
            | OwnCommitment { process_id, .. }
            | OpponentCommitment { process_id, .. }
            | WithdrawalApproved { process_id, .. }
            | WithdrawalRejected { process_id }
            | WithdrawalSuccessAcknowledged { process_id } => process_id,
        }
    }

    /// The locator of the instance this action addresses, when it carries
    /// one. Actions without a locator are routed by the state machine's
    /// own shape (e.g. transaction actions go to whichever child is
    /// currently submitting).
    pub fn locator(&self) -> Option<&ProtocolLocator> {
        use ProtocolAction::*;
        match self {
            CommitmentsReceived {
                protocol_locator, ..
            }
            | ClearedToSend {
                protocol_locator, ..
            }
            | DepositedEvent {
                protocol_locator, ..
            } => Some(protocol_locator),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        use ProtocolAction::*;
        match self {
            DepositedEvent { channel_id, .. }
            | ChallengeRegisteredEvent { channel_id, .. }
            | ChallengeExpirySetEvent { channel_id, .. }
            | ChallengeClearedEvent { channel_id, .. }
            | RespondWithMoveEvent { channel_id, .. }
            | RefutedEvent { channel_id, .. }
            | ChallengeExpiredEvent { channel_id, .. }
            | ConcludedEvent { channel_id, .. }
            | AssetTransferredEvent { channel_id, .. }
            | ChallengeRequested { channel_id, .. } => Some(*channel_id),
            _ => None,
        }
    }

    /// True for events originating on-chain, which fan out to every
    /// process subscribed to the channel rather than to one process id.
    pub fn is_chain_event(&self) -> bool {
        use ProtocolAction::*;
        matches!(
            self,
            DepositedEvent { .. }
                | ChallengeRegisteredEvent { .. }
                | ChallengeExpirySetEvent { .. }
                | ChallengeClearedEvent { .. }
                | RespondWithMoveEvent { .. }
                | RefutedEvent { .. }
                | ChallengeExpiredEvent { .. }
                | ConcludedEvent { .. }
                | AssetTransferredEvent { .. }
        )
    }
}
