//! Outbox: side effects a reducer wants performed.
//!
//! Reducers are pure over channel state; anything that must leave the
//! engine (a message to a peer, a transaction for the chain) is queued
//! here and drained by the orchestrator after the reduction step.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use shared_types::{Address, ChannelId, Commitment, Signature, SignedCommitment};

use crate::locator::ProtocolLocator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    Commitments {
        protocol_locator: ProtocolLocator,
        signed_commitments: Vec<SignedCommitment>,
    },
    ClearedToSend {
        protocol_locator: ProtocolLocator,
    },
    /// Asks the counterparty's engine to start the matching process.
    OpenProcessRequest {
        channel_id: ChannelId,
    },
    CloseProcessRequest {
        channel_id: ChannelId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: Address,
    pub process_id: String,
    pub payload: MessagePayload,
}

/// What to put on chain. The engine's chain port turns these into actual
/// adjudicator calls; reducers only name the operation and its arguments.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Deposit {
        channel_id: ChannelId,
        amount: U256,
        expected_held: U256,
    },
    ForceMove {
        from_commitment: SignedCommitment,
        to_commitment: SignedCommitment,
    },
    RespondWithMove {
        response_commitment: Commitment,
        #[serde_as(as = "Bytes")]
        signature: Signature,
    },
    Refute {
        refute_commitment: Commitment,
        #[serde_as(as = "Bytes")]
        signature: Signature,
    },
    ConcludeAndWithdraw {
        from_commitment: SignedCommitment,
        to_commitment: SignedCommitment,
        participant: Address,
        destination: Address,
        amount: U256,
    },
    Withdraw {
        channel_id: ChannelId,
        participant: Address,
        destination: Address,
        amount: U256,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub process_id: String,
    pub kind: TransactionKind,
}

#[derive(Debug, Clone, Default)]
pub struct Outbox {
    messages: Vec<OutboundMessage>,
    transactions: Vec<TransactionRequest>,
}

impl Outbox {
    pub fn queue_message(&mut self, message: OutboundMessage) {
        self.messages.push(message);
    }

    pub fn queue_transaction(&mut self, request: TransactionRequest) {
        self.transactions.push(request);
    }

    pub fn take_messages(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.messages)
    }

    pub fn take_transactions(&mut self) -> Vec<TransactionRequest> {
        std::mem::take(&mut self.transactions)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.transactions.is_empty()
    }
}
