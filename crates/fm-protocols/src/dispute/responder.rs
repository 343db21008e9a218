//! Responder side of a dispute: answer a challenge before it expires.
//!
//! ```text
//! WaitForApproval -> { WaitForResponse -> } WaitForTransaction
//!                        -> WaitForAcknowledgement -> Success
//! ```
//!
//! When our history already holds a commitment newer than the challenge,
//! we refute with it directly; otherwise the application layer supplies
//! the response move. An expiry event in any waiting state is terminal.

use shared_types::{ChannelId, SignedCommitment};
use tracing::warn;

use crate::actions::ProtocolAction;
use crate::outbox::TransactionKind;
use crate::shared_data::{ChallengeRecord, SharedData};
use crate::transaction_submission::{self, TransactionSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderFailureReason {
    TimedOut,
    TransactionFailed,
    UserDeclined,
}

#[derive(Debug, Clone)]
pub enum Responder {
    WaitForApproval {
        process_id: String,
        channel_id: ChannelId,
    },
    /// Approved, but a response move must come from the application layer.
    WaitForResponse {
        process_id: String,
        channel_id: ChannelId,
    },
    WaitForTransaction {
        process_id: String,
        channel_id: ChannelId,
        transaction: TransactionSubmission,
    },
    WaitForAcknowledgement {
        process_id: String,
        channel_id: ChannelId,
    },
    Success {
        channel_id: ChannelId,
    },
    Failure {
        channel_id: ChannelId,
        reason: ResponderFailureReason,
    },
}

impl Responder {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::WaitForApproval { channel_id, .. }
            | Self::WaitForResponse { channel_id, .. }
            | Self::WaitForTransaction { channel_id, .. }
            | Self::WaitForAcknowledgement { channel_id, .. }
            | Self::Success { channel_id }
            | Self::Failure { channel_id, .. } => *channel_id,
        }
    }
}

/// A challenge against us was registered on chain.
pub fn initialize(
    process_id: &str,
    channel_id: ChannelId,
    challenge: ChallengeRecord,
    shared: &mut SharedData,
) -> Responder {
    shared.subscribe(channel_id, process_id.to_string());
    shared.register_challenge(channel_id, challenge);
    Responder::WaitForApproval {
        process_id: process_id.to_string(),
        channel_id,
    }
}

pub fn reduce(state: Responder, shared: &mut SharedData, action: &ProtocolAction) -> Responder {
    // Expiry beats everything else in any non-terminal state.
    if let ProtocolAction::ChallengeExpiredEvent { .. } = action {
        if !state.is_terminal() {
            let channel_id = state.channel_id();
            shared.clear_challenge(&channel_id);
            return Responder::Failure {
                channel_id,
                reason: ResponderFailureReason::TimedOut,
            };
        }
    }

    match (state, action) {
        (
            Responder::WaitForApproval {
                process_id,
                channel_id,
            },
            ProtocolAction::ChallengeApproved { .. },
        ) => match refutation(&channel_id, shared) {
            Some(refute) => {
                let transaction = transaction_submission::initialize(
                    &process_id,
                    TransactionKind::Refute {
                        refute_commitment: refute.commitment,
                        signature: refute.signature,
                    },
                    shared,
                );
                Responder::WaitForTransaction {
                    process_id,
                    channel_id,
                    transaction,
                }
            }
            None => Responder::WaitForResponse {
                process_id,
                channel_id,
            },
        },
        (
            Responder::WaitForApproval { channel_id, .. },
            ProtocolAction::ExitChallenge { .. },
        ) => Responder::Failure {
            channel_id,
            reason: ResponderFailureReason::UserDeclined,
        },
        (
            Responder::WaitForResponse {
                process_id,
                channel_id,
            },
            ProtocolAction::OwnCommitment { commitment, .. },
        ) => match shared.sign_and_store(commitment.clone()) {
            Ok(signed) => {
                let transaction = transaction_submission::initialize(
                    &process_id,
                    TransactionKind::RespondWithMove {
                        response_commitment: signed.commitment,
                        signature: signed.signature,
                    },
                    shared,
                );
                Responder::WaitForTransaction {
                    process_id,
                    channel_id,
                    transaction,
                }
            }
            Err(e) => {
                warn!(error = %e, "response commitment rejected");
                Responder::WaitForResponse {
                    process_id,
                    channel_id,
                }
            }
        },
        (
            Responder::WaitForTransaction {
                process_id,
                channel_id,
                transaction,
            },
            action,
        ) => {
            let transaction = transaction_submission::reduce(transaction, shared, action);
            if transaction.is_success() {
                shared.clear_challenge(&channel_id);
                Responder::WaitForAcknowledgement {
                    process_id,
                    channel_id,
                }
            } else if transaction.is_terminal() {
                Responder::Failure {
                    channel_id,
                    reason: ResponderFailureReason::TransactionFailed,
                }
            } else {
                Responder::WaitForTransaction {
                    process_id,
                    channel_id,
                    transaction,
                }
            }
        }
        (
            Responder::WaitForAcknowledgement { channel_id, .. },
            ProtocolAction::Acknowledged { .. },
        ) => Responder::Success { channel_id },
        (state, action) => {
            warn!(process_id = action.process_id(), "responder ignored action");
            state
        }
    }
}

/// A stored commitment strictly newer than the challenge, usable as a
/// refutation.
fn refutation(channel_id: &ChannelId, shared: &SharedData) -> Option<SignedCommitment> {
    let challenge_turn = shared.challenge(channel_id)?.challenge_commitment.turn_num;
    let state = shared.channel(channel_id).ok()?;
    state
        .commitments
        .iter()
        .rev()
        .find(|sc| sc.commitment.turn_num > challenge_turn)
        .cloned()
}
