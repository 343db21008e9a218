//! Challenger side of a dispute: force the counterparty to move on chain.
//!
//! ```text
//! ApprovalPending -> WaitForTransaction -> WaitForResponseOrTimeout
//!                                             |              |
//!                                   AcknowledgeResponse  AcknowledgeTimeout
//!                                             |              |
//!                                        SuccessOpen    SuccessClosed
//! ```

use shared_types::ChannelId;
use tracing::{info, warn};

use crate::actions::ProtocolAction;
use crate::outbox::TransactionKind;
use crate::shared_data::{ChallengeRecord, SharedData, StoreError};
use crate::transaction_submission::{self, TransactionSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengerFailureReason {
    UserDenied,
    TransactionFailed,
    ChannelNotChallengeable,
}

#[derive(Debug, Clone)]
pub enum Challenger {
    ApprovalPending {
        process_id: String,
        channel_id: ChannelId,
    },
    WaitForTransaction {
        process_id: String,
        channel_id: ChannelId,
        transaction: TransactionSubmission,
    },
    WaitForResponseOrTimeout {
        process_id: String,
        channel_id: ChannelId,
        /// Learned from the adjudicator's expiry event, never locally.
        expires_at: Option<u64>,
    },
    AcknowledgeResponse {
        process_id: String,
        channel_id: ChannelId,
    },
    AcknowledgeTimeout {
        process_id: String,
        channel_id: ChannelId,
    },
    /// The counterparty responded; the channel stays open.
    SuccessOpen { channel_id: ChannelId },
    /// The challenge expired; the channel is closed with the challenge
    /// outcome.
    SuccessClosed { channel_id: ChannelId },
    Failure {
        channel_id: ChannelId,
        reason: ChallengerFailureReason,
    },
}

impl Challenger {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SuccessOpen { .. } | Self::SuccessClosed { .. } | Self::Failure { .. }
        )
    }
}

pub fn initialize(process_id: &str, channel_id: ChannelId, shared: &mut SharedData) -> Challenger {
    shared.subscribe(channel_id, process_id.to_string());
    Challenger::ApprovalPending {
        process_id: process_id.to_string(),
        channel_id,
    }
}

pub fn reduce(state: Challenger, shared: &mut SharedData, action: &ProtocolAction) -> Challenger {
    match (state, action) {
        (
            Challenger::ApprovalPending {
                process_id,
                channel_id,
            },
            ProtocolAction::ChallengeApproved { .. },
        ) => {
            let (from, to) = match challenge_pair(&channel_id, shared) {
                Some(pair) => pair,
                None => {
                    return Challenger::Failure {
                        channel_id,
                        reason: ChallengerFailureReason::ChannelNotChallengeable,
                    }
                }
            };
            let transaction = transaction_submission::initialize(
                &process_id,
                TransactionKind::ForceMove {
                    from_commitment: from,
                    to_commitment: to,
                },
                shared,
            );
            Challenger::WaitForTransaction {
                process_id,
                channel_id,
                transaction,
            }
        }
        (
            Challenger::ApprovalPending { channel_id, .. },
            ProtocolAction::ChallengeDenied { .. },
        ) => Challenger::Failure {
            channel_id,
            reason: ChallengerFailureReason::UserDenied,
        },
        (
            Challenger::WaitForTransaction {
                process_id,
                channel_id,
                transaction,
            },
            action,
        ) => {
            let transaction = transaction_submission::reduce(transaction, shared, action);
            if transaction.is_success() {
                info!(channel_id = %hex::encode(channel_id), "challenge is on chain");
                Challenger::WaitForResponseOrTimeout {
                    process_id,
                    channel_id,
                    expires_at: None,
                }
            } else if transaction.is_terminal() {
                Challenger::Failure {
                    channel_id,
                    reason: ChallengerFailureReason::TransactionFailed,
                }
            } else {
                Challenger::WaitForTransaction {
                    process_id,
                    channel_id,
                    transaction,
                }
            }
        }
        (
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                ..
            },
            ProtocolAction::ChallengeRegisteredEvent {
                challenge_commitment,
                expires_at,
                ..
            },
        ) => {
            shared.register_challenge(
                channel_id,
                ChallengeRecord {
                    challenge_commitment: challenge_commitment.clone(),
                    expires_at: *expires_at,
                },
            );
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                expires_at: Some(*expires_at),
            }
        }
        (
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                ..
            },
            ProtocolAction::ChallengeExpirySetEvent { expires_at, .. },
        ) => Challenger::WaitForResponseOrTimeout {
            process_id,
            channel_id,
            expires_at: Some(*expires_at),
        },
        (
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                ..
            },
            ProtocolAction::RespondWithMoveEvent {
                response_commitment,
                signature,
                ..
            },
        ) => {
            match shared.check_and_store(shared_types::SignedCommitment {
                commitment: response_commitment.clone(),
                signature: *signature,
            }) {
                Ok(()) | Err(StoreError::StaleTurnNum { .. }) => {}
                Err(e) => warn!(error = %e, "on-chain response did not validate locally"),
            }
            shared.clear_challenge(&channel_id);
            Challenger::AcknowledgeResponse {
                process_id,
                channel_id,
            }
        }
        (
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                ..
            },
            ProtocolAction::ChallengeClearedEvent { .. } | ProtocolAction::RefutedEvent { .. },
        ) => {
            shared.clear_challenge(&channel_id);
            Challenger::AcknowledgeResponse {
                process_id,
                channel_id,
            }
        }
        (
            Challenger::WaitForResponseOrTimeout {
                process_id,
                channel_id,
                ..
            },
            ProtocolAction::ChallengeExpiredEvent { .. },
        ) => {
            shared.clear_challenge(&channel_id);
            Challenger::AcknowledgeTimeout {
                process_id,
                channel_id,
            }
        }
        (
            Challenger::AcknowledgeResponse { channel_id, .. },
            ProtocolAction::Acknowledged { .. },
        ) => Challenger::SuccessOpen { channel_id },
        (
            Challenger::AcknowledgeTimeout { channel_id, .. },
            ProtocolAction::Acknowledged { .. },
        ) => Challenger::SuccessClosed { channel_id },
        (state, action) => {
            warn!(
                process_id = action.process_id(),
                "challenger ignored action"
            );
            state
        }
    }
}

/// The two latest signed commitments, the evidence a force-move needs.
fn challenge_pair(
    channel_id: &ChannelId,
    shared: &SharedData,
) -> Option<(shared_types::SignedCommitment, shared_types::SignedCommitment)> {
    let state = shared.channel(channel_id).ok()?;
    let to = state.last_commitment()?.clone();
    let from = state.penultimate_commitment()?.clone();
    Some((from, to))
}
