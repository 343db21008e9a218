//! # Withdrawing
//!
//! Moves a concluded channel's funds from the adjudicator to an address
//! the user approves:
//!
//! ```text
//! ApprovalPending -> WaitForTransaction -> WaitForAcknowledgement -> Success
//!        |                   |
//!        v                   v
//!     Rejected            Failure
//! ```

use primitive_types::U256;
use shared_types::ChannelId;
use tracing::warn;

use crate::actions::ProtocolAction;
use crate::outbox::TransactionKind;
use crate::shared_data::SharedData;
use crate::transaction_submission::{self, TransactionSubmission};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalFailureReason {
    UserRejected,
    TransactionFailed,
    ChannelNotClosed,
}

#[derive(Debug, Clone)]
pub enum Withdrawing {
    ApprovalPending {
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
        reason: WithdrawalFailureReason,
    },
}

impl Withdrawing {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn initialize(process_id: &str, channel_id: ChannelId) -> Withdrawing {
    Withdrawing::ApprovalPending {
        process_id: process_id.to_string(),
        channel_id,
    }
}

pub fn reduce(state: Withdrawing, shared: &mut SharedData, action: &ProtocolAction) -> Withdrawing {
    match (state, action) {
        (
            Withdrawing::ApprovalPending {
                process_id,
                channel_id,
            },
            ProtocolAction::WithdrawalApproved {
                withdrawal_address, ..
            },
        ) => {
            let amount = match our_share(&channel_id, shared) {
                Some(amount) => amount,
                None => {
                    return Withdrawing::Failure {
                        channel_id,
                        reason: WithdrawalFailureReason::ChannelNotClosed,
                    }
                }
            };
            let participant = match shared.channel(&channel_id) {
                Ok(state) => state.our_address(),
                Err(_) => shared.address(),
            };
            let transaction = transaction_submission::initialize(
                &process_id,
                TransactionKind::Withdraw {
                    channel_id,
                    participant,
                    destination: *withdrawal_address,
                    amount,
                },
                shared,
            );
            Withdrawing::WaitForTransaction {
                process_id,
                channel_id,
                transaction,
            }
        }
        (
            Withdrawing::ApprovalPending { channel_id, .. },
            ProtocolAction::WithdrawalRejected { .. },
        ) => Withdrawing::Failure {
            channel_id,
            reason: WithdrawalFailureReason::UserRejected,
        },
        (
            Withdrawing::WaitForTransaction {
                process_id,
                channel_id,
                transaction,
            },
            action,
        ) => {
            let transaction = transaction_submission::reduce(transaction, shared, action);
            if transaction.is_success() {
                Withdrawing::WaitForAcknowledgement {
                    process_id,
                    channel_id,
                }
            } else if transaction.is_terminal() {
                Withdrawing::Failure {
                    channel_id,
                    reason: WithdrawalFailureReason::TransactionFailed,
                }
            } else {
                Withdrawing::WaitForTransaction {
                    process_id,
                    channel_id,
                    transaction,
                }
            }
        }
        (
            Withdrawing::WaitForAcknowledgement { channel_id, .. },
            ProtocolAction::WithdrawalSuccessAcknowledged { .. },
        ) => Withdrawing::Success { channel_id },
        (state, action) => {
            warn!(
                process_id = action.process_id(),
                "withdrawing ignored action"
            );
            state
        }
    }
}

/// Our allocation entry in the channel's latest commitment; the channel
/// must have reached its conclude round.
fn our_share(channel_id: &ChannelId, shared: &SharedData) -> Option<U256> {
    let state = shared.channel(channel_id).ok()?;
    let latest = &state.last_commitment()?.commitment;
    if latest.commitment_type != shared_types::CommitmentType::Conclude {
        return None;
    }
    let our_address = state.our_address();
    latest
        .destination
        .iter()
        .position(|d| *d == our_address)
        .map(|i| latest.allocation[i])
}
