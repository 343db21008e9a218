//! # Direct Funding
//!
//! Tracks on-chain deposits against a channel until its holdings reach the
//! total funding requirement:
//!
//! ```text
//! NotSafeToDeposit -> WaitForDepositTransaction -> WaitForFundingConfirmation
//!                                                     |            |
//!                                                FundingSuccess FundingFailure
//! ```
//!
//! Depositing is guarded by `safe_to_deposit_level`: we only put our
//! deposit on chain once everyone ahead of us has deposited, so a
//! front-run cannot under- or over-fund the channel. A channel whose
//! holdings already cover the total requirement is never deposited into.

use primitive_types::U256;
use shared_types::ChannelId;
use tracing::{debug, warn};

use crate::actions::ProtocolAction;
use crate::locator::ProtocolLocator;
use crate::outbox::TransactionKind;
use crate::shared_data::SharedData;
use crate::transaction_submission::{self, TransactionSubmission};

#[derive(Debug, Clone)]
pub struct DirectFundingArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub channel_id: ChannelId,
    /// Our own contribution.
    pub required_deposit: U256,
    /// Holdings level at which the channel counts as funded.
    pub total_funding_required: U256,
    /// Holdings level others must have reached before our deposit is safe.
    pub safe_to_deposit_level: U256,
}

#[derive(Debug, Clone)]
pub enum DirectFunding {
    NotSafeToDeposit {
        args: DirectFundingArgs,
    },
    WaitForDepositTransaction {
        args: DirectFundingArgs,
        transaction: TransactionSubmission,
    },
    WaitForFundingConfirmation {
        args: DirectFundingArgs,
    },
    FundingSuccess {
        channel_id: ChannelId,
    },
    FundingFailure {
        channel_id: ChannelId,
    },
}

impl DirectFunding {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FundingSuccess { .. } | Self::FundingFailure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::FundingSuccess { .. })
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::NotSafeToDeposit { args }
            | Self::WaitForDepositTransaction { args, .. }
            | Self::WaitForFundingConfirmation { args } => args.channel_id,
            Self::FundingSuccess { channel_id } | Self::FundingFailure { channel_id } => {
                *channel_id
            }
        }
    }
}

pub fn initialize(args: DirectFundingArgs, shared: &mut SharedData) -> DirectFunding {
    shared.subscribe(args.channel_id, args.process_id.clone());
    evaluate(args, shared)
}

pub fn reduce(
    state: DirectFunding,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> DirectFunding {
    match (state, action) {
        (
            state,
            ProtocolAction::DepositedEvent {
                channel_id,
                total_holdings,
                ..
            },
        ) => {
            if let Err(e) = shared.set_holdings(channel_id, *total_holdings) {
                warn!(error = %e, "deposit event for unknown channel");
                return state;
            }
            match state {
                DirectFunding::NotSafeToDeposit { args } => evaluate(args, shared),
                DirectFunding::WaitForFundingConfirmation { args } => {
                    confirm_or_wait(args, shared)
                }
                // Mid-submission deposits are recorded; we still wait for
                // our own transaction to resolve.
                other => other,
            }
        }
        (
            DirectFunding::WaitForDepositTransaction { args, transaction },
            action,
        ) => {
            let transaction = transaction_submission::reduce(transaction, shared, action);
            if transaction.is_success() {
                confirm_or_wait(args, shared)
            } else if transaction.is_terminal() {
                DirectFunding::FundingFailure {
                    channel_id: args.channel_id,
                }
            } else {
                DirectFunding::WaitForDepositTransaction { args, transaction }
            }
        }
        (state, action) => {
            warn!(
                process_id = action.process_id(),
                "direct funding ignored action"
            );
            state
        }
    }
}

/// Decide what the current holdings allow: done, deposit, or wait.
fn evaluate(args: DirectFundingArgs, shared: &mut SharedData) -> DirectFunding {
    let holdings = shared.holdings(&args.channel_id);
    if holdings >= args.total_funding_required {
        debug!(
            channel_id = %hex::encode(args.channel_id),
            "channel already fully funded, no deposit needed"
        );
        return DirectFunding::FundingSuccess {
            channel_id: args.channel_id,
        };
    }
    if args.required_deposit.is_zero() {
        return confirm_or_wait(args, shared);
    }
    if holdings < args.safe_to_deposit_level {
        return DirectFunding::NotSafeToDeposit { args };
    }
    let transaction = transaction_submission::initialize(
        &args.process_id,
        TransactionKind::Deposit {
            channel_id: args.channel_id,
            amount: args.required_deposit,
            expected_held: holdings,
        },
        shared,
    );
    DirectFunding::WaitForDepositTransaction { args, transaction }
}

fn confirm_or_wait(args: DirectFundingArgs, shared: &SharedData) -> DirectFunding {
    if shared.holdings(&args.channel_id) >= args.total_funding_required {
        DirectFunding::FundingSuccess {
            channel_id: args.channel_id,
        }
    } else {
        DirectFunding::WaitForFundingConfirmation { args }
    }
}
