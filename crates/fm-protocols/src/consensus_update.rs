//! # Consensus Update
//!
//! Drives a ledger channel to unanimous agreement on a reallocation:
//! one participant proposes, everyone else votes, and the final vote
//! enacts the proposed outcome.
//!
//! ```text
//! NotSafeToSend -> CommitmentSent -> { Success | Failure }
//! ```
//!
//! Success requires the channel's latest commitment to be a validated
//! consensus carrying exactly the agreed outcome. Unlike Advance Channel,
//! a validator rejection here is terminal: a ledger reallocation that one
//! participant will not sign can never complete.

use primitive_types::U256;
use shared_types::{Address, ChannelId, Commitment, CommitmentType};
use tracing::{debug, warn};

use fm_validator::consensus_app::{self, UpdateType};

use crate::actions::ProtocolAction;
use crate::locator::ProtocolLocator;
use crate::shared_data::{SharedData, StoreError};

#[derive(Debug, Clone)]
pub struct ConsensusUpdateArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub channel_id: ChannelId,
    pub proposed_allocation: Vec<U256>,
    pub proposed_destination: Vec<Address>,
    pub cleared_to_send: bool,
}

#[derive(Debug, Clone)]
pub enum ConsensusUpdate {
    NotSafeToSend { args: ConsensusUpdateArgs },
    CommitmentSent { args: ConsensusUpdateArgs },
    Success { channel_id: ChannelId },
    Failure { channel_id: ChannelId, reason: String },
}

impl ConsensusUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn channel_id(&self) -> ChannelId {
        match self {
            Self::NotSafeToSend { args } | Self::CommitmentSent { args } => args.channel_id,
            Self::Success { channel_id } | Self::Failure { channel_id, .. } => *channel_id,
        }
    }
}

pub fn initialize(args: ConsensusUpdateArgs, shared: &mut SharedData) -> ConsensusUpdate {
    attempt(args, shared)
}

pub fn reduce(
    state: ConsensusUpdate,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> ConsensusUpdate {
    let mut args = match state {
        ConsensusUpdate::NotSafeToSend { args } | ConsensusUpdate::CommitmentSent { args } => args,
        terminal => return terminal,
    };

    match action {
        ProtocolAction::CommitmentsReceived {
            signed_commitments, ..
        } => {
            for signed in signed_commitments {
                match shared.check_and_store(signed.clone()) {
                    Ok(()) => {}
                    Err(StoreError::StaleTurnNum { .. }) => {}
                    Err(e) => {
                        return ConsensusUpdate::Failure {
                            channel_id: args.channel_id,
                            reason: e.to_string(),
                        };
                    }
                }
            }
            attempt(args, shared)
        }
        ProtocolAction::ClearedToSend { .. } => {
            args.cleared_to_send = true;
            attempt(args, shared)
        }
        _ => {
            warn!(
                process_id = action.process_id(),
                "consensus update ignored action"
            );
            attempt(args, shared)
        }
    }
}

/// Inspect the latest commitment and act: conclude success, sign our next
/// move, or keep waiting.
fn attempt(args: ConsensusUpdateArgs, shared: &mut SharedData) -> ConsensusUpdate {
    let latest = match shared.channel(&args.channel_id) {
        Ok(state) => match state.last_commitment() {
            Some(sc) => sc.commitment.clone(),
            None => {
                return ConsensusUpdate::Failure {
                    channel_id: args.channel_id,
                    reason: "channel has no commitments".to_string(),
                }
            }
        },
        Err(e) => {
            return ConsensusUpdate::Failure {
                channel_id: args.channel_id,
                reason: e.to_string(),
            }
        }
    };

    if outcome_reached(&latest, &args) {
        return ConsensusUpdate::Success {
            channel_id: args.channel_id,
        };
    }

    let our_turn = shared
        .channel(&args.channel_id)
        .map(|state| state.our_turn())
        .unwrap_or(false);
    if !(args.cleared_to_send && our_turn) {
        return ConsensusUpdate::NotSafeToSend { args };
    }

    let next = match next_move(&latest, &args) {
        Ok(Some(commitment)) => commitment,
        Ok(None) => return ConsensusUpdate::NotSafeToSend { args },
        Err(reason) => {
            return ConsensusUpdate::Failure {
                channel_id: args.channel_id,
                reason,
            }
        }
    };

    match shared.sign_and_store(next) {
        Ok(signed) => {
            debug!(
                turn_num = signed.commitment.turn_num,
                "signed consensus commitment"
            );
            if let Err(e) = shared.send_commitments(
                &args.channel_id,
                &args.process_id,
                args.protocol_locator.clone(),
            ) {
                warn!(error = %e, "failed to queue consensus commitments");
            }
        }
        Err(e) => {
            return ConsensusUpdate::Failure {
                channel_id: args.channel_id,
                reason: e.to_string(),
            }
        }
    }

    match shared.channel(&args.channel_id) {
        Ok(state)
            if state
                .last_commitment()
                .is_some_and(|sc| outcome_reached(&sc.commitment, &args)) =>
        {
            ConsensusUpdate::Success {
                channel_id: args.channel_id,
            }
        }
        _ => ConsensusUpdate::CommitmentSent { args },
    }
}

/// Our next commitment given the open state of the vote.
fn next_move(latest: &Commitment, args: &ConsensusUpdateArgs) -> Result<Option<Commitment>, String> {
    if latest.commitment_type != CommitmentType::App
        && latest.commitment_type != CommitmentType::PostFundSetup
    {
        return Err(format!(
            "consensus update cannot run from a {:?} commitment",
            latest.commitment_type
        ));
    }
    let attrs = consensus_app::attributes(latest).map_err(|e| e.to_string())?;
    match attrs.update_type {
        UpdateType::Consensus => {
            consensus_app::propose(
                latest,
                args.proposed_allocation.clone(),
                args.proposed_destination.clone(),
            )
            .map(Some)
            .map_err(|e| e.to_string())
        }
        UpdateType::Proposal => {
            if attrs.proposed_allocation != args.proposed_allocation
                || attrs.proposed_destination != args.proposed_destination
            {
                return Err("proposal does not match the agreed outcome".to_string());
            }
            consensus_app::accept_consensus(latest)
                .map(Some)
                .map_err(|e| e.to_string())
        }
    }
}

fn outcome_reached(latest: &Commitment, args: &ConsensusUpdateArgs) -> bool {
    if latest.commitment_type != CommitmentType::App {
        return false;
    }
    let Ok(attrs) = consensus_app::attributes(latest) else {
        return false;
    };
    attrs.update_type == UpdateType::Consensus
        && latest.allocation == args.proposed_allocation
        && latest.destination == args.proposed_destination
}
