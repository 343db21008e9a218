//! # Ledger Defunding
//!
//! Unwinds ledger funding once an application channel has concluded: a
//! consensus update removes the application channel's slot from the
//! ledger outcome and pays each participant their final application
//! balance back into their own slot.

use primitive_types::U256;
use shared_types::{Address, ChannelId};

use crate::actions::ProtocolAction;
use crate::consensus_update::{self, ConsensusUpdate, ConsensusUpdateArgs};
use crate::ledger_funding::funding_address;
use crate::locator::{ProtocolLocator, ProtocolTag};
use crate::shared_data::SharedData;

#[derive(Debug, Clone)]
pub struct LedgerDefundingArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub app_channel_id: ChannelId,
    pub ledger_channel_id: ChannelId,
}

#[derive(Debug, Clone)]
pub enum LedgerDefunding {
    WaitForLedgerDefunding {
        args: LedgerDefundingArgs,
        consensus: ConsensusUpdate,
    },
    Success {
        app_channel_id: ChannelId,
    },
    Failure {
        app_channel_id: ChannelId,
        reason: String,
    },
}

impl LedgerDefunding {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn initialize(args: LedgerDefundingArgs, shared: &mut SharedData) -> LedgerDefunding {
    let (proposed_allocation, proposed_destination) = match defunded_outcome(&args, shared) {
        Ok(outcome) => outcome,
        Err(reason) => {
            return LedgerDefunding::Failure {
                app_channel_id: args.app_channel_id,
                reason,
            }
        }
    };
    let consensus = consensus_update::initialize(
        ConsensusUpdateArgs {
            process_id: args.process_id.clone(),
            protocol_locator: args.protocol_locator.child(ProtocolTag::ConsensusUpdate),
            channel_id: args.ledger_channel_id,
            proposed_allocation,
            proposed_destination,
            cleared_to_send: true,
        },
        shared,
    );
    after_consensus(args, consensus, shared)
}

pub fn reduce(
    state: LedgerDefunding,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> LedgerDefunding {
    match state {
        LedgerDefunding::WaitForLedgerDefunding { args, consensus } => {
            let consensus = consensus_update::reduce(consensus, shared, action);
            after_consensus(args, consensus, shared)
        }
        terminal => terminal,
    }
}

fn after_consensus(
    args: LedgerDefundingArgs,
    consensus: ConsensusUpdate,
    shared: &mut SharedData,
) -> LedgerDefunding {
    if consensus.is_success() {
        shared.clear_funding_source(&args.app_channel_id);
        LedgerDefunding::Success {
            app_channel_id: args.app_channel_id,
        }
    } else if consensus.is_terminal() {
        LedgerDefunding::Failure {
            app_channel_id: args.app_channel_id,
            reason: "ledger defunding was not agreed".to_string(),
        }
    } else {
        LedgerDefunding::WaitForLedgerDefunding { args, consensus }
    }
}

/// The ledger outcome with the application channel's slot folded back
/// into the participants' slots, split per the application channel's
/// final allocation.
fn defunded_outcome(
    args: &LedgerDefundingArgs,
    shared: &SharedData,
) -> Result<(Vec<U256>, Vec<Address>), String> {
    let app = shared
        .channel(&args.app_channel_id)
        .map_err(|e| e.to_string())?;
    let app_latest = app
        .last_commitment()
        .ok_or_else(|| "application channel has no commitments".to_string())?;
    let final_allocation = app_latest.commitment.allocation.clone();
    let participants = app.channel.participants.clone();

    let ledger = shared
        .channel(&args.ledger_channel_id)
        .map_err(|e| e.to_string())?;
    let ledger_latest = ledger
        .last_commitment()
        .ok_or_else(|| "ledger channel has no commitments".to_string())?;
    let slot = funding_address(&args.app_channel_id);

    let mut allocation = Vec::new();
    let mut destination = Vec::new();
    let mut found_slot = false;
    for (amount, dest) in ledger_latest
        .commitment
        .allocation
        .iter()
        .zip(&ledger_latest.commitment.destination)
    {
        if *dest == slot {
            found_slot = true;
            continue;
        }
        let refund = participants
            .iter()
            .position(|p| p == dest)
            .and_then(|i| final_allocation.get(i))
            .copied()
            .unwrap_or_default();
        allocation.push(amount.saturating_add(refund));
        destination.push(*dest);
    }
    if !found_slot {
        return Err("ledger outcome does not fund the application channel".to_string());
    }
    Ok((allocation, destination))
}
