//! # Advance Channel
//!
//! Collects one full round of commitments of a target kind (a pre-fund
//! round, a post-fund round, or a conclude round) from every participant:
//!
//! ```text
//! WaitForOwnCommitment -> WaitForOtherCommitments -> Success
//! ```
//!
//! An invalid peer commitment is logged and ignored, never fatal: a
//! malicious or buggy peer must not be able to halt the machine. Sending
//! can be embargoed by an enclosing protocol; `ClearedToSend` lifts it.

use shared_types::{Address, Channel, ChannelId, Commitment, CommitmentType, U256};
use tracing::{debug, warn};

use crate::actions::ProtocolAction;
use crate::locator::ProtocolLocator;
use crate::shared_data::{ChannelKind, ChannelState, SharedData, StoreError};

/// Arguments for opening a brand new channel as the first mover.
#[derive(Debug, Clone)]
pub struct NewChannelArgs {
    pub channel: Channel,
    pub allocation: Vec<U256>,
    pub destination: Vec<Address>,
    pub app_attributes: Vec<u8>,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone)]
pub struct AdvanceChannelArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    /// Unknown until the first commitment arrives when we are joining.
    pub channel_id: Option<ChannelId>,
    pub target: CommitmentType,
    pub kind: ChannelKind,
    pub cleared_to_send: bool,
}

#[derive(Debug, Clone)]
pub enum AdvanceChannel {
    WaitForOwnCommitment { args: AdvanceChannelArgs },
    WaitForOtherCommitments { args: AdvanceChannelArgs },
    Success { channel_id: ChannelId },
}

impl AdvanceChannel {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::WaitForOwnCommitment { args } | Self::WaitForOtherCommitments { args } => {
                args.channel_id
            }
            Self::Success { channel_id } => Some(*channel_id),
        }
    }
}

/// Open a new channel as participant 0: sign the first pre-fund commitment
/// and relay it.
pub fn initialize_new_channel(
    new_channel: NewChannelArgs,
    process_id: &str,
    protocol_locator: ProtocolLocator,
    shared: &mut SharedData,
) -> AdvanceChannel {
    let args = AdvanceChannelArgs {
        process_id: process_id.to_string(),
        protocol_locator,
        channel_id: Some(new_channel.channel.id()),
        target: CommitmentType::PreFundSetup,
        kind: new_channel.kind,
        cleared_to_send: true,
    };
    let first = Commitment {
        channel: new_channel.channel,
        turn_num: 0,
        commitment_count: 0,
        allocation: new_channel.allocation,
        destination: new_channel.destination,
        commitment_type: CommitmentType::PreFundSetup,
        app_attributes: new_channel.app_attributes,
    };
    let channel_id = first.channel_id();
    match shared.sign_and_initialize(first, new_channel.kind) {
        Ok(_) => {
            if let Err(e) = shared.send_commitments(
                &channel_id,
                &args.process_id,
                args.protocol_locator.clone(),
            ) {
                warn!(error = %e, "failed to queue opening commitment");
            }
        }
        Err(e) => warn!(error = %e, "failed to sign opening commitment"),
    }
    AdvanceChannel::WaitForOtherCommitments { args }
}

/// Join a channel another participant will open; the channel id is learned
/// from the first received commitment.
pub fn initialize_join(
    process_id: &str,
    protocol_locator: ProtocolLocator,
    kind: ChannelKind,
) -> AdvanceChannel {
    AdvanceChannel::WaitForOwnCommitment {
        args: AdvanceChannelArgs {
            process_id: process_id.to_string(),
            protocol_locator,
            channel_id: None,
            target: CommitmentType::PreFundSetup,
            kind,
            cleared_to_send: true,
        },
    }
}

/// Start a round of `target` commitments on an already-registered channel.
pub fn initialize_existing(
    process_id: &str,
    protocol_locator: ProtocolLocator,
    channel_id: ChannelId,
    target: CommitmentType,
    cleared_to_send: bool,
    shared: &mut SharedData,
) -> AdvanceChannel {
    let kind = shared
        .channel(&channel_id)
        .map(|state| state.kind)
        .unwrap_or(ChannelKind::Application);
    try_advance(
        AdvanceChannelArgs {
            process_id: process_id.to_string(),
            protocol_locator,
            channel_id: Some(channel_id),
            target,
            kind,
            cleared_to_send,
        },
        shared,
    )
}

pub fn reduce(
    state: AdvanceChannel,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> AdvanceChannel {
    let mut args = match state {
        AdvanceChannel::WaitForOwnCommitment { args }
        | AdvanceChannel::WaitForOtherCommitments { args } => args,
        terminal @ AdvanceChannel::Success { .. } => return terminal,
    };

    match action {
        ProtocolAction::CommitmentsReceived {
            signed_commitments, ..
        } => {
            for signed in signed_commitments {
                let incoming_id = signed.commitment.channel_id();
                if !shared.has_channel(&incoming_id) {
                    if signed.commitment.turn_num != 0 {
                        warn!("received mid-history commitment for unknown channel, ignoring");
                        continue;
                    }
                    match shared.check_and_initialize(signed.clone(), args.kind) {
                        Ok(()) => args.channel_id = Some(incoming_id),
                        Err(e) => warn!(error = %e, "invalid opening commitment ignored"),
                    }
                    continue;
                }
                match shared.check_and_store(signed.clone()) {
                    Ok(()) => {}
                    // Relays resend full histories; already-stored turns are fine.
                    Err(StoreError::StaleTurnNum { .. }) => {}
                    Err(e) => warn!(error = %e, "invalid peer commitment ignored"),
                }
            }
            try_advance(args, shared)
        }
        ProtocolAction::ClearedToSend { .. } => {
            args.cleared_to_send = true;
            try_advance(args, shared)
        }
        _ => {
            warn!(
                process_id = action.process_id(),
                "advance channel ignored action"
            );
            try_advance(args, shared)
        }
    }
}

fn try_advance(args: AdvanceChannelArgs, shared: &mut SharedData) -> AdvanceChannel {
    let Some(channel_id) = args.channel_id else {
        return AdvanceChannel::WaitForOwnCommitment { args };
    };
    let Ok(state) = shared.channel(&channel_id) else {
        return AdvanceChannel::WaitForOwnCommitment { args };
    };

    if round_complete(state, args.target) {
        return AdvanceChannel::Success { channel_id };
    }
    if !(args.cleared_to_send && state.our_turn()) {
        return AdvanceChannel::WaitForOwnCommitment { args };
    }
    let Some(next) = next_commitment(state, args.target) else {
        return AdvanceChannel::WaitForOwnCommitment { args };
    };

    match shared.sign_and_store(next) {
        Ok(signed) => {
            debug!(
                turn_num = signed.commitment.turn_num,
                "signed round commitment"
            );
            if let Err(e) =
                shared.send_commitments(&channel_id, &args.process_id, args.protocol_locator.clone())
            {
                warn!(error = %e, "failed to queue commitments");
            }
        }
        Err(e) => {
            warn!(error = %e, "could not sign round commitment");
            return AdvanceChannel::WaitForOwnCommitment { args };
        }
    }

    match shared.channel(&channel_id) {
        Ok(state) if round_complete(state, args.target) => {
            AdvanceChannel::Success { channel_id }
        }
        _ => AdvanceChannel::WaitForOtherCommitments { args },
    }
}

/// The round is done once the latest commitment of the target kind is the
/// last of its round, or the channel has already moved past that kind.
fn round_complete(state: &ChannelState, target: CommitmentType) -> bool {
    let Some(last) = state.last_commitment() else {
        return false;
    };
    let commitment = &last.commitment;
    let n = state.channel.num_participants() as u32;
    commitment.commitment_type > target
        || (commitment.commitment_type == target && commitment.commitment_count == n - 1)
}

/// Our next commitment toward the target round, if the history is ready
/// for one.
fn next_commitment(state: &ChannelState, target: CommitmentType) -> Option<Commitment> {
    let latest = &state.last_commitment()?.commitment;
    match target {
        CommitmentType::PreFundSetup | CommitmentType::PostFundSetup => {
            let next = latest.next_setup()?;
            (next.commitment_type <= target).then_some(next)
        }
        CommitmentType::Conclude => {
            let commitment_count = if latest.commitment_type == CommitmentType::Conclude {
                latest.commitment_count + 1
            } else {
                0
            };
            Some(Commitment {
                turn_num: latest.turn_num + 1,
                commitment_count,
                commitment_type: CommitmentType::Conclude,
                ..latest.clone()
            })
        }
        CommitmentType::App => None,
    }
}
