//! # Ledger Funding
//!
//! Funds an application channel out of a ledger channel instead of a
//! direct on-chain deposit. Either a fresh ledger channel is opened and
//! funded first (`NewLedgerChannel`), or an existing, sufficiently-funded
//! ledger channel is reused (`ExistingLedgerFunding`), topped up when its
//! allocation falls short. Funding completes when the ledger channel's
//! outcome allocates the application channel's total to the application
//! channel itself.

use primitive_types::U256;
use shared_types::{Address, Channel, ChannelId};
use tracing::warn;

use crate::actions::ProtocolAction;
use crate::advance_channel::{self, AdvanceChannel, NewChannelArgs};
use crate::consensus_update::{self, ConsensusUpdate, ConsensusUpdateArgs};
use crate::direct_funding::{self, DirectFunding, DirectFundingArgs};
use crate::ledger_top_up::{self, LedgerTopUp};
use crate::locator::{ProtocolLocator, ProtocolTag};
use crate::shared_data::{ChannelKind, FundingSource, SharedData};
use fm_validator::ConsensusAppAttributes;
use shared_types::CommitmentType;

/// The address a ledger outcome uses to allocate funds to another channel:
/// the first 20 bytes of that channel's id.
pub fn funding_address(channel_id: &ChannelId) -> Address {
    let mut address = [0u8; 20];
    address.copy_from_slice(&channel_id[..20]);
    address
}

// ---------------------------------------------------------------------------
// New ledger channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewLedgerChannelArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub app_channel_id: ChannelId,
    /// Rules contract address the fresh ledger channel runs.
    pub ledger_channel_type: Address,
    /// Nonce chosen by the opening participant; joiners learn the channel
    /// from the first commitment instead.
    pub nonce: U256,
}

#[derive(Debug, Clone)]
pub enum NewLedgerChannel {
    WaitForPreFundSetup {
        args: NewLedgerChannelArgs,
        advance: AdvanceChannel,
    },
    WaitForDirectFunding {
        args: NewLedgerChannelArgs,
        funding: DirectFunding,
    },
    WaitForPostFundSetup {
        args: NewLedgerChannelArgs,
        advance: AdvanceChannel,
    },
    Success {
        ledger_channel_id: ChannelId,
    },
    Failure {
        reason: String,
    },
}

impl NewLedgerChannel {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }
}

pub fn initialize_new_ledger_channel(
    args: NewLedgerChannelArgs,
    shared: &mut SharedData,
) -> NewLedgerChannel {
    let app = match shared.channel(&args.app_channel_id) {
        Ok(state) => state,
        Err(e) => return NewLedgerChannel::Failure { reason: e.to_string() },
    };
    let participants = app.channel.participants.clone();
    let allocation = app
        .last_commitment()
        .map(|sc| sc.commitment.allocation.clone())
        .unwrap_or_default();
    let our_index = app.our_index;

    let advance = if our_index == 0 {
        let channel = match Channel::new(args.ledger_channel_type, args.nonce, participants.clone())
        {
            Ok(channel) => channel,
            Err(e) => return NewLedgerChannel::Failure { reason: e.to_string() },
        };
        advance_channel::initialize_new_channel(
            NewChannelArgs {
                channel,
                allocation,
                destination: participants,
                app_attributes: ConsensusAppAttributes::consensus().encode(),
                kind: ChannelKind::Ledger,
            },
            &args.process_id,
            args.protocol_locator.child(ProtocolTag::AdvanceChannel),
            shared,
        )
    } else {
        advance_channel::initialize_join(
            &args.process_id,
            args.protocol_locator.child(ProtocolTag::AdvanceChannel),
            ChannelKind::Ledger,
        )
    };
    after_prefund(args, advance, shared)
}

pub fn reduce_new_ledger_channel(
    state: NewLedgerChannel,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> NewLedgerChannel {
    match state {
        NewLedgerChannel::WaitForPreFundSetup { args, advance } => {
            let advance = advance_channel::reduce(advance, shared, action);
            after_prefund(args, advance, shared)
        }
        NewLedgerChannel::WaitForDirectFunding { args, funding } => {
            let funding = direct_funding::reduce(funding, shared, action);
            after_funding(args, funding, shared)
        }
        NewLedgerChannel::WaitForPostFundSetup { args, advance } => {
            let advance = advance_channel::reduce(advance, shared, action);
            after_postfund(args, advance)
        }
        terminal => terminal,
    }
}

fn after_prefund(
    args: NewLedgerChannelArgs,
    advance: AdvanceChannel,
    shared: &mut SharedData,
) -> NewLedgerChannel {
    if !advance.is_terminal() {
        return NewLedgerChannel::WaitForPreFundSetup { args, advance };
    }
    let Some(ledger_channel_id) = advance.channel_id() else {
        return NewLedgerChannel::Failure {
            reason: "pre-fund round finished without a channel".to_string(),
        };
    };
    let funding = match deposit_args(&args, ledger_channel_id, shared) {
        Ok(funding_args) => direct_funding::initialize(funding_args, shared),
        Err(reason) => return NewLedgerChannel::Failure { reason },
    };
    after_funding(args, funding, shared)
}

fn after_funding(
    args: NewLedgerChannelArgs,
    funding: DirectFunding,
    shared: &mut SharedData,
) -> NewLedgerChannel {
    let ledger_channel_id = funding.channel_id();
    if funding.is_success() {
        let advance = advance_channel::initialize_existing(
            &args.process_id,
            args.protocol_locator.child(ProtocolTag::AdvanceChannel),
            ledger_channel_id,
            CommitmentType::PostFundSetup,
            true,
            shared,
        );
        after_postfund(args, advance)
    } else if funding.is_terminal() {
        NewLedgerChannel::Failure {
            reason: "ledger channel deposit failed".to_string(),
        }
    } else {
        NewLedgerChannel::WaitForDirectFunding { args, funding }
    }
}

fn after_postfund(args: NewLedgerChannelArgs, advance: AdvanceChannel) -> NewLedgerChannel {
    if advance.is_terminal() {
        match advance.channel_id() {
            Some(ledger_channel_id) => NewLedgerChannel::Success { ledger_channel_id },
            None => NewLedgerChannel::Failure {
                reason: "post-fund round finished without a channel".to_string(),
            },
        }
    } else {
        NewLedgerChannel::WaitForPostFundSetup { args, advance }
    }
}

/// Our deposit into the fresh ledger channel: our slot of its allocation,
/// safe once everyone ahead of us has deposited theirs.
fn deposit_args(
    args: &NewLedgerChannelArgs,
    ledger_channel_id: ChannelId,
    shared: &SharedData,
) -> Result<DirectFundingArgs, String> {
    let ledger = shared
        .channel(&ledger_channel_id)
        .map_err(|e| e.to_string())?;
    let allocation = ledger
        .last_commitment()
        .map(|sc| sc.commitment.allocation.clone())
        .ok_or_else(|| "ledger channel has no commitments".to_string())?;
    let our_index = ledger.our_index;
    let total: U256 = allocation
        .iter()
        .fold(U256::zero(), |acc, a| acc.saturating_add(*a));
    let safe_to_deposit_level = allocation[..our_index]
        .iter()
        .fold(U256::zero(), |acc, a| acc.saturating_add(*a));
    Ok(DirectFundingArgs {
        process_id: args.process_id.clone(),
        protocol_locator: args.protocol_locator.child(ProtocolTag::DirectFunding),
        channel_id: ledger_channel_id,
        required_deposit: allocation[our_index],
        total_funding_required: total,
        safe_to_deposit_level,
    })
}

// ---------------------------------------------------------------------------
// Existing ledger funding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExistingLedgerFundingArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub app_channel_id: ChannelId,
    pub ledger_channel_id: ChannelId,
}

#[derive(Debug, Clone)]
pub enum ExistingLedgerFunding {
    WaitForLedgerTopUp {
        args: ExistingLedgerFundingArgs,
        top_up: LedgerTopUp,
    },
    WaitForLedgerUpdate {
        args: ExistingLedgerFundingArgs,
        consensus: ConsensusUpdate,
    },
    Success {
        app_channel_id: ChannelId,
        ledger_channel_id: ChannelId,
    },
    Failure {
        reason: String,
    },
}

impl ExistingLedgerFunding {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }
}

/// Contributions the application channel expects from each participant,
/// read from its latest allocation in participant order.
fn app_contributions(
    app_channel_id: &ChannelId,
    shared: &SharedData,
) -> Result<(Vec<U256>, Vec<Address>), String> {
    let app = shared.channel(app_channel_id).map_err(|e| e.to_string())?;
    let latest = app
        .last_commitment()
        .ok_or_else(|| "application channel has no commitments".to_string())?;
    Ok((
        latest.commitment.allocation.clone(),
        app.channel.participants.clone(),
    ))
}

pub fn initialize_existing_ledger_funding(
    args: ExistingLedgerFundingArgs,
    shared: &mut SharedData,
) -> ExistingLedgerFunding {
    let (contributions, participants) = match app_contributions(&args.app_channel_id, shared) {
        Ok(v) => v,
        Err(reason) => return ExistingLedgerFunding::Failure { reason },
    };
    let ledger_allocation = match shared.channel(&args.ledger_channel_id) {
        Ok(state) => state
            .last_commitment()
            .map(|sc| sc.commitment.allocation.clone())
            .unwrap_or_default(),
        Err(e) => return ExistingLedgerFunding::Failure { reason: e.to_string() },
    };
    if ledger_allocation.len() != contributions.len() {
        return ExistingLedgerFunding::Failure {
            reason: "ledger and application outcomes have different shapes".to_string(),
        };
    }

    let needs_top_up = ledger_allocation
        .iter()
        .zip(&contributions)
        .any(|(held, needed)| held < needed);
    if needs_top_up {
        let target: Vec<U256> = ledger_allocation
            .iter()
            .zip(&contributions)
            .map(|(held, needed)| (*held).max(*needed))
            .collect();
        let top_up = ledger_top_up::initialize(
            &args.process_id,
            args.protocol_locator.child(ProtocolTag::LedgerTopUp),
            args.ledger_channel_id,
            target,
            participants,
            shared,
        );
        after_top_up(args, top_up, shared)
    } else {
        let consensus = start_ledger_update(&args, shared);
        after_ledger_update(args, consensus, shared)
    }
}

pub fn reduce_existing_ledger_funding(
    state: ExistingLedgerFunding,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> ExistingLedgerFunding {
    match state {
        ExistingLedgerFunding::WaitForLedgerTopUp { args, top_up } => {
            let top_up = ledger_top_up::reduce(top_up, shared, action);
            after_top_up(args, top_up, shared)
        }
        ExistingLedgerFunding::WaitForLedgerUpdate { args, consensus } => {
            let consensus = consensus_update::reduce(consensus, shared, action);
            after_ledger_update(args, consensus, shared)
        }
        terminal => terminal,
    }
}

fn after_top_up(
    args: ExistingLedgerFundingArgs,
    top_up: LedgerTopUp,
    shared: &mut SharedData,
) -> ExistingLedgerFunding {
    if top_up.is_success() {
        let consensus = start_ledger_update(&args, shared);
        after_ledger_update(args, consensus, shared)
    } else if top_up.is_terminal() {
        ExistingLedgerFunding::Failure {
            reason: "ledger top-up failed".to_string(),
        }
    } else {
        ExistingLedgerFunding::WaitForLedgerTopUp { args, top_up }
    }
}

/// Consensus update moving the application channel's total into a slot
/// owned by the application channel itself.
fn start_ledger_update(
    args: &ExistingLedgerFundingArgs,
    shared: &mut SharedData,
) -> ConsensusUpdate {
    let (contributions, participants) = match app_contributions(&args.app_channel_id, shared) {
        Ok(v) => v,
        Err(reason) => {
            return ConsensusUpdate::Failure {
                channel_id: args.ledger_channel_id,
                reason,
            }
        }
    };
    let ledger_allocation = shared
        .channel(&args.ledger_channel_id)
        .ok()
        .and_then(|state| state.last_commitment().map(|sc| sc.commitment.allocation.clone()))
        .unwrap_or_default();
    let app_total: U256 = contributions
        .iter()
        .fold(U256::zero(), |acc, a| acc.saturating_add(*a));

    let mut proposed_allocation: Vec<U256> = ledger_allocation
        .iter()
        .zip(&contributions)
        .map(|(held, needed)| held.saturating_sub(*needed))
        .collect();
    let mut proposed_destination = participants;
    proposed_allocation.push(app_total);
    proposed_destination.push(funding_address(&args.app_channel_id));

    consensus_update::initialize(
        ConsensusUpdateArgs {
            process_id: args.process_id.clone(),
            protocol_locator: args.protocol_locator.child(ProtocolTag::ConsensusUpdate),
            channel_id: args.ledger_channel_id,
            proposed_allocation,
            proposed_destination,
            cleared_to_send: true,
        },
        shared,
    )
}

fn after_ledger_update(
    args: ExistingLedgerFundingArgs,
    consensus: ConsensusUpdate,
    shared: &mut SharedData,
) -> ExistingLedgerFunding {
    if consensus.is_success() {
        shared.set_funding_source(
            args.app_channel_id,
            FundingSource::Ledger(args.ledger_channel_id),
        );
        ExistingLedgerFunding::Success {
            app_channel_id: args.app_channel_id,
            ledger_channel_id: args.ledger_channel_id,
        }
    } else if consensus.is_terminal() {
        ExistingLedgerFunding::Failure {
            reason: "ledger reallocation was not agreed".to_string(),
        }
    } else {
        ExistingLedgerFunding::WaitForLedgerUpdate { args, consensus }
    }
}

// ---------------------------------------------------------------------------
// Top-level ledger funding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LedgerFundingArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub app_channel_id: ChannelId,
    /// Reuse this ledger channel when set; open a fresh one otherwise.
    pub existing_ledger_channel: Option<ChannelId>,
    pub ledger_channel_type: Address,
    pub nonce: U256,
}

#[derive(Debug, Clone)]
pub enum LedgerFunding {
    WaitForNewLedgerChannel {
        args: LedgerFundingArgs,
        inner: NewLedgerChannel,
    },
    WaitForExistingLedgerFunding {
        args: LedgerFundingArgs,
        inner: ExistingLedgerFunding,
    },
    Success {
        app_channel_id: ChannelId,
        ledger_channel_id: ChannelId,
    },
    Failure {
        app_channel_id: ChannelId,
        reason: String,
    },
}

impl LedgerFunding {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn initialize(args: LedgerFundingArgs, shared: &mut SharedData) -> LedgerFunding {
    match args.existing_ledger_channel {
        Some(ledger_channel_id) => {
            let inner = initialize_existing_ledger_funding(
                ExistingLedgerFundingArgs {
                    process_id: args.process_id.clone(),
                    protocol_locator: args
                        .protocol_locator
                        .child(ProtocolTag::ExistingLedgerFunding),
                    app_channel_id: args.app_channel_id,
                    ledger_channel_id,
                },
                shared,
            );
            after_existing(args, inner)
        }
        None => {
            let inner = initialize_new_ledger_channel(
                NewLedgerChannelArgs {
                    process_id: args.process_id.clone(),
                    protocol_locator: args.protocol_locator.child(ProtocolTag::NewLedgerChannel),
                    app_channel_id: args.app_channel_id,
                    ledger_channel_type: args.ledger_channel_type,
                    nonce: args.nonce,
                },
                shared,
            );
            after_new(args, inner, shared)
        }
    }
}

pub fn reduce(
    state: LedgerFunding,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> LedgerFunding {
    match state {
        LedgerFunding::WaitForNewLedgerChannel { args, inner } => {
            if !routes_to_child(action, &args.protocol_locator, ProtocolTag::NewLedgerChannel) {
                warn!(
                    process_id = action.process_id(),
                    "ledger funding dropped mis-routed action"
                );
                return LedgerFunding::WaitForNewLedgerChannel { args, inner };
            }
            let inner = reduce_new_ledger_channel(inner, shared, action);
            after_new(args, inner, shared)
        }
        LedgerFunding::WaitForExistingLedgerFunding { args, inner } => {
            if !routes_to_child(
                action,
                &args.protocol_locator,
                ProtocolTag::ExistingLedgerFunding,
            ) {
                warn!(
                    process_id = action.process_id(),
                    "ledger funding dropped mis-routed action"
                );
                return LedgerFunding::WaitForExistingLedgerFunding { args, inner };
            }
            let inner = reduce_existing_ledger_funding(inner, shared, action);
            after_existing(args, inner)
        }
        terminal => terminal,
    }
}

/// Locator-carrying actions must address the active child's subtree;
/// actions without a locator (chain events, transaction lifecycle, user
/// decisions) are matched by type inside the child.
fn routes_to_child(action: &ProtocolAction, instance: &ProtocolLocator, tag: ProtocolTag) -> bool {
    match action.locator() {
        Some(locator) => locator.routes_to(instance, tag),
        None => true,
    }
}

fn after_new(
    args: LedgerFundingArgs,
    inner: NewLedgerChannel,
    shared: &mut SharedData,
) -> LedgerFunding {
    match inner {
        NewLedgerChannel::Success { ledger_channel_id } => {
            let inner = initialize_existing_ledger_funding(
                ExistingLedgerFundingArgs {
                    process_id: args.process_id.clone(),
                    protocol_locator: args
                        .protocol_locator
                        .child(ProtocolTag::ExistingLedgerFunding),
                    app_channel_id: args.app_channel_id,
                    ledger_channel_id,
                },
                shared,
            );
            after_existing(args, inner)
        }
        NewLedgerChannel::Failure { reason } => LedgerFunding::Failure {
            app_channel_id: args.app_channel_id,
            reason,
        },
        inner => LedgerFunding::WaitForNewLedgerChannel { args, inner },
    }
}

fn after_existing(args: LedgerFundingArgs, inner: ExistingLedgerFunding) -> LedgerFunding {
    match inner {
        ExistingLedgerFunding::Success {
            app_channel_id,
            ledger_channel_id,
        } => LedgerFunding::Success {
            app_channel_id,
            ledger_channel_id,
        },
        ExistingLedgerFunding::Failure { reason } => LedgerFunding::Failure {
            app_channel_id: args.app_channel_id,
            reason,
        },
        inner => LedgerFunding::WaitForExistingLedgerFunding { args, inner },
    }
}
