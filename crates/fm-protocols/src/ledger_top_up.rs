//! # Ledger Top-Up
//!
//! Raises a ledger channel's on-chain funding to cover a larger
//! allocation, one participant at a time:
//!
//! ```text
//! SwitchOrderAndProposeATopUp -> WaitForDirectFundingForA
//!        -> RestoreOrderAndProposeBTopUp -> WaitForDirectFundingForB -> Success
//! ```
//!
//! Before a participant deposits their top-up, the channel's outcome is
//! reordered so their allocation sits last, keeping the deposit safe if
//! the channel were adjudicated mid-round. A participant whose current
//! allocation already covers the proposed one skips their rounds
//! entirely.

use primitive_types::U256;
use shared_types::{Address, ChannelId};
use tracing::warn;

use crate::actions::ProtocolAction;
use crate::consensus_update::{self, ConsensusUpdate, ConsensusUpdateArgs};
use crate::direct_funding::{self, DirectFunding, DirectFundingArgs};
use crate::locator::{ProtocolLocator, ProtocolTag};
use crate::shared_data::SharedData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerTopUpFailureReason {
    ConsensusUpdateFailure,
    DirectFundingFailure,
    /// The ledger outcome is not the two-slot shape the round order assumes.
    UnsupportedOutcomeShape,
}

#[derive(Debug, Clone)]
pub struct LedgerTopUpArgs {
    pub process_id: String,
    pub protocol_locator: ProtocolLocator,
    pub channel_id: ChannelId,
    pub proposed_allocation: Vec<U256>,
    pub proposed_destination: Vec<Address>,
    /// Allocation at the moment the top-up started.
    pub original_allocation: Vec<U256>,
}

#[derive(Debug, Clone)]
pub enum LedgerTopUp {
    SwitchOrderAndProposeATopUp {
        args: LedgerTopUpArgs,
        consensus: ConsensusUpdate,
    },
    WaitForDirectFundingForA {
        args: LedgerTopUpArgs,
        funding: DirectFunding,
    },
    RestoreOrderAndProposeBTopUp {
        args: LedgerTopUpArgs,
        consensus: ConsensusUpdate,
    },
    WaitForDirectFundingForB {
        args: LedgerTopUpArgs,
        funding: DirectFunding,
    },
    Success {
        channel_id: ChannelId,
    },
    Failure {
        channel_id: ChannelId,
        reason: LedgerTopUpFailureReason,
    },
}

impl LedgerTopUp {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub fn initialize(
    process_id: &str,
    protocol_locator: ProtocolLocator,
    channel_id: ChannelId,
    proposed_allocation: Vec<U256>,
    proposed_destination: Vec<Address>,
    shared: &mut SharedData,
) -> LedgerTopUp {
    let original_allocation = match shared.channel(&channel_id) {
        Ok(state) => state
            .last_commitment()
            .map(|sc| sc.commitment.allocation.clone())
            .unwrap_or_default(),
        Err(_) => {
            return LedgerTopUp::Failure {
                channel_id,
                reason: LedgerTopUpFailureReason::ConsensusUpdateFailure,
            }
        }
    };
    // Deficit math and outcome reordering index slots 0 and 1 directly.
    if proposed_allocation.len() != 2
        || proposed_destination.len() != 2
        || original_allocation.len() != 2
    {
        warn!(
            process_id,
            slots = original_allocation.len(),
            "ledger top-up needs a two-slot outcome"
        );
        return LedgerTopUp::Failure {
            channel_id,
            reason: LedgerTopUpFailureReason::UnsupportedOutcomeShape,
        };
    }
    let args = LedgerTopUpArgs {
        process_id: process_id.to_string(),
        protocol_locator,
        channel_id,
        proposed_allocation,
        proposed_destination,
        original_allocation,
    };
    start_a_phase(args, shared)
}

pub fn reduce(state: LedgerTopUp, shared: &mut SharedData, action: &ProtocolAction) -> LedgerTopUp {
    match state {
        LedgerTopUp::SwitchOrderAndProposeATopUp { args, consensus } => {
            let consensus = consensus_update::reduce(consensus, shared, action);
            after_a_consensus(args, consensus, shared)
        }
        LedgerTopUp::WaitForDirectFundingForA { args, funding } => {
            let funding = direct_funding::reduce(funding, shared, action);
            after_a_funding(args, funding, shared)
        }
        LedgerTopUp::RestoreOrderAndProposeBTopUp { args, consensus } => {
            let consensus = consensus_update::reduce(consensus, shared, action);
            after_b_consensus(args, consensus, shared)
        }
        LedgerTopUp::WaitForDirectFundingForB { args, funding } => {
            let funding = direct_funding::reduce(funding, shared, action);
            after_b_funding(args, funding)
        }
        terminal => {
            warn!(
                process_id = action.process_id(),
                "ledger top-up ignored action in terminal state"
            );
            terminal
        }
    }
}

fn a_deficit(args: &LedgerTopUpArgs) -> U256 {
    args.proposed_allocation[0].saturating_sub(args.original_allocation[0])
}

fn b_deficit(args: &LedgerTopUpArgs) -> U256 {
    args.proposed_allocation[1].saturating_sub(args.original_allocation[1])
}

/// Intermediate outcome for A's round: B first, A's topped-up slot last.
fn switch_order_and_add_a_top_up(args: &LedgerTopUpArgs) -> (Vec<U256>, Vec<Address>) {
    (
        vec![args.original_allocation[1], args.proposed_allocation[0]],
        vec![
            args.proposed_destination[1],
            args.proposed_destination[0],
        ],
    )
}

/// Final outcome for B's round: original order, both slots topped up.
fn restore_order_and_add_b_top_up(args: &LedgerTopUpArgs) -> (Vec<U256>, Vec<Address>) {
    (
        args.proposed_allocation.clone(),
        args.proposed_destination.clone(),
    )
}

fn start_a_phase(args: LedgerTopUpArgs, shared: &mut SharedData) -> LedgerTopUp {
    if a_deficit(&args).is_zero() {
        return start_b_phase(args, shared);
    }
    let (allocation, destination) = switch_order_and_add_a_top_up(&args);
    let consensus = consensus_update::initialize(
        ConsensusUpdateArgs {
            process_id: args.process_id.clone(),
            protocol_locator: args.protocol_locator.child(ProtocolTag::ConsensusUpdate),
            channel_id: args.channel_id,
            proposed_allocation: allocation,
            proposed_destination: destination,
            cleared_to_send: true,
        },
        shared,
    );
    after_a_consensus(args, consensus, shared)
}

fn after_a_consensus(
    args: LedgerTopUpArgs,
    consensus: ConsensusUpdate,
    shared: &mut SharedData,
) -> LedgerTopUp {
    if consensus.is_success() {
        let funding = start_funding(&args, a_deficit(&args), 0, shared);
        after_a_funding(args, funding, shared)
    } else if consensus.is_terminal() {
        LedgerTopUp::Failure {
            channel_id: args.channel_id,
            reason: LedgerTopUpFailureReason::ConsensusUpdateFailure,
        }
    } else {
        LedgerTopUp::SwitchOrderAndProposeATopUp { args, consensus }
    }
}

fn after_a_funding(
    args: LedgerTopUpArgs,
    funding: DirectFunding,
    shared: &mut SharedData,
) -> LedgerTopUp {
    if funding.is_success() {
        start_b_phase(args, shared)
    } else if funding.is_terminal() {
        LedgerTopUp::Failure {
            channel_id: args.channel_id,
            reason: LedgerTopUpFailureReason::DirectFundingFailure,
        }
    } else {
        LedgerTopUp::WaitForDirectFundingForA { args, funding }
    }
}

fn start_b_phase(args: LedgerTopUpArgs, shared: &mut SharedData) -> LedgerTopUp {
    if b_deficit(&args).is_zero() {
        return LedgerTopUp::Success {
            channel_id: args.channel_id,
        };
    }
    let (allocation, destination) = restore_order_and_add_b_top_up(&args);
    let consensus = consensus_update::initialize(
        ConsensusUpdateArgs {
            process_id: args.process_id.clone(),
            protocol_locator: args.protocol_locator.child(ProtocolTag::ConsensusUpdate),
            channel_id: args.channel_id,
            proposed_allocation: allocation,
            proposed_destination: destination,
            cleared_to_send: true,
        },
        shared,
    );
    after_b_consensus(args, consensus, shared)
}

fn after_b_consensus(
    args: LedgerTopUpArgs,
    consensus: ConsensusUpdate,
    shared: &mut SharedData,
) -> LedgerTopUp {
    if consensus.is_success() {
        let funding = start_funding(&args, b_deficit(&args), 1, shared);
        after_b_funding(args, funding)
    } else if consensus.is_terminal() {
        LedgerTopUp::Failure {
            channel_id: args.channel_id,
            reason: LedgerTopUpFailureReason::ConsensusUpdateFailure,
        }
    } else {
        LedgerTopUp::RestoreOrderAndProposeBTopUp { args, consensus }
    }
}

fn after_b_funding(args: LedgerTopUpArgs, funding: DirectFunding) -> LedgerTopUp {
    if funding.is_success() {
        LedgerTopUp::Success {
            channel_id: args.channel_id,
        }
    } else if funding.is_terminal() {
        LedgerTopUp::Failure {
            channel_id: args.channel_id,
            reason: LedgerTopUpFailureReason::DirectFundingFailure,
        }
    } else {
        LedgerTopUp::WaitForDirectFundingForB { args, funding }
    }
}

/// Direct funding round where participant `depositor` adds `deficit` on
/// top of the current holdings.
fn start_funding(
    args: &LedgerTopUpArgs,
    deficit: U256,
    depositor: usize,
    shared: &mut SharedData,
) -> DirectFunding {
    let base = shared.holdings(&args.channel_id);
    let our_index = shared
        .channel(&args.channel_id)
        .map(|state| state.our_index)
        .unwrap_or(usize::MAX);
    let required_deposit = if our_index == depositor {
        deficit
    } else {
        U256::zero()
    };
    direct_funding::initialize(
        DirectFundingArgs {
            process_id: args.process_id.clone(),
            protocol_locator: args.protocol_locator.child(ProtocolTag::DirectFunding),
            channel_id: args.channel_id,
            required_deposit,
            total_funding_required: base.saturating_add(deficit),
            safe_to_deposit_level: base,
        },
        shared,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::MessagePayload;
    use crate::shared_data::ChannelKind;
    use fm_validator::ConsensusAppAttributes;
    use shared_crypto::PrivateKey;
    use shared_types::{Channel, Commitment, CommitmentType};

    fn create_funded_ledger_pair(
        allocation: [u64; 2],
    ) -> (SharedData, SharedData, ChannelId, Vec<Address>) {
        let key_a = PrivateKey::from_bytes([1u8; 32]).unwrap();
        let key_b = PrivateKey::from_bytes([2u8; 32]).unwrap();
        let channel = Channel::new(
            [0xaa; 20],
            U256::from(41),
            vec![key_a.address(), key_b.address()],
        )
        .unwrap();
        let participants = channel.participants.clone();
        let mut shared_a = SharedData::new(key_a);
        let mut shared_b = SharedData::new(key_b);

        let mut commitment = Commitment {
            channel: channel.clone(),
            turn_num: 0,
            commitment_count: 0,
            allocation: vec![U256::from(allocation[0]), U256::from(allocation[1])],
            destination: participants.clone(),
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: ConsensusAppAttributes::consensus().encode(),
        };
        let signed = shared_a
            .sign_and_initialize(commitment.clone(), ChannelKind::Ledger)
            .unwrap();
        shared_b
            .check_and_initialize(signed, ChannelKind::Ledger)
            .unwrap();
        for (turn, count, kind, ours) in [
            (1u64, 1u32, CommitmentType::PreFundSetup, false),
            (2, 0, CommitmentType::PostFundSetup, true),
            (3, 1, CommitmentType::PostFundSetup, false),
        ] {
            commitment = Commitment {
                turn_num: turn,
                commitment_count: count,
                commitment_type: kind,
                ..commitment.clone()
            };
            if ours {
                let signed = shared_a.sign_and_store(commitment.clone()).unwrap();
                shared_b.check_and_store(signed).unwrap();
            } else {
                let signed = shared_b.sign_and_store(commitment.clone()).unwrap();
                shared_a.check_and_store(signed).unwrap();
            }
        }
        let total = U256::from(allocation[0] + allocation[1]);
        let channel_id = channel.id();
        shared_a.set_holdings(&channel_id, total).unwrap();
        shared_b.set_holdings(&channel_id, total).unwrap();
        (shared_a, shared_b, channel_id, participants)
    }

    fn locator() -> ProtocolLocator {
        ProtocolLocator::new(vec![ProtocolTag::LedgerTopUp])
    }

    fn relay(from: &mut SharedData, to_state: LedgerTopUp, to: &mut SharedData) -> LedgerTopUp {
        let mut state = to_state;
        for message in from.outbox.take_messages() {
            if let MessagePayload::Commitments {
                protocol_locator,
                signed_commitments,
            } = message.payload
            {
                state = reduce(
                    state,
                    to,
                    &ProtocolAction::CommitmentsReceived {
                        process_id: message.process_id,
                        protocol_locator,
                        signed_commitments,
                    },
                );
            }
        }
        state
    }

    fn deposited(channel_id: ChannelId, total: u64) -> ProtocolAction {
        ProtocolAction::DepositedEvent {
            process_id: "topup-1".into(),
            protocol_locator: locator().child(ProtocolTag::DirectFunding),
            channel_id,
            amount: U256::zero(),
            total_holdings: U256::from(total),
        }
    }

    #[test]
    fn test_sufficiently_funded_a_skips_straight_to_b_round() {
        // A's current 6 >= proposed 4: A's consensus and funding rounds are
        // skipped, the first proposal on the wire is already B's round.
        let (mut shared_a, shared_b, channel_id, participants) =
            create_funded_ledger_pair([6, 4]);
        let state_a = initialize(
            "topup-1",
            locator(),
            channel_id,
            vec![U256::from(4), U256::from(7)],
            participants,
            &mut shared_a,
        );
        assert!(matches!(
            state_a,
            LedgerTopUp::RestoreOrderAndProposeBTopUp { .. }
        ));
        drop(shared_b);
    }

    #[test]
    fn test_no_deficits_is_immediate_success() {
        let (mut shared_a, _, channel_id, participants) = create_funded_ledger_pair([6, 4]);
        let state = initialize(
            "topup-1",
            locator(),
            channel_id,
            vec![U256::from(5), U256::from(4)],
            participants,
            &mut shared_a,
        );
        assert!(state.is_success());
    }

    #[test]
    fn test_one_slot_outcome_fails_without_panicking() {
        // A counterparty can hand us a ledger channel whose outcome has a
        // single slot; the top-up must refuse it rather than index past it.
        let key_a = PrivateKey::from_bytes([1u8; 32]).unwrap();
        let key_b = PrivateKey::from_bytes([2u8; 32]).unwrap();
        let channel = Channel::new(
            [0xaa; 20],
            U256::from(43),
            vec![key_a.address(), key_b.address()],
        )
        .unwrap();
        let mut shared = SharedData::new(key_a);
        let commitment = Commitment {
            channel: channel.clone(),
            turn_num: 0,
            commitment_count: 0,
            allocation: vec![U256::from(3)],
            destination: vec![channel.participants[0]],
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: ConsensusAppAttributes::consensus().encode(),
        };
        shared
            .sign_and_initialize(commitment, ChannelKind::Ledger)
            .unwrap();

        let state = initialize(
            "topup-1",
            locator(),
            channel.id(),
            vec![U256::from(9)],
            vec![channel.participants[0]],
            &mut shared,
        );
        assert!(matches!(
            state,
            LedgerTopUp::Failure {
                reason: LedgerTopUpFailureReason::UnsupportedOutcomeShape,
                ..
            }
        ));
    }

    #[test]
    fn test_full_top_up_both_sides() {
        let (mut shared_a, mut shared_b, channel_id, participants) =
            create_funded_ledger_pair([6, 4]);
        let proposed = vec![U256::from(8), U256::from(5)];

        // A proposes the switched-order outcome for their own top-up.
        let state_a = initialize(
            "topup-1",
            locator(),
            channel_id,
            proposed.clone(),
            participants.clone(),
            &mut shared_a,
        );
        assert!(matches!(
            state_a,
            LedgerTopUp::SwitchOrderAndProposeATopUp { .. }
        ));
        let state_b = initialize(
            "topup-1",
            locator(),
            channel_id,
            proposed.clone(),
            participants.clone(),
            &mut shared_b,
        );

        // B votes A's round through; A then starts depositing.
        let state_b = relay(&mut shared_a, state_b, &mut shared_b);
        let state_a = relay(&mut shared_b, state_a, &mut shared_a);
        assert!(matches!(
            state_a,
            LedgerTopUp::WaitForDirectFundingForA { .. }
        ));
        assert_eq!(shared_a.outbox.take_transactions().len(), 1);

        // A's deposit of 2 lands on chain (10 -> 12); A then proposes the
        // restore-order round.
        let state_a = reduce(
            state_a,
            &mut shared_a,
            &ProtocolAction::TransactionSent {
                process_id: "topup-1".into(),
            },
        );
        let state_a = reduce(
            state_a,
            &mut shared_a,
            &ProtocolAction::TransactionSubmitted {
                process_id: "topup-1".into(),
            },
        );
        let state_a = reduce(
            state_a,
            &mut shared_a,
            &ProtocolAction::TransactionConfirmed {
                process_id: "topup-1".into(),
                contract_address: None,
            },
        );
        let state_a = reduce(state_a, &mut shared_a, &deposited(channel_id, 12));
        let state_b = reduce(state_b, &mut shared_b, &deposited(channel_id, 12));

        // Restore-order round: B casts the final vote and starts depositing.
        let state_b = relay(&mut shared_a, state_b, &mut shared_b);
        let state_a = relay(&mut shared_b, state_a, &mut shared_a);
        assert!(matches!(
            state_b,
            LedgerTopUp::WaitForDirectFundingForB { .. }
        ));
        assert!(matches!(
            state_a,
            LedgerTopUp::WaitForDirectFundingForB { .. }
        ));
        assert_eq!(shared_b.outbox.take_transactions().len(), 1);

        // B's deposit of 1 resolves and lands on chain (12 -> 13).
        let mut state_b = state_b;
        for action in [
            ProtocolAction::TransactionSent {
                process_id: "topup-1".into(),
            },
            ProtocolAction::TransactionSubmitted {
                process_id: "topup-1".into(),
            },
            ProtocolAction::TransactionConfirmed {
                process_id: "topup-1".into(),
                contract_address: None,
            },
        ] {
            state_b = reduce(state_b, &mut shared_b, &action);
        }
        let state_b = reduce(state_b, &mut shared_b, &deposited(channel_id, 13));
        let state_a = reduce(state_a, &mut shared_a, &deposited(channel_id, 13));
        assert!(state_b.is_success());
        assert!(state_a.is_success());
    }
}
