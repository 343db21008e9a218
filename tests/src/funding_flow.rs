//! Deposit safety and guarantor-claim scenarios against a live store.

use primitive_types::U256;

use fm_protocols::direct_funding::{self, DirectFunding, DirectFundingArgs};
use fm_protocols::shared_data::{ChannelKind, SharedData, StoreError};
use fm_protocols::{ProtocolAction, ProtocolLocator, TransactionKind};
use shared_types::ChannelId;

use crate::fixtures::{create_funded_pair, create_keys};

fn create_registered_channel() -> (SharedData, ChannelId) {
    let (key_a, key_b) = create_keys();
    let (shared_a, _, channel_id) = create_funded_pair(
        key_a,
        key_b,
        vec![U256::from(5), U256::from(5)],
        vec![],
        ChannelKind::Application,
    );
    (shared_a, channel_id)
}

fn create_args(channel_id: ChannelId) -> DirectFundingArgs {
    DirectFundingArgs {
        process_id: "funding-1".into(),
        protocol_locator: ProtocolLocator::empty(),
        channel_id,
        required_deposit: U256::from(5),
        total_funding_required: U256::from(10),
        safe_to_deposit_level: U256::zero(),
    }
}

#[test]
fn test_overfunded_channel_is_never_deposited_into() {
    let (mut shared, channel_id) = create_registered_channel();
    shared.set_holdings(&channel_id, U256::from(10)).unwrap();

    let state = direct_funding::initialize(create_args(channel_id), &mut shared);
    assert!(matches!(state, DirectFunding::FundingSuccess { .. }));
    assert!(shared.outbox.take_transactions().is_empty());
}

#[test]
fn test_deposit_waits_until_safe() {
    let (mut shared, channel_id) = create_registered_channel();
    let args = DirectFundingArgs {
        safe_to_deposit_level: U256::from(5),
        ..create_args(channel_id)
    };

    // Nothing on chain yet: depositing now could be front-run.
    let state = direct_funding::initialize(args, &mut shared);
    assert!(matches!(state, DirectFunding::NotSafeToDeposit { .. }));
    assert!(shared.outbox.take_transactions().is_empty());

    // The counterparty's deposit lands; ours goes out on top of it.
    let state = direct_funding::reduce(
        state,
        &mut shared,
        &ProtocolAction::DepositedEvent {
            process_id: "funding-1".into(),
            protocol_locator: ProtocolLocator::empty(),
            channel_id,
            amount: U256::from(5),
            total_holdings: U256::from(5),
        },
    );
    assert!(matches!(state, DirectFunding::WaitForDepositTransaction { .. }));
    let requests = shared.outbox.take_transactions();
    assert!(matches!(
        &requests[0].kind,
        TransactionKind::Deposit { amount, expected_held, .. }
            if *amount == U256::from(5) && *expected_held == U256::from(5)
    ));
}

#[test]
fn test_guarantor_claim_requires_full_funding() {
    let (key_a, key_b) = create_keys();
    let (mut shared, _, guarantor_id) = create_funded_pair(
        key_a.clone(),
        key_b.clone(),
        vec![U256::from(2), U256::from(2)],
        vec![],
        ChannelKind::Ledger,
    );
    shared.set_holdings(&guarantor_id, U256::from(3)).unwrap();

    let err = shared
        .claim_from_guarantor(&guarantor_id, &guarantor_id, U256::from(5))
        .unwrap_err();
    assert!(matches!(err, StoreError::GuarantorUnderfunded { .. }));
    assert_eq!(
        err.to_string(),
        "guarantor must be sufficiently funded: holds 3, claim needs 5"
    );
    // A failed claim must not touch the holdings.
    assert_eq!(shared.holdings(&guarantor_id), U256::from(3));
}

#[test]
fn test_covered_claim_moves_holdings() {
    let (key_a, key_b) = create_keys();
    let mut shared = SharedData::new(key_a.clone());
    let allocation = vec![U256::from(2), U256::from(2)];

    let guarantor = crate::fixtures::create_channel(&key_a, &key_b, 1);
    let target = crate::fixtures::create_channel(&key_a, &key_b, 2);
    shared
        .sign_and_initialize(
            crate::fixtures::create_prefund(&guarantor, allocation.clone(), vec![]),
            ChannelKind::Ledger,
        )
        .unwrap();
    shared
        .sign_and_initialize(
            crate::fixtures::create_prefund(&target, allocation, vec![]),
            ChannelKind::Application,
        )
        .unwrap();

    shared.set_holdings(&guarantor.id(), U256::from(5)).unwrap();
    shared
        .claim_from_guarantor(&guarantor.id(), &target.id(), U256::from(2))
        .unwrap();
    assert_eq!(shared.holdings(&guarantor.id()), U256::from(3));
    assert_eq!(shared.holdings(&target.id()), U256::from(2));
}
