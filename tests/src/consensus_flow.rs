//! ConsensusApp vote rounds checked against the transition validator,
//! exactly as two stores would check each other's commitments.

use primitive_types::U256;
use shared_types::{Commitment, CommitmentType};

use fm_validator::consensus_app::{self, attributes};
use fm_validator::{valid_transition, ConsensusAppAttributes, ConsensusAppRules};

use crate::fixtures::{create_channel, create_keys, create_prefund};

/// A running consensus channel at an arbitrary App turn.
fn create_consensus_commitment(allocation: Vec<U256>, turn_num: u64) -> Commitment {
    let (key_a, key_b) = create_keys();
    let channel = create_channel(&key_a, &key_b, 7);
    Commitment {
        turn_num,
        commitment_type: CommitmentType::App,
        ..create_prefund(&channel, allocation, ConsensusAppAttributes::consensus().encode())
    }
}

#[test]
fn test_propose_then_final_vote_reallocates() {
    let consensus = create_consensus_commitment(vec![U256::from(5), U256::from(1)], 6);
    let proposed = vec![U256::from(4), U256::from(2)];

    let proposal = consensus_app::propose(
        &consensus,
        proposed.clone(),
        consensus.destination.clone(),
    )
    .unwrap();
    valid_transition(&consensus, &proposal, &ConsensusAppRules).unwrap();
    assert_eq!(attributes(&proposal).unwrap().further_votes_required, 1);
    // Balances move only on the final vote.
    assert_eq!(proposal.allocation, consensus.allocation);

    let settled = consensus_app::final_vote(&proposal).unwrap();
    valid_transition(&proposal, &settled, &ConsensusAppRules).unwrap();
    assert_eq!(settled.allocation, proposed);
    assert_eq!(attributes(&settled).unwrap().further_votes_required, 0);
}

#[test]
fn test_veto_restores_the_standing_outcome() {
    let consensus = create_consensus_commitment(vec![U256::from(5), U256::from(1)], 6);
    let proposal = consensus_app::propose(
        &consensus,
        vec![U256::from(0), U256::from(6)],
        consensus.destination.clone(),
    )
    .unwrap();
    let vetoed = consensus_app::veto(&proposal).unwrap();
    valid_transition(&proposal, &vetoed, &ConsensusAppRules).unwrap();
    assert_eq!(vetoed.allocation, consensus.allocation);
    assert_eq!(attributes(&vetoed).unwrap().further_votes_required, 0);
}

#[test]
fn test_three_party_proposal_needs_two_votes() {
    let keys: Vec<_> = (1u8..=3)
        .map(|b| shared_crypto::PrivateKey::from_bytes([b; 32]).unwrap())
        .collect();
    let channel = shared_types::Channel::new(
        [0xaa; 20],
        U256::from(9),
        keys.iter().map(|k| k.address()).collect(),
    )
    .unwrap();
    let consensus = Commitment {
        channel: channel.clone(),
        turn_num: 9,
        commitment_count: 0,
        allocation: vec![U256::from(3), U256::from(2), U256::from(1)],
        destination: channel.participants.clone(),
        commitment_type: CommitmentType::App,
        app_attributes: ConsensusAppAttributes::consensus().encode(),
    };
    let proposed = vec![U256::from(1), U256::from(2), U256::from(3)];

    let proposal =
        consensus_app::propose(&consensus, proposed.clone(), channel.participants.clone())
            .unwrap();
    assert_eq!(attributes(&proposal).unwrap().further_votes_required, 2);

    // accept_consensus picks vote vs final_vote by the outstanding count.
    let voted = consensus_app::accept_consensus(&proposal).unwrap();
    valid_transition(&proposal, &voted, &ConsensusAppRules).unwrap();
    assert_eq!(attributes(&voted).unwrap().further_votes_required, 1);
    assert_eq!(voted.allocation, consensus.allocation);

    let settled = consensus_app::accept_consensus(&voted).unwrap();
    valid_transition(&voted, &settled, &ConsensusAppRules).unwrap();
    assert_eq!(settled.allocation, proposed);
}

#[test]
fn test_skipped_turn_number_is_rejected() {
    let consensus = create_consensus_commitment(vec![U256::from(5), U256::from(1)], 6);
    let mut skipped = consensus_app::pass(&consensus).unwrap();
    skipped.turn_num = 8;
    let err = valid_transition(&consensus, &skipped, &ConsensusAppRules).unwrap_err();
    assert_eq!(
        err.to_string(),
        "turnNum must increase by 1: 6 -> 8"
    );
}

#[test]
fn test_premature_final_vote_is_rejected() {
    let keys: Vec<_> = (1u8..=3)
        .map(|b| shared_crypto::PrivateKey::from_bytes([b; 32]).unwrap())
        .collect();
    let channel = shared_types::Channel::new(
        [0xaa; 20],
        U256::from(10),
        keys.iter().map(|k| k.address()).collect(),
    )
    .unwrap();
    let consensus = Commitment {
        channel: channel.clone(),
        turn_num: 9,
        commitment_count: 0,
        allocation: vec![U256::from(1), U256::from(1), U256::from(1)],
        destination: channel.participants.clone(),
        commitment_type: CommitmentType::App,
        app_attributes: ConsensusAppAttributes::consensus().encode(),
    };
    let proposal = consensus_app::propose(
        &consensus,
        vec![U256::from(3), U256::zero(), U256::zero()],
        channel.participants.clone(),
    )
    .unwrap();
    // Two votes outstanding: a final vote now must be refused.
    assert!(consensus_app::final_vote(&proposal).is_err());
}
