//! ConsensusApp: the reference application rule set.
//!
//! An N-party unanimous-vote state machine over the channel's allocation.
//! The app is always in one of two states, carried in the commitment's
//! opaque attributes:
//!
//! - `Consensus` — no reallocation in flight (`further_votes_required == 0`,
//!   proposal fields empty), and
//! - `Proposal` — a reallocation awaiting votes
//!   (`further_votes_required > 0`, proposal fields populated).
//!
//! Legal transitions are `pass`, `propose`, `vote`, `final_vote` and
//! `veto`; anything else is rejected. Balances change only on `final_vote`,
//! and then only to exactly the previously proposed values.

use serde::{Deserialize, Serialize};
use shared_types::{Address, Commitment, CommitmentType, U256};

use crate::force_move::{ApplicationRules, ValidationError, ValidationResult};

/// Whether the channel is at consensus or mid-proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    Consensus,
    Proposal,
}

/// The ConsensusApp specialization of `Commitment::app_attributes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusAppAttributes {
    pub further_votes_required: u32,
    pub proposed_allocation: Vec<U256>,
    pub proposed_destination: Vec<Address>,
    pub update_type: UpdateType,
}

impl ConsensusAppAttributes {
    /// Attributes for a channel at consensus.
    pub fn consensus() -> Self {
        Self {
            further_votes_required: 0,
            proposed_allocation: vec![],
            proposed_destination: vec![],
            update_type: UpdateType::Consensus,
        }
    }

    /// Attributes for a freshly made proposal needing `further_votes_required`
    /// more votes.
    pub fn proposal(
        further_votes_required: u32,
        proposed_allocation: Vec<U256>,
        proposed_destination: Vec<Address>,
    ) -> Self {
        Self {
            further_votes_required,
            proposed_allocation,
            proposed_destination,
            update_type: UpdateType::Proposal,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> ValidationResult<Self> {
        bincode::deserialize(bytes).map_err(|_| {
            ValidationError::AppRuleViolated(
                "could not decode ConsensusApp attributes".to_string(),
            )
        })
    }

    fn check_consensus(&self) -> ValidationResult<()> {
        if self.further_votes_required != 0 {
            return Err(ValidationError::AppRuleViolated(
                "'furtherVotesRequired' must be 0 during consensus".to_string(),
            ));
        }
        if !self.proposed_allocation.is_empty() {
            return Err(ValidationError::AppRuleViolated(
                "'proposedAllocation' must be reset during consensus".to_string(),
            ));
        }
        if !self.proposed_destination.is_empty() {
            return Err(ValidationError::AppRuleViolated(
                "'proposedDestination' must be reset during consensus".to_string(),
            ));
        }
        Ok(())
    }

    fn check_proposal(&self) -> ValidationResult<()> {
        if self.further_votes_required == 0 {
            return Err(ValidationError::AppRuleViolated(
                "'furtherVotesRequired' must be greater than 0 during a proposal".to_string(),
            ));
        }
        if self.proposed_allocation.is_empty()
            || self.proposed_allocation.len() != self.proposed_destination.len()
        {
            return Err(ValidationError::AppRuleViolated(
                "'proposedAllocation' and 'proposedDestination' must be non-empty and of equal length"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Decode the ConsensusApp attributes of a commitment.
pub fn attributes(commitment: &Commitment) -> ValidationResult<ConsensusAppAttributes> {
    ConsensusAppAttributes::decode(&commitment.app_attributes)
}

/// The ConsensusApp rule set, pluggable into the generic validator.
pub struct ConsensusAppRules;

impl ApplicationRules for ConsensusAppRules {
    fn validate(&self, from: &Commitment, to: &Commitment) -> ValidationResult<()> {
        let from_attrs = attributes(from)?;
        let to_attrs = attributes(to)?;
        let num_participants = from.channel.num_participants() as u32;

        match (from_attrs.update_type, to_attrs.update_type) {
            // pass: consensus is simply restated.
            (UpdateType::Consensus, UpdateType::Consensus) => {
                to_attrs.check_consensus()?;
                balances_unchanged(from, to)
            }
            // propose: a reallocation goes up for votes.
            (UpdateType::Consensus, UpdateType::Proposal) => {
                to_attrs.check_proposal()?;
                if to_attrs.further_votes_required != num_participants - 1 {
                    return Err(ValidationError::AppRuleViolated(
                        "'furtherVotesRequired' must be initialized to participants - 1"
                            .to_string(),
                    ));
                }
                balances_unchanged(from, to)
            }
            // vote: one participant approves, more approvals still needed.
            (UpdateType::Proposal, UpdateType::Proposal) => {
                from_attrs.check_proposal()?;
                to_attrs.check_proposal()?;
                if from_attrs.further_votes_required <= 1 {
                    return Err(ValidationError::AppRuleViolated(
                        "a final vote must move to consensus".to_string(),
                    ));
                }
                if to_attrs.further_votes_required != from_attrs.further_votes_required - 1 {
                    return Err(ValidationError::AppRuleViolated(
                        "'furtherVotesRequired' must be decremented by 1".to_string(),
                    ));
                }
                if to_attrs.proposed_allocation != from_attrs.proposed_allocation
                    || to_attrs.proposed_destination != from_attrs.proposed_destination
                {
                    return Err(ValidationError::AppRuleViolated(
                        "the proposal must be unchanged by a vote".to_string(),
                    ));
                }
                balances_unchanged(from, to)
            }
            // final_vote or veto.
            (UpdateType::Proposal, UpdateType::Consensus) => {
                from_attrs.check_proposal()?;
                to_attrs.check_consensus()?;
                let enacts_proposal = to.allocation == from_attrs.proposed_allocation
                    && to.destination == from_attrs.proposed_destination;
                if enacts_proposal && from_attrs.further_votes_required == 1 {
                    // final_vote: balances become exactly the proposal.
                    return Ok(());
                }
                // veto: back to consensus with balances untouched.
                balances_unchanged(from, to).map_err(|_| {
                    ValidationError::AppRuleViolated("no valid transition".to_string())
                })
            }
        }
    }
}

fn balances_unchanged(from: &Commitment, to: &Commitment) -> ValidationResult<()> {
    if from.allocation != to.allocation || from.destination != to.destination {
        return Err(ValidationError::AppRuleViolated(
            "'allocation' and 'destination' must be unchanged".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commitment constructors
//
// The client-side half of the rule set: given the latest commitment, build
// the successor a participant should sign. Each advances the turn number by
// exactly 1 and maintains the attribute invariants, so a constructed
// commitment always satisfies `ConsensusAppRules`.
// ---------------------------------------------------------------------------

/// Restate consensus without changing anything.
pub fn pass(latest: &Commitment) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    attrs.check_consensus()?;
    Ok(next_app_commitment(
        latest,
        latest.allocation.clone(),
        latest.destination.clone(),
        ConsensusAppAttributes::consensus(),
    ))
}

/// Put a reallocation up for votes.
pub fn propose(
    latest: &Commitment,
    proposed_allocation: Vec<U256>,
    proposed_destination: Vec<Address>,
) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    attrs.check_consensus()?;
    let further_votes_required = latest.channel.num_participants() as u32 - 1;
    let attrs = ConsensusAppAttributes::proposal(
        further_votes_required,
        proposed_allocation,
        proposed_destination,
    );
    attrs.check_proposal()?;
    Ok(next_app_commitment(
        latest,
        latest.allocation.clone(),
        latest.destination.clone(),
        attrs,
    ))
}

/// Approve the open proposal; more votes are still required after ours.
pub fn vote(latest: &Commitment) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    attrs.check_proposal()?;
    if attrs.further_votes_required <= 1 {
        return Err(ValidationError::AppRuleViolated(
            "the last vote must be a final vote".to_string(),
        ));
    }
    let next = ConsensusAppAttributes::proposal(
        attrs.further_votes_required - 1,
        attrs.proposed_allocation,
        attrs.proposed_destination,
    );
    Ok(next_app_commitment(
        latest,
        latest.allocation.clone(),
        latest.destination.clone(),
        next,
    ))
}

/// Cast the deciding vote: the proposal becomes the allocation.
pub fn final_vote(latest: &Commitment) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    attrs.check_proposal()?;
    if attrs.further_votes_required != 1 {
        return Err(ValidationError::AppRuleViolated(
            "a final vote requires exactly one outstanding vote".to_string(),
        ));
    }
    Ok(next_app_commitment(
        latest,
        attrs.proposed_allocation,
        attrs.proposed_destination,
        ConsensusAppAttributes::consensus(),
    ))
}

/// Reject the open proposal; balances stay as they were.
pub fn veto(latest: &Commitment) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    attrs.check_proposal()?;
    Ok(next_app_commitment(
        latest,
        latest.allocation.clone(),
        latest.destination.clone(),
        ConsensusAppAttributes::consensus(),
    ))
}

/// Approve the open proposal, casting the final vote if ours is the last
/// one outstanding.
pub fn accept_consensus(latest: &Commitment) -> ValidationResult<Commitment> {
    let attrs = attributes(latest)?;
    if attrs.further_votes_required == 1 {
        final_vote(latest)
    } else {
        vote(latest)
    }
}

fn next_app_commitment(
    latest: &Commitment,
    allocation: Vec<U256>,
    destination: Vec<Address>,
    attrs: ConsensusAppAttributes,
) -> Commitment {
    Commitment {
        channel: latest.channel.clone(),
        turn_num: latest.turn_num + 1,
        commitment_count: 0,
        allocation,
        destination,
        commitment_type: CommitmentType::App,
        app_attributes: attrs.encode(),
    }
}
