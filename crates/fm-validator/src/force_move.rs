//! Generic ForceMove transition rules.
//!
//! Checked in order, short-circuiting on first failure:
//!
//! 1. channel unchanged (id and nonce),
//! 2. turn number increases by exactly 1,
//! 3. phase ordering `PreFundSetup* → PostFundSetup* → App* → Conclude*`
//!    with commitment-count discipline inside setup/conclude rounds,
//! 4. allocation/destination unchanged, except where the application rule
//!    set explicitly permits a change on App transitions.

use shared_types::{Commitment, CommitmentType, TypeError};

/// Why a commitment transition was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("channelId must match")]
    ChannelMismatch,

    #[error("turnNum must increase by 1: {from} -> {to}")]
    TurnNumNotIncremented { from: u64, to: u64 },

    #[error("{0}")]
    WrongCommitmentKindOrder(String),

    #[error("{phase:?}: allocations and destinations must be equal")]
    BalancesChanged { phase: CommitmentType },

    #[error("app rule violated: {0}")]
    AppRuleViolated(String),

    #[error(transparent)]
    Malformed(#[from] TypeError),
}

/// Result type for transition validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A pluggable per-application rule set.
///
/// Consulted for every transition into an `App` commitment; everything
/// else is covered by the generic rules.
pub trait ApplicationRules {
    fn validate(&self, from: &Commitment, to: &Commitment) -> ValidationResult<()>;
}

/// Validate the transition `from -> to` under the generic ForceMove rules,
/// delegating App-phase attribute changes to `app_rules`.
pub fn valid_transition(
    from: &Commitment,
    to: &Commitment,
    app_rules: &dyn ApplicationRules,
) -> ValidationResult<()> {
    from.check_shape()?;
    to.check_shape()?;

    if from.channel != to.channel {
        return Err(ValidationError::ChannelMismatch);
    }

    if to.turn_num != from.turn_num + 1 {
        return Err(ValidationError::TurnNumNotIncremented {
            from: from.turn_num,
            to: to.turn_num,
        });
    }

    let num_participants = from.channel.num_participants() as u32;
    match (from.commitment_type, to.commitment_type) {
        (CommitmentType::PreFundSetup, CommitmentType::PreFundSetup)
        | (CommitmentType::PostFundSetup, CommitmentType::PostFundSetup) => {
            check_count_increments(from, to)?;
            check_balances_unchanged(from, to)?;
            check_app_attributes_unchanged(from, to)
        }
        (CommitmentType::PreFundSetup, CommitmentType::PostFundSetup) => {
            check_round_complete(from, num_participants)?;
            check_count_reset(to)?;
            check_balances_unchanged(from, to)?;
            check_app_attributes_unchanged(from, to)
        }
        (CommitmentType::PostFundSetup, CommitmentType::App) => {
            check_round_complete(from, num_participants)?;
            app_rules.validate(from, to)
        }
        (CommitmentType::App, CommitmentType::App) => app_rules.validate(from, to),
        (CommitmentType::PostFundSetup, CommitmentType::Conclude) => {
            check_round_complete(from, num_participants)?;
            check_count_reset(to)?;
            check_balances_unchanged(from, to)
        }
        (CommitmentType::App, CommitmentType::Conclude) => {
            check_count_reset(to)?;
            check_balances_unchanged(from, to)
        }
        (CommitmentType::Conclude, CommitmentType::Conclude) => {
            check_count_increments(from, to)?;
            check_balances_unchanged(from, to)
        }
        (from_type, to_type) => Err(ValidationError::WrongCommitmentKindOrder(format!(
            "{from_type:?}: commitmentType may not be followed by {to_type:?}"
        ))),
    }
}

fn check_count_increments(from: &Commitment, to: &Commitment) -> ValidationResult<()> {
    if to.commitment_count != from.commitment_count + 1 {
        return Err(ValidationError::WrongCommitmentKindOrder(format!(
            "{:?}: commitmentCount must increase by 1",
            from.commitment_type
        )));
    }
    Ok(())
}

/// The last commitment of a setup round carries
/// `commitment_count == participants - 1`; only then may the phase advance.
fn check_round_complete(from: &Commitment, num_participants: u32) -> ValidationResult<()> {
    if from.commitment_count != num_participants - 1 {
        return Err(ValidationError::WrongCommitmentKindOrder(format!(
            "{:?}: phase may only advance from the last commitment of its round",
            from.commitment_type
        )));
    }
    Ok(())
}

fn check_count_reset(to: &Commitment) -> ValidationResult<()> {
    if to.commitment_count != 0 {
        return Err(ValidationError::WrongCommitmentKindOrder(format!(
            "{:?}: commitmentCount must be reset when the phase changes",
            to.commitment_type
        )));
    }
    Ok(())
}

fn check_balances_unchanged(from: &Commitment, to: &Commitment) -> ValidationResult<()> {
    if from.allocation != to.allocation || from.destination != to.destination {
        return Err(ValidationError::BalancesChanged {
            phase: from.commitment_type,
        });
    }
    Ok(())
}

fn check_app_attributes_unchanged(from: &Commitment, to: &Commitment) -> ValidationResult<()> {
    if from.app_attributes != to.app_attributes {
        return Err(ValidationError::WrongCommitmentKindOrder(format!(
            "{:?}: appAttributes must be equal",
            from.commitment_type
        )));
    }
    Ok(())
}
