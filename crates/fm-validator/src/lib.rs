//! # fm-validator
//!
//! The Commitment Transition Validator: decides, for any two consecutive
//! signed commitments, whether the transition is legal.
//!
//! ## Architecture
//!
//! Validation is split exactly the way the adjudicator splits it:
//!
//! - **Generic ForceMove rules** (`force_move`) — channel identity, turn
//!   monotonicity, phase ordering, commitment-count discipline, balance
//!   preservation. Pure functions over two commitments.
//! - **Per-application rules** (`ApplicationRules` impls) — consulted only
//!   for transitions into an `App` commitment. The reference rule set is
//!   the ConsensusApp unanimous-vote state machine (`consensus_app`).
//!
//! Every rejection carries a specific [`ValidationError`] variant — callers
//! must be able to surface *why* a transition failed, never just that it
//! did.

pub mod consensus_app;
pub mod force_move;

pub use consensus_app::{ConsensusAppAttributes, ConsensusAppRules, UpdateType};
pub use force_move::{valid_transition, ApplicationRules, ValidationError, ValidationResult};
