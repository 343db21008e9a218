//! # fm-protocols
//!
//! The protocol state machines that drive a channel through its lifecycle:
//! funding, off-chain updates, dispute challenge/response, and ledger
//! reallocation.
//!
//! ## Architecture
//!
//! Every protocol is a plain enum state machine with two operations:
//!
//! ```text
//! initialize(args, &mut SharedData)            -> State
//! reduce(State, &mut SharedData, &Action)      -> State
//! ```
//!
//! Reducers are pure apart from the shared store: waiting is a *state*,
//! never a blocked call, and all apparently-asynchronous work (a peer's
//! signature, a mined transaction, a chain event) resumes the machine via
//! the next inbound action. Composed protocols embed the states of their
//! children and forward actions to exactly one child by comparing the
//! action's [`locator::ProtocolLocator`] against the child's.
//!
//! Outbound effects (messages to peers, transaction requests toward the
//! chain) are queued on the shared data's outbox and drained by the
//! orchestrating layer; no protocol talks to a transport directly.

pub mod actions;
pub mod advance_channel;
pub mod application;
pub mod consensus_update;
pub mod direct_funding;
pub mod dispute;
pub mod ledger_defunding;
pub mod ledger_funding;
pub mod ledger_top_up;
pub mod locator;
pub mod outbox;
pub mod shared_data;
pub mod transaction_submission;
pub mod withdrawing;

pub use actions::ProtocolAction;
pub use locator::{ProtocolLocator, ProtocolTag};
pub use outbox::{MessagePayload, OutboundMessage, TransactionKind, TransactionRequest};
pub use shared_data::{ChannelState, SharedData, StoreError, StoreResult};
