//! Collaborator traits at the engine boundary.
//!
//! The engine core is pure; everything with a side effect lives behind
//! one of these traits so tests can substitute deterministic fakes.

use std::collections::HashMap;

use parking_lot::RwLock;
use shared_types::{ChannelId, SignedCommitment};
use thiserror::Error;

use fm_protocols::{OutboundMessage, ProtocolAction, TransactionRequest};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("chain adapter failure: {0}")]
    Chain(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

pub type PortResult<T> = Result<T, PortError>;

/// The adjudicator-facing side: transaction submission plus the event
/// subscriptions (deposits, challenges, expiries, conclusions, asset
/// transfers) surfaced back as protocol actions.
pub trait ChainPort: Send + Sync {
    fn submit_transaction(&self, request: &TransactionRequest) -> PortResult<()>;

    /// Drain events observed since the last call.
    fn collect_events(&self) -> Vec<ProtocolAction>;
}

/// Counterparty message delivery. At-least-once and unordered is fine;
/// the store rejects stale turn numbers harmlessly.
pub trait MessagePort: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> PortResult<()>;
}

/// Commitment history storage.
pub trait PersistencePort: Send + Sync {
    fn history(&self, channel_id: &ChannelId) -> PortResult<Vec<SignedCommitment>>;
    fn append(&self, channel_id: &ChannelId, commitment: &SignedCommitment) -> PortResult<()>;
}

/// In-memory persistence, the default for tests and single-process use.
#[derive(Default)]
pub struct InMemoryStore {
    histories: RwLock<HashMap<ChannelId, Vec<SignedCommitment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistencePort for InMemoryStore {
    fn history(&self, channel_id: &ChannelId) -> PortResult<Vec<SignedCommitment>> {
        Ok(self
            .histories
            .read()
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    fn append(&self, channel_id: &ChannelId, commitment: &SignedCommitment) -> PortResult<()> {
        self.histories
            .write()
            .entry(*channel_id)
            .or_default()
            .push(commitment.clone());
        Ok(())
    }
}
