//! Protocol locators: path addressing for nested protocol instances.
//!
//! Any number of protocol instances nest inside one top-level process. A
//! locator is the typed path from the process root to one instance, e.g.
//! `[LedgerTopUp, ConsensusUpdate]`. Inbound actions carry the locator of
//! the instance they are meant for; a composed protocol forwards an action
//! to the child whose locator is a prefix of the action's.

use serde::{Deserialize, Serialize};

/// One path segment: which protocol a nested instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolTag {
    TransactionSubmission,
    AdvanceChannel,
    DirectFunding,
    ConsensusUpdate,
    Withdrawing,
    LedgerTopUp,
    LedgerFunding,
    NewLedgerChannel,
    ExistingLedgerFunding,
    LedgerDefunding,
    Dispute,
    Application,
}

/// The path from a process root to one nested protocol instance.
///
/// Locators compose by concatenation; the empty locator addresses the
/// top-level protocol itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolLocator(Vec<ProtocolTag>);

impl ProtocolLocator {
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<ProtocolTag>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[ProtocolTag] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The locator of a child instance: ours plus one segment.
    pub fn child(&self, tag: ProtocolTag) -> Self {
        let mut segments = self.0.clone();
        segments.push(tag);
        Self(segments)
    }

    /// Prepend a parent segment, re-rooting this locator one level up.
    pub fn prepend(&self, tag: ProtocolTag) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(tag);
        segments.extend_from_slice(&self.0);
        Self(segments)
    }

    pub fn starts_with(&self, prefix: &ProtocolLocator) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Does an action carrying this locator route to the child instance
    /// `instance.child(tag)`?
    ///
    /// True when the child's locator is a prefix of the action's (deeper
    /// segments are the grandchildren's business) or matches it exactly
    /// for leaf handling.
    pub fn routes_to(&self, instance: &ProtocolLocator, tag: ProtocolTag) -> bool {
        self.starts_with(&instance.child(tag))
    }
}

/// Build a locator from a parent's locator and one child segment.
pub fn make_locator(parent: &ProtocolLocator, tag: ProtocolTag) -> ProtocolLocator {
    parent.child(tag)
}
