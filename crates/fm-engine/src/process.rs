//! Top-level protocol instances as entries of the process table.

use fm_protocols::advance_channel::{self, AdvanceChannel};
use fm_protocols::application::{self, Application};
use fm_protocols::ledger_defunding::{self, LedgerDefunding};
use fm_protocols::ledger_funding::{self, LedgerFunding};
use fm_protocols::withdrawing::{self, Withdrawing};
use fm_protocols::{ProtocolAction, SharedData};

/// One running process: a top-level protocol state machine.
#[derive(Debug, Clone)]
pub enum ProcessState {
    Application(Application),
    Funding(LedgerFunding),
    Concluding(AdvanceChannel),
    Defunding(LedgerDefunding),
    Withdrawing(Withdrawing),
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Application(p) => p.is_terminal(),
            Self::Funding(p) => p.is_terminal(),
            Self::Concluding(p) => p.is_terminal(),
            Self::Defunding(p) => p.is_terminal(),
            Self::Withdrawing(p) => p.is_terminal(),
        }
    }

    /// Short protocol name, used when minting process ids.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Application(_) => "application",
            Self::Funding(_) => "funding",
            Self::Concluding(_) => "concluding",
            Self::Defunding(_) => "defunding",
            Self::Withdrawing(_) => "withdrawing",
        }
    }
}

pub fn reduce(state: ProcessState, shared: &mut SharedData, action: &ProtocolAction) -> ProcessState {
    match state {
        ProcessState::Application(inner) => {
            ProcessState::Application(application::reduce(inner, shared, action))
        }
        ProcessState::Funding(inner) => {
            ProcessState::Funding(ledger_funding::reduce(inner, shared, action))
        }
        ProcessState::Concluding(inner) => {
            ProcessState::Concluding(advance_channel::reduce(inner, shared, action))
        }
        ProcessState::Defunding(inner) => {
            ProcessState::Defunding(ledger_defunding::reduce(inner, shared, action))
        }
        ProcessState::Withdrawing(inner) => {
            ProcessState::Withdrawing(withdrawing::reduce(inner, shared, action))
        }
    }
}
