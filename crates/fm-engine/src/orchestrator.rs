//! Process orchestration: one process table per engine instance.
//!
//! Every inbound action is routed to exactly the processes it concerns.
//! Actions addressed to an unknown process are logged and dropped;
//! invalid input never corrupts the channel store.

use std::collections::HashMap;

use shared_crypto::PrivateKey;
use shared_types::{Address, ChannelId, CommitmentType, U256};
use tracing::{debug, info, warn};

use fm_protocols::advance_channel;
use fm_protocols::application;
use fm_protocols::ledger_defunding::{self, LedgerDefundingArgs};
use fm_protocols::ledger_funding::{self, LedgerFundingArgs};
use fm_protocols::withdrawing;
use fm_protocols::{
    OutboundMessage, ProtocolAction, ProtocolLocator, SharedData, TransactionRequest,
};

use crate::process::{self, ProcessState};

/// User-initiated operations that allocate a process.
#[derive(Debug, Clone)]
pub enum EngineRequest {
    /// Open an application channel; the opening commitment follows as an
    /// `OwnCommitment` or `OpponentCommitment` action.
    InitializeChannel,
    /// Fund an application channel through a ledger channel, reusing
    /// `existing_ledger_channel` when set.
    FundingRequested {
        app_channel_id: ChannelId,
        existing_ledger_channel: Option<ChannelId>,
        ledger_channel_type: Address,
        nonce: U256,
    },
    /// Run a cooperative conclude round on a channel.
    ConcludeRequested { channel_id: ChannelId },
    /// Defund an application channel out of its ledger channel.
    CloseLedgerChannel {
        app_channel_id: ChannelId,
        ledger_channel_id: ChannelId,
    },
    /// Withdraw our share of a concluded channel on chain.
    WithdrawalRequested { channel_id: ChannelId },
}

/// The side effects of one dispatch: everything the caller must deliver.
#[derive(Debug, Default)]
pub struct Effects {
    pub messages: Vec<OutboundMessage>,
    pub transactions: Vec<TransactionRequest>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.transactions.is_empty()
    }

    fn merge(&mut self, other: Effects) {
        self.messages.extend(other.messages);
        self.transactions.extend(other.transactions);
    }
}

/// One engine instance: a channel store plus its process table.
pub struct Orchestrator {
    shared: SharedData,
    processes: HashMap<String, ProcessState>,
    next_process: u64,
}

impl Orchestrator {
    pub fn new(private_key: PrivateKey) -> Self {
        Self {
            shared: SharedData::new(private_key),
            processes: HashMap::new(),
            next_process: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.shared.address()
    }

    pub fn shared(&self) -> &SharedData {
        &self.shared
    }

    pub fn process(&self, process_id: &str) -> Option<&ProcessState> {
        self.processes.get(process_id)
    }

    pub fn active_processes(&self) -> usize {
        self.processes.len()
    }

    /// Allocate a process id and seed the top-level protocol state.
    pub fn handle_request(&mut self, request: EngineRequest) -> (String, Effects) {
        let state = match request {
            EngineRequest::InitializeChannel => {
                let process_id = self.mint_process_id("application");
                ProcessState::Application(application::initialize(&process_id))
            }
            EngineRequest::FundingRequested {
                app_channel_id,
                existing_ledger_channel,
                ledger_channel_type,
                nonce,
            } => {
                let process_id = self.mint_process_id("funding");
                ProcessState::Funding(ledger_funding::initialize(
                    LedgerFundingArgs {
                        process_id,
                        protocol_locator: ProtocolLocator::empty(),
                        app_channel_id,
                        existing_ledger_channel,
                        ledger_channel_type,
                        nonce,
                    },
                    &mut self.shared,
                ))
            }
            EngineRequest::ConcludeRequested { channel_id } => {
                let process_id = self.mint_process_id("concluding");
                ProcessState::Concluding(advance_channel::initialize_existing(
                    &process_id,
                    ProtocolLocator::empty(),
                    channel_id,
                    CommitmentType::Conclude,
                    true,
                    &mut self.shared,
                ))
            }
            EngineRequest::CloseLedgerChannel {
                app_channel_id,
                ledger_channel_id,
            } => {
                let process_id = self.mint_process_id("defunding");
                ProcessState::Defunding(ledger_defunding::initialize(
                    LedgerDefundingArgs {
                        process_id,
                        protocol_locator: ProtocolLocator::empty(),
                        app_channel_id,
                        ledger_channel_id,
                    },
                    &mut self.shared,
                ))
            }
            EngineRequest::WithdrawalRequested { channel_id } => {
                let process_id = self.mint_process_id("withdrawing");
                ProcessState::Withdrawing(withdrawing::initialize(&process_id, channel_id))
            }
        };
        let process_id = self.last_process_id(state.kind_name());
        info!(%process_id, "process started");
        if state.is_terminal() {
            info!(%process_id, "process finished on initialization");
        } else {
            self.processes.insert(process_id.clone(), state);
        }
        (process_id, self.drain())
    }

    /// Route one action to the processes it concerns.
    pub fn dispatch(&mut self, action: ProtocolAction) -> Effects {
        if self.processes.contains_key(action.process_id()) {
            let process_id = action.process_id().to_string();
            self.step(&process_id, &action);
        } else if action.is_chain_event() {
            let subscribers: Vec<String> = action
                .channel_id()
                .map(|channel_id| self.shared.subscribers(&channel_id).to_vec())
                .unwrap_or_default();
            if subscribers.is_empty() {
                warn!(
                    process_id = action.process_id(),
                    "chain event for unmonitored channel dropped"
                );
            }
            for process_id in subscribers {
                self.step(&process_id, &action);
            }
        } else {
            warn!(process_id = action.process_id(), "unroutable action dropped");
        }
        self.drain()
    }

    /// Unwrap a batch in order, merging the effects.
    pub fn dispatch_all(&mut self, actions: impl IntoIterator<Item = ProtocolAction>) -> Effects {
        let mut effects = Effects::default();
        for action in actions {
            effects.merge(self.dispatch(action));
        }
        effects
    }

    fn step(&mut self, process_id: &str, action: &ProtocolAction) {
        let Some(state) = self.processes.remove(process_id) else {
            debug!(process_id, "process already finished, action skipped");
            return;
        };
        let state = process::reduce(state, &mut self.shared, action);
        if state.is_terminal() {
            info!(process_id, kind = state.kind_name(), "process finished");
            self.shared.unsubscribe_all(process_id);
        } else {
            self.processes.insert(process_id.to_string(), state);
        }
    }

    fn drain(&mut self) -> Effects {
        Effects {
            messages: self.shared.outbox.take_messages(),
            transactions: self.shared.outbox.take_transactions(),
        }
    }

    fn mint_process_id(&mut self, kind: &str) -> String {
        self.next_process += 1;
        format!("{kind}-{}", self.next_process)
    }

    fn last_process_id(&self, kind: &str) -> String {
        format!("{kind}-{}", self.next_process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Channel, Commitment};

    fn create_orchestrator_pair() -> (Orchestrator, Orchestrator) {
        let key_a = PrivateKey::from_bytes([1u8; 32]).unwrap();
        let key_b = PrivateKey::from_bytes([2u8; 32]).unwrap();
        (Orchestrator::new(key_a), Orchestrator::new(key_b))
    }

    fn create_opening_commitment(a: &Orchestrator, b: &Orchestrator) -> Commitment {
        let channel = Channel::new(
            [0xaa; 20],
            U256::from(11),
            vec![a.address(), b.address()],
        )
        .unwrap();
        Commitment {
            channel: channel.clone(),
            turn_num: 0,
            commitment_count: 0,
            allocation: vec![U256::from(5), U256::from(5)],
            destination: vec![channel.participants[0], channel.participants[1]],
            commitment_type: CommitmentType::PreFundSetup,
            app_attributes: vec![],
        }
    }

    #[test]
    fn test_initialize_channel_seeds_a_process() {
        let (mut a, b) = create_orchestrator_pair();
        let (process_id, effects) = a.handle_request(EngineRequest::InitializeChannel);
        assert_eq!(process_id, "application-1");
        assert!(effects.is_empty());
        assert_eq!(a.active_processes(), 1);

        let opening = create_opening_commitment(&a, &b);
        let effects = a.dispatch(ProtocolAction::OwnCommitment {
            process_id: process_id.clone(),
            commitment: opening,
        });
        assert_eq!(effects.messages.len(), 1);
        assert_eq!(effects.messages[0].recipient, b.address());
    }

    #[test]
    fn test_unroutable_action_is_dropped() {
        let (mut a, _b) = create_orchestrator_pair();
        let effects = a.dispatch(ProtocolAction::Acknowledged {
            process_id: "nonexistent-9".into(),
        });
        assert!(effects.is_empty());
        assert_eq!(a.active_processes(), 0);
    }

    #[test]
    fn test_chain_event_fans_out_to_subscribed_process() {
        let (mut a, b) = create_orchestrator_pair();
        let (process_id, _) = a.handle_request(EngineRequest::InitializeChannel);
        let opening = create_opening_commitment(&a, &b);
        let channel_id = opening.channel_id();
        a.dispatch(ProtocolAction::OwnCommitment {
            process_id,
            commitment: opening.clone(),
        });

        // The concluded event carries an unrelated process id; routing
        // goes through the channel subscription.
        let effects = a.dispatch(ProtocolAction::ConcludedEvent {
            process_id: "chain-watcher".into(),
            channel_id,
        });
        assert!(effects.is_empty());
        assert_eq!(a.active_processes(), 0);
    }

    #[test]
    fn test_terminal_process_is_removed() {
        let (mut a, b) = create_orchestrator_pair();
        let (process_id, _) = a.handle_request(EngineRequest::InitializeChannel);
        let opening = create_opening_commitment(&a, &b);
        a.dispatch(ProtocolAction::OwnCommitment {
            process_id: process_id.clone(),
            commitment: opening.clone(),
        });
        assert!(a.process(&process_id).is_some());
        a.dispatch(ProtocolAction::ConcludedEvent {
            process_id: "chain-watcher".into(),
            channel_id: opening.channel_id(),
        });
        assert!(a.process(&process_id).is_none());
        assert!(a.shared().subscribers(&opening.channel_id()).is_empty());
    }
}
