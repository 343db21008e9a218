//! Outbound objective retransmission.
//!
//! A queued message is an objective until the counterparty's next action
//! shows it landed. Until then it is retransmitted with exponential
//! backoff; a finite attempt budget bounds how long an unresponsive peer
//! can hold resources. Time is always passed in, never read from a clock.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use fm_protocols::OutboundMessage;

use crate::config::EngineConfig;

#[derive(Debug, Error)]
pub enum ObjectiveError {
    #[error("objective for process {process_id} timed out after {attempts} attempts")]
    TimedOut { process_id: String, attempts: u32 },
}

#[derive(Debug, Clone)]
struct Objective {
    message: OutboundMessage,
    attempts: u32,
    next_due_ms: u64,
}

/// Tracks the latest unacknowledged message per process.
#[derive(Debug)]
pub struct ObjectiveTracker {
    base_interval_ms: u64,
    max_attempts: u32,
    objectives: HashMap<String, Objective>,
}

impl ObjectiveTracker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            base_interval_ms: config.base_retransmission_interval_ms,
            max_attempts: config.max_retransmission_attempts,
            objectives: HashMap::new(),
        }
    }

    /// Start tracking a message that was just sent. A newer message for
    /// the same process replaces the old objective.
    pub fn track(&mut self, message: OutboundMessage, now_ms: u64) {
        let process_id = message.process_id.clone();
        self.objectives.insert(
            process_id,
            Objective {
                message,
                attempts: 0,
                next_due_ms: now_ms + self.base_interval_ms,
            },
        );
    }

    /// The process made progress; its objective is met.
    pub fn complete(&mut self, process_id: &str) {
        if self.objectives.remove(process_id).is_some() {
            debug!(process_id, "objective completed");
        }
    }

    pub fn is_tracking(&self, process_id: &str) -> bool {
        self.objectives.contains_key(process_id)
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    /// Collect the messages due for retransmission at `now_ms`.
    ///
    /// Objectives past the attempt budget are dropped and reported; their
    /// processes stay alive and can still complete if the peer reappears
    /// through another path (e.g. a chain event).
    pub fn due(&mut self, now_ms: u64) -> (Vec<OutboundMessage>, Vec<ObjectiveError>) {
        let mut retransmissions = Vec::new();
        let mut timeouts = Vec::new();
        self.objectives.retain(|process_id, objective| {
            if objective.next_due_ms > now_ms {
                return true;
            }
            if objective.attempts >= self.max_attempts {
                warn!(%process_id, attempts = objective.attempts, "objective abandoned");
                timeouts.push(ObjectiveError::TimedOut {
                    process_id: process_id.clone(),
                    attempts: objective.attempts,
                });
                return false;
            }
            objective.attempts += 1;
            objective.next_due_ms = now_ms + (self.base_interval_ms << objective.attempts);
            retransmissions.push(objective.message.clone());
            true
        });
        (retransmissions, timeouts)
    }
}
