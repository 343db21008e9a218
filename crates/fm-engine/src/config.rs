//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a single engine instance.
///
/// Retransmission follows an exponential backoff: attempt `k` is sent
/// `base_retransmission_interval_ms * 2^k` after the previous one, up to
/// `max_retransmission_attempts` before the objective is abandoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay before the first retransmission of an unacknowledged message.
    pub base_retransmission_interval_ms: u64,
    /// Retransmissions allowed before an objective times out.
    pub max_retransmission_attempts: u32,
    /// Bound on queued inbound actions per worker.
    pub worker_queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_retransmission_interval_ms: 1_000,
            max_retransmission_attempts: 5,
            worker_queue_depth: 1_024,
        }
    }
}
