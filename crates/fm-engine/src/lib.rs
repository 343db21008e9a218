//! # ForceMove Engine
//!
//! The orchestration layer on top of [`fm_protocols`]: a process table
//! mapping process ids to top-level protocol instances, action routing
//! with chain-event fan-out, outbound objective retransmission with
//! exponential backoff, and worker threads hosting independent engine
//! instances that own disjoint channel sets.
//!
//! All state transitions happen through pure reducers. The engine never
//! blocks waiting for a counterparty or the chain: waiting is a state,
//! and time only enters as events or explicit `now` arguments.

pub mod config;
pub mod objective;
pub mod orchestrator;
pub mod ports;
pub mod process;
pub mod worker;

pub use config::EngineConfig;
pub use objective::{ObjectiveError, ObjectiveTracker};
pub use orchestrator::{Effects, EngineRequest, Orchestrator};
pub use process::ProcessState;
pub use worker::{WorkerHandle, WorkerInput, WorkerPool};

/// Install the global tracing subscriber, filtered by `RUST_LOG`.
///
/// Call once at startup; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
