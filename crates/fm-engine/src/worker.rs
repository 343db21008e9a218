//! Worker threads hosting independent engine instances.
//!
//! Scaling is by partitioning: each worker owns an [`Orchestrator`] with
//! its own key and channel set, so no lock is ever shared between
//! workers. All coordination is message passing over crossbeam channels.

use std::io;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use shared_crypto::PrivateKey;
use tracing::info;

use fm_protocols::ProtocolAction;

use crate::config::EngineConfig;
use crate::orchestrator::{Effects, EngineRequest, Orchestrator};

/// Inbound work for one engine instance.
#[derive(Debug, Clone)]
pub enum WorkerInput {
    Request(EngineRequest),
    Action(ProtocolAction),
    /// Unwrapped in order by the receiving worker.
    Batch(Vec<ProtocolAction>),
}

pub struct WorkerHandle {
    input: Option<Sender<WorkerInput>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn(
        index: usize,
        orchestrator: Orchestrator,
        effects: Sender<Effects>,
        queue_depth: usize,
    ) -> io::Result<Self> {
        let (input_tx, input_rx) = bounded::<WorkerInput>(queue_depth);
        let handle = thread::Builder::new()
            .name(format!("fm-worker-{index}"))
            .spawn(move || run(orchestrator, input_rx, effects))?;
        Ok(Self {
            input: Some(input_tx),
            handle: Some(handle),
        })
    }

    pub fn send(&self, input: WorkerInput) -> bool {
        match &self.input {
            Some(sender) => sender.send(input).is_ok(),
            None => false,
        }
    }
}

fn run(mut orchestrator: Orchestrator, input: Receiver<WorkerInput>, effects: Sender<Effects>) {
    info!(address = %hex::encode(orchestrator.address()), "worker started");
    for work in input.iter() {
        let produced = match work {
            WorkerInput::Request(request) => orchestrator.handle_request(request).1,
            WorkerInput::Action(action) => orchestrator.dispatch(action),
            WorkerInput::Batch(actions) => orchestrator.dispatch_all(actions),
        };
        // One reply per input, empty or not, so callers can correlate.
        if effects.send(produced).is_err() {
            break;
        }
    }
    info!("worker stopped");
}

/// A set of workers plus the shared effects stream they report into.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    effects: Receiver<Effects>,
}

impl WorkerPool {
    /// One worker per key, each owning a disjoint channel set.
    pub fn spawn(keys: Vec<PrivateKey>, config: &EngineConfig) -> io::Result<Self> {
        let (effects_tx, effects_rx) = unbounded();
        let workers = keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| {
                WorkerHandle::spawn(
                    index,
                    Orchestrator::new(key),
                    effects_tx.clone(),
                    config.worker_queue_depth,
                )
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self {
            workers,
            effects: effects_rx,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn send(&self, worker: usize, input: WorkerInput) -> bool {
        self.workers
            .get(worker)
            .map(|w| w.send(input))
            .unwrap_or(false)
    }

    pub fn effects(&self) -> &Receiver<Effects> {
        &self.effects
    }

    /// Close the input queues and join every worker.
    pub fn shutdown(mut self) {
        for worker in &mut self.workers {
            worker.input = None;
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
