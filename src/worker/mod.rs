//! Mining workers
//!
//! Each worker is an independent task that owns one search at a time. The
//! coordinator talks to workers only through one-way messages: commands go in
//! through a per-worker channel, results and progress come back on a shared event
//! channel.

use crate::block::BlockTemplate;
use crate::crypto::Hasher;
use crate::types::{Difficulty, Generation, HashResult, NonceRange, Percentage, WorkerId};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Span};

pub mod cpu;

pub use cpu::CpuWorker;

/// A nonce range of one block template handed to a worker
#[derive(Debug, Clone)]
pub struct Assignment {
    pub block: Arc<BlockTemplate>,
    pub range: NonceRange,
    pub difficulty: Difficulty,
}

/// Messages accepted by a worker
#[derive(Debug)]
pub enum WorkerCommand {
    /// Start searching; only valid while idle
    Assign(Assignment),
    /// Ask the running search to stop at its next chunk boundary
    AbortCurrent,
    /// Ask for a progress snapshot of the running search
    ReportProgress,
    /// Stop the worker for good
    Decommission,
}

/// Messages sent by workers to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// An assignment ended, matched or not; sent exactly once per assignment
    Finished {
        worker: WorkerId,
        generation: Generation,
        result: Option<HashResult>,
        processed: u64,
    },
    /// Progress of the running search
    Progress {
        worker: WorkerId,
        generation: Generation,
        percentage: Percentage,
    },
    /// The worker terminated unexpectedly
    Lost { worker: WorkerId, reason: String },
}

/// Coordinator-side status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Mining,
}

/// Sending side of a running worker
pub struct WorkerHandle {
    id: WorkerId,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker task reporting to `events`
    pub fn spawn(
        id: WorkerId,
        hasher: Arc<dyn Hasher>,
        chunk_size: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = CpuWorker::new(id, hasher, chunk_size, receiver, events);
        let task = tokio::spawn(worker.run());
        Self { id, commands, task }
    }

    /// Worker id
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Hand a nonce range to the worker
    pub fn assign(&self, assignment: Assignment) -> Result<()> {
        self.send(WorkerCommand::Assign(assignment))
    }

    /// Signal the running search to stop
    pub fn abort_current(&self) -> Result<()> {
        self.send(WorkerCommand::AbortCurrent)
    }

    /// Ask the worker for a progress event
    pub fn request_progress(&self) -> Result<()> {
        self.send(WorkerCommand::ReportProgress)
    }

    /// Stop the worker; a worker that is already gone is fine
    pub fn decommission(&self) {
        let _ = self.commands.send(WorkerCommand::Decommission);
    }

    /// Whether the worker task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::worker(self.id.index(), "command channel closed"))
    }
}

/// Table of live worker handles keyed by `WorkerId`
///
/// Ids are never reused, so a late event from a removed worker cannot be
/// mistaken for one from its replacement.
pub struct WorkerPool {
    hasher: Arc<dyn Hasher>,
    chunk_size: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
    workers: BTreeMap<WorkerId, WorkerHandle>,
    next_id: usize,
}

impl WorkerPool {
    /// Create an empty pool whose workers report to `events`
    pub fn new(
        hasher: Arc<dyn Hasher>,
        chunk_size: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            hasher,
            chunk_size,
            events,
            workers: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Spawn a new worker with the next unused id
    pub fn spawn_worker(&mut self) -> WorkerId {
        let id = WorkerId(self.next_id);
        self.next_id += 1;
        let handle = WorkerHandle::spawn(
            id,
            Arc::clone(&self.hasher),
            self.chunk_size,
            self.events.clone(),
        );
        debug!(worker = %id, "Spawned worker");
        self.workers.insert(id, handle);
        id
    }

    /// Look up a live worker
    pub fn get(&self, id: WorkerId) -> Option<&WorkerHandle> {
        self.workers.get(&id)
    }

    /// Number of live workers
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no live workers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of live workers
    pub fn ids(&self) -> Vec<WorkerId> {
        self.workers.keys().copied().collect()
    }

    /// Dispatch an assignment to a worker
    pub fn assign(&self, id: WorkerId, assignment: Assignment) -> Result<()> {
        self.handle(id)?.assign(assignment)
    }

    /// Signal a worker to abort its search
    pub fn abort_current(&self, id: WorkerId) -> Result<()> {
        self.handle(id)?.abort_current()
    }

    /// Ask a worker for a progress event
    pub fn request_progress(&self, id: WorkerId) -> Result<()> {
        self.handle(id)?.request_progress()
    }

    /// Drop a worker from the table, decommissioning it if still running
    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerHandle> {
        let handle = self.workers.remove(&id)?;
        handle.decommission();
        Some(handle)
    }

    /// Decommission every worker
    pub fn decommission_all(&mut self) {
        for handle in std::mem::take(&mut self.workers).into_values() {
            handle.decommission();
        }
    }

    fn handle(&self, id: WorkerId) -> Result<&WorkerHandle> {
        self.get(id)
            .ok_or_else(|| Error::worker(id.index(), "not in the worker pool"))
    }
}

/// Create a tracing span for a worker task
pub fn worker_span(worker: WorkerId) -> Span {
    tracing::info_span!("worker", worker_id = worker.index())
}
