//! CPU mining worker
//!
//! An actor task that waits for commands and runs at most one nonce search at a
//! time on the blocking thread pool. The search itself only observes the abort
//! token between chunks, so the actor stays responsive to progress queries and
//! abort requests while hashing.

use super::{worker_span, Assignment, WorkerCommand, WorkerEvent};
use crate::crypto::Hasher;
use crate::search::{Search, SearchResult};
use crate::types::{Generation, NonceRange, Percentage, WorkerId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, Instrument};

/// Worker that hashes on the CPU
pub struct CpuWorker {
    id: WorkerId,
    hasher: Arc<dyn Hasher>,
    chunk_size: u64,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

/// The search currently owned by a worker
struct ActiveJob {
    generation: Generation,
    range: NonceRange,
    cancellation: CancellationToken,
    progress: Arc<AtomicU64>,
    handle: JoinHandle<SearchResult>,
}

/// What woke the worker loop
enum Step {
    Searched(std::result::Result<SearchResult, JoinError>),
    Command(Option<WorkerCommand>),
}

impl CpuWorker {
    /// Create a worker; call [`CpuWorker::run`] to start it
    pub fn new(
        id: WorkerId,
        hasher: Arc<dyn Hasher>,
        chunk_size: u64,
        commands: mpsc::UnboundedReceiver<WorkerCommand>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            hasher,
            chunk_size,
            commands,
            events,
        }
    }

    /// Process commands until decommissioned or the command channel closes
    pub async fn run(self) {
        let span = worker_span(self.id);
        self.event_loop().instrument(span).await
    }

    async fn event_loop(mut self) {
        debug!("Worker started");
        let mut job: Option<ActiveJob> = None;

        loop {
            let step = match job.as_mut() {
                Some(active) => tokio::select! {
                    searched = &mut active.handle => Step::Searched(searched),
                    command = self.commands.recv() => Step::Command(command),
                },
                None => Step::Command(self.commands.recv().await),
            };

            match step {
                Step::Searched(Ok(result)) => {
                    if let Some(active) = job.take() {
                        self.report_finished(active.generation, result);
                    }
                }
                Step::Searched(Err(e)) => {
                    job = None;
                    if e.is_panic() {
                        error!("Search task panicked");
                        let _ = self.events.send(WorkerEvent::Lost {
                            worker: self.id,
                            reason: "search task panicked".to_string(),
                        });
                    } else {
                        debug!("Search task cancelled: {}", e);
                    }
                    break;
                }
                Step::Command(Some(WorkerCommand::Assign(assignment))) => {
                    if let Some(active) = &job {
                        error!(
                            generation = %active.generation,
                            "Received an assignment while mining, ignoring it"
                        );
                        continue;
                    }
                    job = Some(self.start(assignment));
                }
                Step::Command(Some(WorkerCommand::AbortCurrent)) => match &job {
                    Some(active) => {
                        debug!(generation = %active.generation, "Aborting search");
                        active.cancellation.cancel();
                    }
                    None => trace!("Abort while idle ignored"),
                },
                Step::Command(Some(WorkerCommand::ReportProgress)) => {
                    if let Some(active) = &job {
                        let processed = active.progress.load(Ordering::Relaxed);
                        let _ = self.events.send(WorkerEvent::Progress {
                            worker: self.id,
                            generation: active.generation,
                            percentage: Percentage::of(processed, active.range.len()),
                        });
                    }
                }
                Step::Command(Some(WorkerCommand::Decommission)) | Step::Command(None) => {
                    if let Some(active) = job.take() {
                        active.cancellation.cancel();
                    }
                    break;
                }
            }
        }

        debug!("Worker stopped");
    }

    fn start(&self, assignment: Assignment) -> ActiveJob {
        let Assignment {
            block,
            range,
            difficulty,
        } = assignment;
        let generation = block.generation();
        debug!(generation = %generation, range = %range, "Starting search");

        let cancellation = CancellationToken::new();
        let progress = Arc::new(AtomicU64::new(0));

        let hasher = Arc::clone(&self.hasher);
        let chunk_size = self.chunk_size;
        let token = cancellation.clone();
        let counter = Arc::clone(&progress);
        let handle = task::spawn_blocking(move || {
            Search::new(&block, hasher.as_ref(), difficulty)
                .with_chunk_size(chunk_size)
                .run_with_progress(range, &token, &counter)
        });

        ActiveJob {
            generation,
            range,
            cancellation,
            progress,
            handle,
        }
    }

    fn report_finished(&self, generation: Generation, result: SearchResult) {
        let processed = result.processed;
        let result = result.into_hash_result();
        match &result {
            Some(hit) => info!(generation = %generation, nonce = hit.nonce, "Found a satisfying nonce"),
            None => debug!(generation = %generation, processed, "Search ended without a match"),
        }

        let _ = self.events.send(WorkerEvent::Finished {
            worker: self.id,
            generation,
            result,
            processed,
        });
    }
}
