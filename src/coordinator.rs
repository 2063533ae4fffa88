//! Mining coordinator
//!
//! The coordinator is a single task that owns the [`MiningSession`] and the worker
//! pool. It reacts to three sources: commands from its [`CoordinatorHandle`],
//! events from workers and a periodic progress tick. Follow-up actions it decides
//! on itself (start a new block, hand out work, replace a lost worker) go through
//! an internal trigger queue that is drained before the next external event is
//! taken, so a session's state never changes between a decision and its effects.

use crate::block::PayloadSource;
use crate::chain::Chain;
use crate::crypto::Hasher;
use crate::reporter::{BlockMined, ProgressEvent, Reporter};
use crate::search::DEFAULT_CHUNK_SIZE;
use crate::session::{FinishOutcome, MiningSession, SessionStats};
use crate::types::{WorkOrder, WorkerId};
use crate::utils::compute_hash_rate;
use crate::worker::{WorkerEvent, WorkerPool};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

/// Default number of lost workers replaced in one session
pub const DEFAULT_MAX_WORKER_RESTARTS: u32 = 10;

/// Outcome of a completed session
#[derive(Debug)]
pub struct MiningReport {
    pub chain: Chain,
    pub elapsed: Duration,
    pub stats: SessionStats,
}

impl MiningReport {
    /// Average hashes per second over the whole session
    pub fn hash_rate(&self) -> f64 {
        compute_hash_rate(self.stats.total_hashes, self.elapsed)
    }
}

/// Tunables that are not part of a work order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Nonces hashed between abort checks
    pub chunk_size: u64,
    /// Spawn a fresh worker when one terminates unexpectedly
    pub replace_lost_workers: bool,
    /// Replacements allowed per session before it fails
    pub max_worker_restarts: u32,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            replace_lost_workers: true,
            max_worker_restarts: DEFAULT_MAX_WORKER_RESTARTS,
        }
    }
}

/// Messages accepted by the coordinator task
enum Command {
    Start {
        order: WorkOrder,
        reply: oneshot::Sender<Result<MiningReport>>,
    },
    Shutdown,
}

/// Follow-up actions queued by the coordinator itself
#[derive(Debug)]
enum Trigger {
    NewBlockTemplate,
    AssignWorkload,
    WorkerLost { worker: WorkerId, reason: String },
}

/// Builder for the coordinator task
pub struct Coordinator {
    hasher: Arc<dyn Hasher>,
    payloads: Arc<dyn PayloadSource>,
    reporter: Arc<dyn Reporter>,
    options: CoordinatorOptions,
}

impl Coordinator {
    /// Create a coordinator with default options
    pub fn new(
        hasher: Arc<dyn Hasher>,
        payloads: Arc<dyn PayloadSource>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            hasher,
            payloads,
            reporter,
            options: CoordinatorOptions::default(),
        }
    }

    /// Override the coordinator options
    pub fn with_options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawn the coordinator task
    pub fn spawn(self) -> CoordinatorHandle {
        let (commands, receiver) = mpsc::unbounded_channel();
        let reporter = Arc::clone(&self.reporter);
        let task = tokio::spawn(self.run(receiver));
        CoordinatorHandle {
            commands,
            reporter,
            task,
        }
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        match commands.recv().await {
            Some(Command::Start { order, reply }) => {
                let result = self.run_session(order, &mut commands).await;
                let _ = reply.send(result);
            }
            Some(Command::Shutdown) | None => debug!("Coordinator stopped before a session started"),
        }
    }

    async fn run_session(
        &self,
        order: WorkOrder,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<MiningReport> {
        let span = info_span!(
            "mining_session",
            blocks = order.blocks_to_mine(),
            workers = order.worker_count(),
            difficulty = order.difficulty().value()
        );

        async move {
            let started = Instant::now();
            let (events_tx, events) = mpsc::unbounded_channel();
            let mut pool = WorkerPool::new(Arc::clone(&self.hasher), self.options.chunk_size, events_tx);
            let mut session = MiningSession::new(order, Arc::clone(&self.hasher));

            for _ in 0..session.order().worker_count() {
                let id = pool.spawn_worker();
                session.add_worker(id);
            }
            info!(
                "Mining {} block(s) with {} worker(s) at difficulty {} using {}",
                session.order().blocks_to_mine(),
                session.order().worker_count(),
                session.order().difficulty(),
                self.hasher.name()
            );

            let result = self.drive(&mut session, &mut pool, events, commands).await;
            pool.decommission_all();

            result.map(|()| MiningReport {
                stats: session.stats(),
                elapsed: started.elapsed(),
                chain: session.into_chain(),
            })
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        session: &mut MiningSession,
        pool: &mut WorkerPool,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<()> {
        let period = session.order().progress_interval();
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggers = VecDeque::from([Trigger::NewBlockTemplate]);

        loop {
            while let Some(trigger) = triggers.pop_front() {
                if self.apply_trigger(session, pool, trigger, &mut triggers)? {
                    return Ok(());
                }
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { reply, .. }) => {
                        warn!("Start requested while a session is running");
                        let _ = reply.send(Err(Error::invalid_state(
                            "a mining session is already running",
                        )));
                    }
                    Some(Command::Shutdown) | None => {
                        info!("Shutting down mining session");
                        return Err(Error::cancelled("mining session"));
                    }
                },
                event = events.recv() => match event {
                    Some(event) => self.handle_event(session, event, &mut triggers)?,
                    None => return Err(Error::invalid_state("worker event channel closed")),
                },
                _ = ticker.tick() => self.report_progress(session, pool, &mut triggers),
            }
        }
    }

    /// Apply one queued trigger; returns `true` once the session is complete
    fn apply_trigger(
        &self,
        session: &mut MiningSession,
        pool: &mut WorkerPool,
        trigger: Trigger,
        triggers: &mut VecDeque<Trigger>,
    ) -> Result<bool> {
        match trigger {
            Trigger::NewBlockTemplate => {
                if session.is_complete() {
                    info!("Mined all {} block(s)", session.chain().len());
                    return Ok(true);
                }

                for id in session.mining_workers() {
                    if let Err(e) = pool.abort_current(id) {
                        triggers.push_back(Trigger::WorkerLost {
                            worker: id,
                            reason: e.to_string(),
                        });
                    }
                }

                let payload = self.payloads.next_payload()?;
                let template = session.begin_block(payload);
                debug!(
                    block = session.chain().len() + 1,
                    generation = %template.generation(),
                    previous_hash = template.previous_hash(),
                    "Created new block template"
                );
                triggers.push_back(Trigger::AssignWorkload);
            }
            Trigger::AssignWorkload => {
                for (id, assignment) in session.assign_idle_workers()? {
                    debug!(worker = %id, range = %assignment.range, "Dispatching workload");
                    if let Err(e) = pool.assign(id, assignment) {
                        triggers.push_back(Trigger::WorkerLost {
                            worker: id,
                            reason: e.to_string(),
                        });
                    }
                }

                if session.is_stalled() {
                    return Err(Error::invalid_state(format!(
                        "nonce space of block {} exhausted without a match",
                        session.chain().len() + 1
                    )));
                }
            }
            Trigger::WorkerLost { worker, reason } => {
                if session.remove_worker(worker).is_none() {
                    return Ok(false);
                }
                pool.remove(worker);
                warn!(worker = %worker, "Worker terminated unexpectedly: {}", reason);

                if self.options.replace_lost_workers {
                    if session.stats().worker_restarts >= self.options.max_worker_restarts {
                        return Err(Error::worker(
                            worker.index(),
                            format!(
                                "lost after {} replacement(s), giving up",
                                self.options.max_worker_restarts
                            ),
                        ));
                    }
                    session.record_worker_restart();
                    let replacement = pool.spawn_worker();
                    session.add_worker(replacement);
                    info!(worker = %replacement, "Spawned replacement for {}", worker);
                } else if session.worker_count() == 0 {
                    return Err(Error::worker(worker.index(), "no workers left in the pool"));
                }
                triggers.push_back(Trigger::AssignWorkload);
            }
        }

        Ok(false)
    }

    fn handle_event(
        &self,
        session: &mut MiningSession,
        event: WorkerEvent,
        triggers: &mut VecDeque<Trigger>,
    ) -> Result<()> {
        match event {
            WorkerEvent::Finished {
                worker,
                generation,
                result,
                processed,
            } => match session.on_worker_finished(worker, generation, result, processed)? {
                FinishOutcome::Accepted { index, nonce, hash } => {
                    self.reporter.block_mined(&BlockMined {
                        index,
                        worker,
                        nonce,
                        hash,
                    });
                    triggers.push_back(Trigger::NewBlockTemplate);
                }
                FinishOutcome::Rejected(reason) => {
                    debug!(worker = %worker, generation = %generation, ?reason, "Discarded worker report");
                    triggers.push_back(Trigger::AssignWorkload);
                }
            },
            WorkerEvent::Progress {
                worker,
                generation,
                percentage,
            } => {
                if session.is_current(generation) {
                    self.reporter.progress(&ProgressEvent {
                        block_index: session.chain().len(),
                        worker,
                        percentage,
                    });
                }
            }
            WorkerEvent::Lost { worker, reason } => {
                triggers.push_back(Trigger::WorkerLost { worker, reason });
            }
        }

        Ok(())
    }

    fn report_progress(
        &self,
        session: &MiningSession,
        pool: &WorkerPool,
        triggers: &mut VecDeque<Trigger>,
    ) {
        self.reporter
            .overall_progress(session.chain().len(), session.order().blocks_to_mine());

        for id in session.mining_workers() {
            if let Err(e) = pool.request_progress(id) {
                triggers.push_back(Trigger::WorkerLost {
                    worker: id,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Client side of a running coordinator
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    reporter: Arc<dyn Reporter>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Run a mining session and wait for its result
    ///
    /// Fails with [`Error::Timeout`] when the session does not finish within
    /// `deadline`; the session is shut down before this returns and no partial
    /// chain is handed back.
    pub async fn start(&self, order: WorkOrder, deadline: Duration) -> Result<MiningReport> {
        let (reply, mut response) = oneshot::channel();
        self.commands
            .send(Command::Start { order, reply })
            .map_err(|_| Error::invalid_state("coordinator is no longer running"))?;

        let result = match time::timeout(deadline, &mut response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::invalid_state("coordinator stopped without a result")),
            Err(_) => {
                let _ = self.commands.send(Command::Shutdown);
                let _ = response.await;
                Err(Error::timeout(format!(
                    "mining session did not complete within {}",
                    humantime::format_duration(deadline)
                )))
            }
        };

        match &result {
            Ok(report) => self.reporter.finished(report),
            Err(e) => self.reporter.failed(e),
        }
        result
    }

    /// Ask the coordinator to stop its session
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Abandon the running session, e.g. on an interrupt
    ///
    /// Use this when the future returned by [`start`](Self::start) is dropped
    /// instead of awaited; the failure is reported in its place.
    pub fn cancel(&self) -> Error {
        self.shutdown();
        let error = Error::cancelled("mining session");
        self.reporter.failed(&error);
        error
    }

    /// Wait for the coordinator task to end
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Run one mining session to completion or until `deadline`
pub async fn mine(
    order: WorkOrder,
    deadline: Duration,
    hasher: Arc<dyn Hasher>,
    payloads: Arc<dyn PayloadSource>,
    reporter: Arc<dyn Reporter>,
    options: CoordinatorOptions,
) -> Result<MiningReport> {
    let handle = Coordinator::new(hasher, payloads, reporter)
        .with_options(options)
        .spawn();
    let result = handle.start(order, deadline).await;
    handle.join().await;
    result
}
