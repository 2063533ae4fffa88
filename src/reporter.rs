//! Progress and result reporting
//!
//! The coordinator emits structured events through a [`Reporter`]. The default
//! [`TracingReporter`] logs them; [`CollectingReporter`] keeps them in memory.

use crate::coordinator::MiningReport;
use crate::types::{Percentage, WorkerId};
use crate::utils::{format_duration, format_hash_rate};
use crate::Error;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{error, info, warn};

/// Progress of one worker on the block being mined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Zero-based index of the block being mined
    pub block_index: usize,
    pub worker: WorkerId,
    pub percentage: Percentage,
}

/// A block accepted into the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMined {
    pub index: usize,
    pub worker: WorkerId,
    pub nonce: u64,
    pub hash: String,
}

/// Sink for mining events
pub trait Reporter: Send + Sync {
    /// A worker reported how far it is through its range
    fn progress(&self, event: &ProgressEvent);

    /// Periodic summary of how many blocks are done
    fn overall_progress(&self, _mined: usize, _target: usize) {}

    /// A block was accepted
    fn block_mined(&self, _event: &BlockMined) {}

    /// The session completed
    fn finished(&self, _report: &MiningReport) {}

    /// The session failed or timed out
    fn failed(&self, _error: &Error) {}
}

/// Reporter that writes events to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn progress(&self, event: &ProgressEvent) {
        info!(
            "{} progress is {} (block {})",
            event.worker,
            event.percentage,
            event.block_index + 1
        );
    }

    fn overall_progress(&self, mined: usize, target: usize) {
        info!(
            "Overall progress so far: successfully mined {} of {} block(s)",
            mined, target
        );
    }

    fn block_mined(&self, event: &BlockMined) {
        info!(
            "Block {} mined by {} with nonce {}: {}",
            event.index + 1,
            event.worker,
            event.nonce,
            event.hash
        );
    }

    fn finished(&self, report: &MiningReport) {
        for audit in report.chain.audit() {
            info!("{}", audit);
        }
        info!(
            "Mined {} block(s) in {} ({} hashes, {})",
            report.chain.len(),
            format_duration(report.elapsed),
            report.stats.total_hashes,
            format_hash_rate(report.hash_rate())
        );
        if report.stats.worker_restarts > 0 {
            warn!("Replaced {} lost worker(s)", report.stats.worker_restarts);
        }
    }

    fn failed(&self, err: &Error) {
        if err.is_timeout() {
            error!("The system did not respond in time: {}", err);
        } else {
            error!("Mining failed [{}]: {}", err.category(), err);
        }
    }
}

/// Recorded reporter event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    Progress(ProgressEvent),
    Overall { mined: usize, target: usize },
    BlockMined(BlockMined),
    Finished { blocks: usize, elapsed: Duration },
    Failed(String),
}

/// Reporter that records every event, for tests and embedding
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().clone()
    }

    /// Recorded worker progress events
    pub fn progress_events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ReportEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recorded accepted blocks
    pub fn blocks_mined(&self) -> Vec<BlockMined> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ReportEvent::BlockMined(block) => Some(block.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: ReportEvent) {
        self.events.lock().push(event);
    }
}

impl Reporter for CollectingReporter {
    fn progress(&self, event: &ProgressEvent) {
        self.record(ReportEvent::Progress(event.clone()));
    }

    fn overall_progress(&self, mined: usize, target: usize) {
        self.record(ReportEvent::Overall { mined, target });
    }

    fn block_mined(&self, event: &BlockMined) {
        self.record(ReportEvent::BlockMined(event.clone()));
    }

    fn finished(&self, report: &MiningReport) {
        self.record(ReportEvent::Finished {
            blocks: report.chain.len(),
            elapsed: report.elapsed,
        });
    }

    fn failed(&self, err: &Error) {
        self.record(ReportEvent::Failed(err.to_string()));
    }
}
