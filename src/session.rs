//! Mining session state
//!
//! All mutable state of a running session lives in [`MiningSession`], which is
//! owned by the coordinator task alone. It decides which nonce range goes to which
//! worker and whether a reported result is accepted into the chain. It performs no
//! I/O; the coordinator turns its decisions into messages.
//!
//! Every block template carries a [`Generation`]. A result is only accepted while
//! the session is not awaiting a new block and the result's generation equals the
//! current one, so reports about earlier templates are discarded even when they
//! arrive after the chain has moved on.

use crate::block::{BlockTemplate, Payload};
use crate::chain::Chain;
use crate::crypto::Hasher;
use crate::types::{Generation, HashResult, NonceRange, WorkOrder, WorkerId};
use crate::worker::{Assignment, WorkerStatus};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters accumulated over a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Nonces hashed by all workers, including aborted and stale searches
    pub total_hashes: u64,
    /// Results discarded because they belonged to an earlier template
    pub stale_reports: u64,
    /// Assignments that ended without a satisfying nonce
    pub exhausted_reports: u64,
    /// Workers spawned to replace lost ones
    pub worker_restarts: u32,
}

/// Why a finished report did not extend the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The range was exhausted or aborted
    NoResult,
    /// A block was already accepted and the next template is not ready
    AwaitingNewBlock,
    /// The result belongs to an earlier template
    Stale {
        generation: Generation,
        current: Generation,
    },
    /// The reporting worker is not part of the session
    UnknownWorker,
}

/// Decision taken for a finished report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The block was sealed and appended at `index`
    Accepted {
        index: usize,
        nonce: u64,
        hash: String,
    },
    Rejected(Rejection),
}

/// Single-owner state of one mining session
#[derive(Debug)]
pub struct MiningSession {
    order: WorkOrder,
    chain: Chain,
    current: Option<Arc<BlockTemplate>>,
    generation: Generation,
    /// `None` once the nonce space of the current template has been handed out
    next_start_nonce: Option<u64>,
    awaiting_new_block: bool,
    workers: BTreeMap<WorkerId, WorkerStatus>,
    stats: SessionStats,
}

impl MiningSession {
    /// Create a session with an empty chain and no workers
    pub fn new(order: WorkOrder, hasher: Arc<dyn Hasher>) -> Self {
        Self {
            order,
            chain: Chain::new(hasher),
            current: None,
            generation: Generation::default(),
            next_start_nonce: Some(0),
            awaiting_new_block: true,
            workers: BTreeMap::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn order(&self) -> &WorkOrder {
        &self.order
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Template currently being mined
    pub fn current_block(&self) -> Option<&Arc<BlockTemplate>> {
        self.current.as_ref()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// First nonce of the next dispatch
    pub fn next_start_nonce(&self) -> Option<u64> {
        self.next_start_nonce
    }

    pub fn awaiting_new_block(&self) -> bool {
        self.awaiting_new_block
    }

    /// Whether the chain reached the requested length
    pub fn is_complete(&self) -> bool {
        self.chain.len() >= self.order.blocks_to_mine()
    }

    /// Whether `generation` is the template currently being mined
    pub fn is_current(&self, generation: Generation) -> bool {
        !self.awaiting_new_block && self.generation == generation
    }

    /// Register a worker as idle
    pub fn add_worker(&mut self, id: WorkerId) {
        self.workers.insert(id, WorkerStatus::Idle);
    }

    /// Forget a worker; its outstanding range is abandoned
    pub fn remove_worker(&mut self, id: WorkerId) -> Option<WorkerStatus> {
        self.workers.remove(&id)
    }

    pub fn worker_status(&self, id: WorkerId) -> Option<WorkerStatus> {
        self.workers.get(&id).copied()
    }

    /// Number of registered workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers currently searching, in id order
    pub fn mining_workers(&self) -> Vec<WorkerId> {
        self.workers_with(WorkerStatus::Mining)
    }

    /// Workers waiting for an assignment, in id order
    pub fn idle_workers(&self) -> Vec<WorkerId> {
        self.workers_with(WorkerStatus::Idle)
    }

    fn workers_with(&self, wanted: WorkerStatus) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, status)| **status == wanted)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Start mining a new block on top of the chain head
    ///
    /// Bumps the generation, resets the nonce cursor and clears the
    /// awaiting-new-block flag. Workers still searching the previous template
    /// keep their `Mining` status until they report.
    pub fn begin_block(&mut self, payload: Payload) -> Arc<BlockTemplate> {
        self.generation = self.generation.next();
        let template = Arc::new(BlockTemplate::new(
            self.generation,
            self.chain.last_hash(),
            payload,
        ));
        self.current = Some(Arc::clone(&template));
        self.next_start_nonce = Some(0);
        self.awaiting_new_block = false;
        template
    }

    /// Hand consecutive nonce ranges of the current template to every idle worker
    ///
    /// Ranges never overlap within a template. The last range is clipped at
    /// `u64::MAX`; after that no further ranges are issued for the template.
    pub fn assign_idle_workers(&mut self) -> Result<Vec<(WorkerId, Assignment)>> {
        if self.awaiting_new_block {
            return Ok(Vec::new());
        }
        let Some(block) = self.current.clone() else {
            return Ok(Vec::new());
        };

        let workload = self.order.workload_per_worker();
        let difficulty = self.order.difficulty();
        let mut assignments = Vec::new();

        for id in self.idle_workers() {
            let Some(start) = self.next_start_nonce else {
                break;
            };
            let range = NonceRange::new(start, start.saturating_add(workload - 1))?;
            self.mark_mining(id)?;
            self.next_start_nonce = range.end().checked_add(1);
            assignments.push((
                id,
                Assignment {
                    block: Arc::clone(&block),
                    range,
                    difficulty,
                },
            ));
        }

        Ok(assignments)
    }

    /// Whether the current template can make no further progress
    ///
    /// True when its nonce space is fully handed out, every range came back
    /// without a match and no block is pending.
    pub fn is_stalled(&self) -> bool {
        !self.awaiting_new_block
            && self.current.is_some()
            && self.next_start_nonce.is_none()
            && self.mining_workers().is_empty()
    }

    /// Transition a worker from idle to mining
    pub fn mark_mining(&mut self, id: WorkerId) -> Result<()> {
        match self.workers.get_mut(&id) {
            Some(status) if *status == WorkerStatus::Idle => {
                *status = WorkerStatus::Mining;
                Ok(())
            }
            Some(_) => Err(Error::protocol(format!(
                "{} is already mining and cannot take another assignment",
                id
            ))),
            None => Err(Error::protocol(format!("{} is not part of the session", id))),
        }
    }

    /// Apply a worker's finished report
    ///
    /// The worker becomes idle regardless of the outcome. When several workers
    /// find a nonce for the same template, the first report processed wins and
    /// the others are rejected as stale.
    pub fn on_worker_finished(
        &mut self,
        worker: WorkerId,
        generation: Generation,
        result: Option<HashResult>,
        processed: u64,
    ) -> Result<FinishOutcome> {
        self.stats.total_hashes += processed;

        match self.workers.get_mut(&worker) {
            Some(status) => *status = WorkerStatus::Idle,
            None => return Ok(FinishOutcome::Rejected(Rejection::UnknownWorker)),
        }

        let Some(result) = result else {
            self.stats.exhausted_reports += 1;
            return Ok(FinishOutcome::Rejected(Rejection::NoResult));
        };

        if self.awaiting_new_block {
            self.stats.stale_reports += 1;
            return Ok(FinishOutcome::Rejected(Rejection::AwaitingNewBlock));
        }

        let template = match &self.current {
            Some(template) if template.generation() == generation => Arc::clone(template),
            _ => {
                self.stats.stale_reports += 1;
                return Ok(FinishOutcome::Rejected(Rejection::Stale {
                    generation,
                    current: self.generation,
                }));
            }
        };

        let index = self.chain.len();
        if !self.order.difficulty().is_met_by(&result.hash) {
            return Err(Error::validation(
                index,
                format!(
                    "hash {} does not meet difficulty {}",
                    result.hash,
                    self.order.difficulty()
                ),
            ));
        }

        let block = template.seal(result);
        let nonce = block.nonce;
        let hash = block.hash.clone();
        self.chain.append(block)?;
        self.awaiting_new_block = true;

        Ok(FinishOutcome::Accepted { index, nonce, hash })
    }

    /// Count a replacement for a lost worker; returns the total so far
    pub fn record_worker_restart(&mut self) -> u32 {
        self.stats.worker_restarts += 1;
        self.stats.worker_restarts
    }

    /// Consume the session, keeping its chain
    pub fn into_chain(self) -> Chain {
        self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Sha256Hasher;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::time::Duration;

    fn order(blocks: usize, workers: usize, workload: u64, difficulty: u32) -> WorkOrder {
        WorkOrder::new(blocks, workers, workload, difficulty, Duration::from_secs(1)).unwrap()
    }

    fn session(blocks: usize, workers: usize, workload: u64, difficulty: u32) -> MiningSession {
        let mut session = MiningSession::new(
            order(blocks, workers, workload, difficulty),
            Arc::new(Sha256Hasher),
        );
        for id in 0..workers {
            session.add_worker(WorkerId(id));
        }
        session
    }

    fn payload(n: i64) -> Payload {
        Payload::new(1_600_000_000 + n, format!("payload-{}", n).into_bytes())
    }

    /// Hash result for `nonce` on the session's current template
    fn solve(session: &MiningSession, nonce: u64) -> HashResult {
        let template = session.current_block().unwrap();
        HashResult {
            nonce,
            hash: template.hash_with_nonce(&Sha256Hasher, nonce),
        }
    }

    #[test]
    fn test_new_session_is_awaiting_block() {
        let mut session = session(1, 2, 100, 0);
        assert!(session.awaiting_new_block());
        assert!(session.assign_idle_workers().unwrap().is_empty());
        assert_eq!(session.idle_workers(), vec![WorkerId(0), WorkerId(1)]);
    }

    #[test]
    fn test_dispatch_hands_out_disjoint_ranges() {
        let mut session = session(1, 3, 1_000, 0);
        let template = session.begin_block(payload(0));
        assert_eq!(template.previous_hash(), "0");
        assert_eq!(template.generation(), Generation(1));

        let assignments = session.assign_idle_workers().unwrap();
        let ranges: Vec<_> = assignments.iter().map(|(_, a)| (a.range.start(), a.range.end())).collect();
        assert_eq!(ranges, vec![(0, 999), (1_000, 1_999), (2_000, 2_999)]);
        assert_eq!(session.next_start_nonce(), Some(3_000));
        assert_eq!(session.mining_workers().len(), 3);

        // Nobody is idle, nothing more to hand out
        assert!(session.assign_idle_workers().unwrap().is_empty());

        // An exhausted worker gets the next range
        let outcome = session.on_worker_finished(WorkerId(1), Generation(1), None, 1_000).unwrap();
        assert_eq!(outcome, FinishOutcome::Rejected(Rejection::NoResult));
        let assignments = session.assign_idle_workers().unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].0, WorkerId(1));
        assert_eq!(assignments[0].1.range, NonceRange::new(3_000, 3_999).unwrap());
        assert_eq!(session.stats().exhausted_reports, 1);
    }

    #[test]
    fn test_mark_mining_twice_is_protocol_error() {
        let mut session = session(1, 1, 10, 0);
        session.mark_mining(WorkerId(0)).unwrap();
        assert_matches!(session.mark_mining(WorkerId(0)), Err(Error::Protocol { .. }));
        assert_matches!(session.mark_mining(WorkerId(5)), Err(Error::Protocol { .. }));
    }

    #[test]
    fn test_accepts_result_and_links_chain() {
        let mut session = session(2, 1, 10, 0);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let result = solve(&session, 0);
        let outcome = session
            .on_worker_finished(WorkerId(0), Generation(1), Some(result.clone()), 1)
            .unwrap();
        assert_eq!(
            outcome,
            FinishOutcome::Accepted {
                index: 0,
                nonce: 0,
                hash: result.hash.clone()
            }
        );
        assert!(session.awaiting_new_block());
        assert!(!session.is_complete());
        assert_eq!(session.worker_status(WorkerId(0)), Some(WorkerStatus::Idle));

        let template = session.begin_block(payload(1));
        assert_eq!(template.previous_hash(), result.hash);
        assert_eq!(template.generation(), Generation(2));
        assert_eq!(session.next_start_nonce(), Some(0));
    }

    #[test]
    fn test_second_result_for_same_block_is_discarded() {
        let mut session = session(3, 2, 10, 0);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let first = solve(&session, 0);
        let second = solve(&session, 10);
        assert_matches!(
            session.on_worker_finished(WorkerId(0), Generation(1), Some(first), 1),
            Ok(FinishOutcome::Accepted { index: 0, .. })
        );
        assert_eq!(
            session
                .on_worker_finished(WorkerId(1), Generation(1), Some(second), 1)
                .unwrap(),
            FinishOutcome::Rejected(Rejection::AwaitingNewBlock)
        );
        assert_eq!(session.chain().len(), 1);
        assert_eq!(session.stats().stale_reports, 1);
    }

    #[test]
    fn test_stale_result_after_new_template_is_discarded() {
        let mut session = session(3, 2, 10, 0);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let winner = solve(&session, 0);
        let late = solve(&session, 10);
        session
            .on_worker_finished(WorkerId(0), Generation(1), Some(winner), 1)
            .unwrap();
        session.begin_block(payload(1));

        // Worker 1 still reports for generation 1
        assert_eq!(
            session
                .on_worker_finished(WorkerId(1), Generation(1), Some(late), 1)
                .unwrap(),
            FinishOutcome::Rejected(Rejection::Stale {
                generation: Generation(1),
                current: Generation(2)
            })
        );
        assert_eq!(session.chain().len(), 1);
        assert_eq!(session.worker_status(WorkerId(1)), Some(WorkerStatus::Idle));
    }

    #[test]
    fn test_result_not_meeting_difficulty_is_fatal() {
        let mut session = session(1, 1, 10, 64);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let result = solve(&session, 3);
        assert_matches!(
            session.on_worker_finished(WorkerId(0), Generation(1), Some(result), 4),
            Err(Error::Validation { index: 0, .. })
        );
        assert!(session.chain().is_empty());
    }

    #[test]
    fn test_forged_hash_is_rejected_by_chain() {
        let mut session = session(1, 1, 10, 1);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let forged = HashResult {
            nonce: 1,
            hash: "0".repeat(64),
        };
        assert_matches!(
            session.on_worker_finished(WorkerId(0), Generation(1), Some(forged), 1),
            Err(Error::Validation { .. })
        );
        assert!(session.chain().is_empty());
        assert!(!session.awaiting_new_block());
    }

    #[test]
    fn test_unknown_worker_report_is_ignored() {
        let mut session = session(1, 1, 10, 0);
        session.begin_block(payload(0));
        let result = solve(&session, 0);
        assert_eq!(
            session
                .on_worker_finished(WorkerId(7), Generation(1), Some(result), 1)
                .unwrap(),
            FinishOutcome::Rejected(Rejection::UnknownWorker)
        );
        assert!(session.chain().is_empty());
    }

    #[test]
    fn test_completion_after_requested_blocks() {
        let mut session = session(2, 1, 10, 0);
        for n in 0..2 {
            session.begin_block(payload(n));
            session.assign_idle_workers().unwrap();
            let generation = session.generation();
            let result = solve(&session, 0);
            session
                .on_worker_finished(WorkerId(0), generation, Some(result), 1)
                .unwrap();
        }
        assert!(session.is_complete());
        assert!(session.chain().verify());
        assert_eq!(session.stats().total_hashes, 2);

        let chain = session.into_chain();
        assert_eq!(chain.blocks()[1].previous_hash, chain.blocks()[0].hash);
    }

    #[test]
    fn test_nonce_space_exhaustion_stalls() {
        let mut session = session(1, 2, u64::MAX / 2 + 1, 64);
        session.begin_block(payload(0));

        let assignments = session.assign_idle_workers().unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[1].1.range.end(), u64::MAX);
        assert_eq!(session.next_start_nonce(), None);
        assert!(!session.is_stalled());

        session.on_worker_finished(WorkerId(0), Generation(1), None, 0).unwrap();
        assert!(session.assign_idle_workers().unwrap().is_empty());
        assert!(!session.is_stalled());

        session.on_worker_finished(WorkerId(1), Generation(1), None, 0).unwrap();
        assert!(session.is_stalled());
    }

    #[test]
    fn test_removed_worker_is_not_dispatched() {
        let mut session = session(1, 3, 10, 0);
        assert_eq!(session.remove_worker(WorkerId(1)), Some(WorkerStatus::Idle));
        assert_eq!(session.remove_worker(WorkerId(1)), None);
        assert_eq!(session.worker_count(), 2);

        session.begin_block(payload(0));
        let ids: Vec<_> = session
            .assign_idle_workers()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![WorkerId(0), WorkerId(2)]);

        session.add_worker(WorkerId(3));
        assert_eq!(session.idle_workers(), vec![WorkerId(3)]);
        assert_eq!(session.worker_count(), 3);
    }

    #[test]
    fn test_aborted_report_after_win_is_not_redispatched() {
        let mut session = session(2, 2, 1_000, 0);
        session.begin_block(payload(0));
        session.assign_idle_workers().unwrap();

        let winner = solve(&session, 0);
        session
            .on_worker_finished(WorkerId(0), Generation(1), Some(winner), 1)
            .unwrap();

        // The other worker was told to abort and comes back empty-handed
        assert_eq!(
            session.on_worker_finished(WorkerId(1), Generation(1), None, 300).unwrap(),
            FinishOutcome::Rejected(Rejection::NoResult)
        );
        assert_eq!(session.chain().len(), 1);
        // Nothing is handed out until the next template exists
        assert!(session.assign_idle_workers().unwrap().is_empty());
        assert_eq!(session.stats().total_hashes, 301);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_ranges_are_disjoint_and_contiguous(
            workers in 1usize..6,
            workload in 1u64..10_000,
            finish_order in proptest::collection::vec(0usize..6, 1..40),
        ) {
            let mut session = session(1, workers, workload, 64);
            session.begin_block(payload(0));

            let mut ranges: Vec<NonceRange> = session
                .assign_idle_workers()
                .unwrap()
                .into_iter()
                .map(|(_, assignment)| assignment.range)
                .collect();

            for pick in finish_order {
                let mining = session.mining_workers();
                let id = mining[pick % mining.len()];
                session.on_worker_finished(id, Generation(1), None, workload).unwrap();
                for (_, assignment) in session.assign_idle_workers().unwrap() {
                    ranges.push(assignment.range);
                }
            }

            for (i, range) in ranges.iter().enumerate() {
                prop_assert_eq!(range.start(), i as u64 * workload);
                prop_assert_eq!(range.len(), workload);
            }
            for (i, a) in ranges.iter().enumerate() {
                for b in &ranges[i + 1..] {
                    prop_assert!(!a.overlaps(b));
                }
            }
        }
    }
}
