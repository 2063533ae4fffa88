//! Chunked nonce search
//!
//! Scans one assigned nonce range for the first nonce whose hash satisfies the
//! difficulty. The range is walked in fixed-size chunks; the abort signal is
//! consulted only at chunk boundaries, so cancellation latency is bounded by the
//! chunk size rather than by the size of the range.

use crate::block::BlockTemplate;
use crate::crypto::Hasher;
use crate::types::{Difficulty, HashResult, NonceRange};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Default number of nonces hashed between abort checks
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000;

/// How a search ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A nonce satisfying the difficulty was found
    Found(HashResult),
    /// The whole range was scanned without a match
    Exhausted,
    /// The abort signal was observed at a chunk boundary
    Aborted,
}

/// Result of scanning one nonce range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub outcome: SearchOutcome,
    /// Number of nonces hashed
    pub processed: u64,
}

impl SearchResult {
    /// Whether a satisfying nonce was found
    pub fn found(&self) -> bool {
        matches!(self.outcome, SearchOutcome::Found(_))
    }

    /// The winning nonce and hash, if any
    pub fn hash_result(&self) -> Option<&HashResult> {
        match &self.outcome {
            SearchOutcome::Found(result) => Some(result),
            _ => None,
        }
    }

    /// Take the winning nonce and hash, if any
    pub fn into_hash_result(self) -> Option<HashResult> {
        match self.outcome {
            SearchOutcome::Found(result) => Some(result),
            _ => None,
        }
    }
}

/// Nonce search over one block template
pub struct Search<'a> {
    block: &'a BlockTemplate,
    hasher: &'a dyn Hasher,
    difficulty: Difficulty,
    chunk_size: u64,
}

impl<'a> Search<'a> {
    /// Create a search using [`DEFAULT_CHUNK_SIZE`]
    pub fn new(block: &'a BlockTemplate, hasher: &'a dyn Hasher, difficulty: Difficulty) -> Self {
        Self {
            block,
            hasher,
            difficulty,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Override the chunk size (values below 1 are treated as 1)
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Scan `range` without progress reporting
    pub fn run(&self, range: NonceRange, abort: &CancellationToken) -> SearchResult {
        let progress = AtomicU64::new(0);
        self.run_with_progress(range, abort, &progress)
    }

    /// Scan `range`, adding the number of hashed nonces to `progress` after each chunk
    ///
    /// Returns the lowest satisfying nonce in the range. Stops immediately on a
    /// match, on exhaustion, or when `abort` is observed between chunks.
    pub fn run_with_progress(
        &self,
        range: NonceRange,
        abort: &CancellationToken,
        progress: &AtomicU64,
    ) -> SearchResult {
        let mut buf = Vec::with_capacity(
            self.block.previous_hash().len() + self.block.payload().data.len() + 40,
        );
        let mut processed = 0u64;
        let mut chunk_start = range.start();

        loop {
            if abort.is_cancelled() {
                return SearchResult {
                    outcome: SearchOutcome::Aborted,
                    processed,
                };
            }

            let chunk_end = chunk_start
                .saturating_add(self.chunk_size - 1)
                .min(range.end());

            for nonce in chunk_start..=chunk_end {
                self.block.write_hash_input(nonce, &mut buf);
                let hash = self.hasher.digest(&buf);
                if self.difficulty.is_met_by(&hash) {
                    let hashed = nonce - chunk_start + 1;
                    progress.fetch_add(hashed, Ordering::Relaxed);
                    return SearchResult {
                        outcome: SearchOutcome::Found(HashResult { nonce, hash }),
                        processed: processed + hashed,
                    };
                }
            }

            let hashed = chunk_end - chunk_start + 1;
            processed += hashed;
            progress.fetch_add(hashed, Ordering::Relaxed);

            if chunk_end == range.end() {
                return SearchResult {
                    outcome: SearchOutcome::Exhausted,
                    processed,
                };
            }
            chunk_start = chunk_end + 1;
        }
    }
}

/// Scan `start..=end` of `block` for a nonce meeting `difficulty`
pub fn search(
    block: &BlockTemplate,
    hasher: &dyn Hasher,
    difficulty: Difficulty,
    range: NonceRange,
    abort: &CancellationToken,
) -> SearchResult {
    Search::new(block, hasher, difficulty).run(range, abort)
}
