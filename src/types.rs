//! Core types for the mining coordinator
//!
//! Small value types shared by the search, worker and coordinator layers, plus
//! the validated `WorkOrder` that configures a mining session.

use crate::crypto::DIGEST_HEX_LEN;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Monotonically increasing block-template generation
///
/// Each new block template gets the next generation; a worker report is current
/// only if it carries the generation of the template being mined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    /// Get the generation value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The generation following this one
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a worker in the coordinator's worker table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Get the table index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker_{}", self.0)
    }
}

/// Required number of leading zero hex digits in an accepted hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Difficulty(u32);

impl Difficulty {
    /// Highest satisfiable difficulty for a 256-bit digest
    pub const MAX: u32 = DIGEST_HEX_LEN as u32;

    /// Create a difficulty, rejecting values no digest could satisfy
    pub fn new(zeros: u32) -> Result<Self> {
        if zeros > Self::MAX {
            return Err(Error::config(format!(
                "Difficulty {} exceeds the digest length of {} hex digits",
                zeros,
                Self::MAX
            )));
        }
        Ok(Self(zeros))
    }

    /// Get the number of required leading zeros
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The all-zero prefix an accepted hash must start with
    pub fn target_prefix(&self) -> String {
        "0".repeat(self.0 as usize)
    }

    /// Check whether a hex hash satisfies this difficulty
    pub fn is_met_by(&self, hash: &str) -> bool {
        let zeros = self.0 as usize;
        hash.len() >= zeros && hash.as_bytes()[..zeros].iter().all(|&b| b == b'0')
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive range of nonces handed to one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonceRange {
    start: u64,
    end: u64,
}

impl NonceRange {
    /// Create a range covering `start..=end`
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid_state(format!(
                "Invalid nonce range: start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Range of `len` nonces beginning at `start`, if it fits in `u64`
    pub fn starting_at(start: u64, len: u64) -> Option<Self> {
        let end = start.checked_add(len.checked_sub(1)?)?;
        Some(Self { start, end })
    }

    /// First nonce of the range
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last nonce of the range (inclusive)
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of nonces covered, saturating for the full `u64` space
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Ranges always hold at least one nonce
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check whether a nonce lies in the range
    pub fn contains(&self, nonce: u64) -> bool {
        self.start <= nonce && nonce <= self.end
    }

    /// Check whether two ranges share any nonce
    pub fn overlaps(&self, other: &NonceRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Winning nonce and the hash it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashResult {
    /// Nonce that satisfied the difficulty
    pub nonce: u64,
    /// Hex hash of the block with that nonce
    pub hash: String,
}

/// Progress percentage with two decimal places
///
/// Stored as hundredths of a percent so rounding is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Percentage(u32);

impl Percentage {
    /// `processed / total * 100`, rounded half-up to two decimals
    ///
    /// The percentage itself keeps two decimals (`12.35%`), not the ratio, so
    /// progress is reported finer than whole percents.
    pub fn of(processed: u64, total: u64) -> Self {
        if total == 0 {
            return Self(0);
        }
        let processed = processed.min(total) as u128;
        let total = total as u128;
        let hundredths = (processed * 20_000 + total) / (2 * total);
        Self(hundredths as u32)
    }

    /// Percentage in hundredths (e.g. `1234` for 12.34%)
    pub fn hundredths(&self) -> u32 {
        self.0
    }

    /// Percentage as a float
    pub fn value(&self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// Immutable description of one mining session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    blocks_to_mine: usize,
    worker_count: usize,
    workload_per_worker: u64,
    difficulty: Difficulty,
    progress_interval: Duration,
}

impl WorkOrder {
    /// Create a work order, validating every field
    pub fn new(
        blocks_to_mine: usize,
        worker_count: usize,
        workload_per_worker: u64,
        difficulty: u32,
        progress_interval: Duration,
    ) -> Result<Self> {
        if blocks_to_mine == 0 {
            return Err(Error::config("Number of blocks to mine must be greater than 0"));
        }
        if worker_count == 0 {
            return Err(Error::config("Worker count must be greater than 0"));
        }
        if workload_per_worker == 0 {
            return Err(Error::config("Workload per worker must be greater than 0"));
        }
        if progress_interval.is_zero() {
            return Err(Error::config("Progress interval must be greater than 0"));
        }

        Ok(Self {
            blocks_to_mine,
            worker_count,
            workload_per_worker,
            difficulty: Difficulty::new(difficulty)?,
            progress_interval,
        })
    }

    /// Target chain length
    pub fn blocks_to_mine(&self) -> usize {
        self.blocks_to_mine
    }

    /// Number of concurrent workers
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Size of the nonce range handed out per dispatch
    pub fn workload_per_worker(&self) -> u64 {
        self.workload_per_worker
    }

    /// Required leading zero hex digits
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    /// Interval between progress reports
    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_difficulty_predicate() {
        let difficulty = Difficulty::new(4).unwrap();
        assert_eq!(difficulty.target_prefix(), "0000");
        assert!(difficulty.is_met_by("0000abcd"));
        assert!(difficulty.is_met_by("00000000"));
        assert!(!difficulty.is_met_by("000abcde"));
        assert!(!difficulty.is_met_by("000"));

        let zero = Difficulty::new(0).unwrap();
        assert!(zero.is_met_by("ffff"));
        assert!(zero.is_met_by(""));
    }

    #[test]
    fn test_difficulty_bounds() {
        assert!(Difficulty::new(Difficulty::MAX).is_ok());
        assert_matches!(Difficulty::new(Difficulty::MAX + 1), Err(Error::Config { .. }));
    }

    #[test]
    fn test_nonce_range() {
        let range = NonceRange::new(1000, 1999).unwrap();
        assert_eq!(range.len(), 1000);
        assert!(range.contains(1000));
        assert!(range.contains(1999));
        assert!(!range.contains(2000));
        assert_eq!(range.to_string(), "1000..=1999");

        assert!(NonceRange::new(5, 4).is_err());
        assert_eq!(NonceRange::new(7, 7).unwrap().len(), 1);
        assert_eq!(NonceRange::new(0, u64::MAX).unwrap().len(), u64::MAX);
    }

    #[test]
    fn test_nonce_range_starting_at() {
        let range = NonceRange::starting_at(0, 1000).unwrap();
        assert_eq!((range.start(), range.end()), (0, 999));

        assert!(NonceRange::starting_at(u64::MAX, 1).is_some());
        assert!(NonceRange::starting_at(u64::MAX, 2).is_none());
        assert!(NonceRange::starting_at(10, 0).is_none());
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(Percentage::of(0, 1000).to_string(), "0.00%");
        assert_eq!(Percentage::of(1000, 1000).to_string(), "100.00%");
        assert_eq!(Percentage::of(1, 3).to_string(), "33.33%");
        assert_eq!(Percentage::of(2, 3).to_string(), "66.67%");
        // 1/8 = 12.5% exactly, 1/16 = 6.25%, 1/32 = 3.125% rounds up
        assert_eq!(Percentage::of(1, 8).to_string(), "12.50%");
        assert_eq!(Percentage::of(1, 32).to_string(), "3.13%");
        assert_eq!(Percentage::of(1, 0), Percentage::default());
        assert_eq!(Percentage::of(5, 4).hundredths(), 10_000);
        assert_eq!(Percentage::of(1, 4).value(), 25.0);
    }

    #[test]
    fn test_work_order_validation() {
        let interval = Duration::from_secs(1);
        let order = WorkOrder::new(10, 7, 5_000_000, 6, interval).unwrap();
        assert_eq!(order.blocks_to_mine(), 10);
        assert_eq!(order.worker_count(), 7);
        assert_eq!(order.workload_per_worker(), 5_000_000);
        assert_eq!(order.difficulty().value(), 6);
        assert_eq!(order.progress_interval(), interval);

        assert_matches!(WorkOrder::new(0, 1, 1, 1, interval), Err(Error::Config { .. }));
        assert_matches!(WorkOrder::new(1, 0, 1, 1, interval), Err(Error::Config { .. }));
        assert_matches!(WorkOrder::new(1, 1, 0, 1, interval), Err(Error::Config { .. }));
        assert_matches!(WorkOrder::new(1, 1, 1, 65, interval), Err(Error::Config { .. }));
        assert_matches!(
            WorkOrder::new(1, 1, 1, 1, Duration::ZERO),
            Err(Error::Config { .. })
        );
    }

    proptest! {
        #[test]
        fn prop_difficulty_matches_prefix(hash in "[0-9a-f]{64}", zeros in 0u32..=64) {
            let difficulty = Difficulty::new(zeros).unwrap();
            let expected = hash.starts_with(&difficulty.target_prefix());
            prop_assert_eq!(difficulty.is_met_by(&hash), expected);
        }

        #[test]
        fn prop_percentage_is_bounded_and_monotonic(total in 1u64..1_000_000, a in 0u64..1_000_000, b in 0u64..1_000_000) {
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            let p_low = Percentage::of(low.min(total), total);
            let p_high = Percentage::of(high.min(total), total);
            prop_assert!(p_high.hundredths() <= 10_000);
            prop_assert!(p_low <= p_high);
        }
    }
}
