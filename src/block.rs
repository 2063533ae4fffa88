//! Blocks, block templates and the payloads they carry
//!
//! A `BlockTemplate` is the immutable, not-yet-solved block that workers search
//! over. Once a winning nonce is accepted the template is sealed into a `Block`.

use crate::crypto::Hasher;
use crate::types::{Generation, HashResult};
use crate::utils::current_timestamp_secs;
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use uuid::Uuid;

/// Start of the window random transaction timestamps are drawn from (2020-01-01T00:00:00Z)
const TRANSACTION_EPOCH_SECS: i64 = 1_577_836_800;

/// Opaque block payload plus the timestamp that participates in the hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Seconds since the Unix epoch
    pub timestamp: i64,
    /// Uninterpreted payload bytes
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl Payload {
    /// Create a payload
    pub fn new(timestamp: i64, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

/// Supplies the payload for each new block template
pub trait PayloadSource: Send + Sync {
    /// Produce the payload for the next block
    fn next_payload(&self) -> Result<Payload>;
}

/// A randomly generated payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub timestamp: i64,
    pub account_number: u32,
    pub amount: f64,
}

impl Transaction {
    /// Generate a transaction with random contents
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let now = current_timestamp_secs() as i64;
        let timestamp = if now > TRANSACTION_EPOCH_SECS {
            rng.random_range(TRANSACTION_EPOCH_SECS..now)
        } else {
            TRANSACTION_EPOCH_SECS
        };

        Self {
            id: Uuid::new_v4(),
            timestamp,
            account_number: rng.random_range(1000..100_000),
            amount: rng.random_range(0.01..1_000_000.0),
        }
    }

    /// Serialize into a block payload
    pub fn to_payload(&self) -> Result<Payload> {
        let data = serde_json::to_vec(self)
            .map_err(|e| Error::payload(format!("Failed to encode transaction {}: {}", self.id, e)))?;
        Ok(Payload::new(self.timestamp, data))
    }
}

/// Payload source producing one random transaction per block
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTransactions;

impl PayloadSource for RandomTransactions {
    fn next_payload(&self) -> Result<Payload> {
        Transaction::random().to_payload()
    }
}

/// Write the hash input `previous_hash || timestamp || nonce || payload` into `buf`
fn write_hash_input(previous_hash: &str, payload: &Payload, nonce: u64, buf: &mut Vec<u8>) {
    buf.clear();
    buf.extend_from_slice(previous_hash.as_bytes());
    // Writing into a Vec cannot fail
    let _ = write!(buf, "{}{}", payload.timestamp, nonce);
    buf.extend_from_slice(&payload.data);
}

/// Block awaiting a winning nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    generation: Generation,
    previous_hash: String,
    payload: Payload,
}

impl BlockTemplate {
    /// Create a template linked to `previous_hash`
    pub fn new(generation: Generation, previous_hash: impl Into<String>, payload: Payload) -> Self {
        Self {
            generation,
            previous_hash: previous_hash.into(),
            payload,
        }
    }

    /// Generation this template belongs to
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Hash of the block this template links to
    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    /// Payload carried by the block
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Fill `buf` with the bytes hashed for `nonce`
    pub fn write_hash_input(&self, nonce: u64, buf: &mut Vec<u8>) {
        write_hash_input(&self.previous_hash, &self.payload, nonce, buf);
    }

    /// Hash this template with the given nonce
    pub fn hash_with_nonce(&self, hasher: &dyn Hasher, nonce: u64) -> String {
        let mut buf = Vec::new();
        self.write_hash_input(nonce, &mut buf);
        hasher.digest(&buf)
    }

    /// Stamp the winning nonce and hash onto the block
    pub fn seal(&self, result: HashResult) -> Block {
        Block {
            previous_hash: self.previous_hash.clone(),
            payload: self.payload.clone(),
            nonce: result.nonce,
            hash: result.hash,
        }
    }
}

/// Finalized block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub previous_hash: String,
    pub payload: Payload,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Recompute the hash from the stored fields
    pub fn compute_hash(&self, hasher: &dyn Hasher) -> String {
        let mut buf = Vec::new();
        write_hash_input(&self.previous_hash, &self.payload, self.nonce, &mut buf);
        hasher.digest(&buf)
    }

    /// Check that the stored hash matches the block contents
    pub fn has_valid_hash(&self, hasher: &dyn Hasher) -> bool {
        self.compute_hash(hasher) == self.hash
    }
}
