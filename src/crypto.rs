//! Cryptographic utilities for mining
//!
//! Provides the digest primitive used for block hashing. SHA-256 is the default,
//! Blake2s-256 is available as an alternative; both render 64 lowercase hex chars.

use blake2::Blake2s256;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Length of a rendered digest in hex characters
pub const DIGEST_HEX_LEN: usize = 64;

/// Deterministic digest over arbitrary bytes
///
/// Implementations must be pure: the same input always yields the same hex string.
pub trait Hasher: Send + Sync {
    /// Hash `data` and return the lowercase hex rendering of the digest
    fn digest(&self, data: &[u8]) -> String;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// SHA-256 block hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn digest(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    fn name(&self) -> &'static str {
        "sha256"
    }
}

/// Blake2s-256 block hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake2sHasher;

impl Hasher for Blake2sHasher {
    fn digest(&self, data: &[u8]) -> String {
        hex::encode(Blake2s256::digest(data))
    }

    fn name(&self) -> &'static str {
        "blake2s"
    }
}

/// Digest algorithms selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// Blake2s-256
    Blake2s,
}

impl HashAlgorithm {
    /// Build a shareable hasher for this algorithm
    pub fn hasher(self) -> Arc<dyn Hasher> {
        match self {
            HashAlgorithm::Sha256 => Arc::new(Sha256Hasher),
            HashAlgorithm::Blake2s => Arc::new(Blake2sHasher),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake2s => write!(f, "blake2s"),
        }
    }
}
