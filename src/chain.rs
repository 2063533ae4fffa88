//! Append-only chain of validated blocks
//!
//! Every block is checked for its link to the previous block and for a hash that
//! recomputes from its stored contents before it becomes visible. The same checks
//! can be rerun at any time from the stored data alone.

use crate::block::Block;
use crate::crypto::Hasher;
use crate::{Error, Result};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Previous-hash value of the first block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Outcome of auditing one stored block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAudit {
    pub index: usize,
    pub hash: String,
    /// Whether `previous_hash` matches the preceding block
    pub link_ok: bool,
    /// Whether the stored hash recomputes from the block contents
    pub hash_ok: bool,
}

impl BlockAudit {
    pub fn is_valid(&self) -> bool {
        self.link_ok && self.hash_ok
    }
}

impl fmt::Display for BlockAudit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Block {}: hash {} | previous hash {} | hash {}",
            self.index,
            self.hash,
            if self.link_ok { "matches" } else { "doesn't match" },
            if self.hash_ok { "is valid" } else { "is invalid" },
        )
    }
}

/// Ordered sequence of finalized blocks
pub struct Chain {
    blocks: Vec<Block>,
    hasher: Arc<dyn Hasher>,
}

impl Chain {
    /// Create an empty chain validated with `hasher`
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self {
            blocks: Vec::new(),
            hasher,
        }
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the chain has no blocks
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Hash of the last block, or `"0"` when empty
    pub fn last_hash(&self) -> &str {
        self.blocks
            .last()
            .map(|block| block.hash.as_str())
            .unwrap_or(GENESIS_PREVIOUS_HASH)
    }

    /// All blocks in order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Hasher used for validation
    pub fn hasher(&self) -> &Arc<dyn Hasher> {
        &self.hasher
    }

    /// Validate and append a block
    ///
    /// The chain is left untouched unless both the link and the hash check pass.
    pub fn append(&mut self, block: Block) -> Result<()> {
        let index = self.blocks.len();

        if block.previous_hash != self.last_hash() {
            return Err(Error::validation(
                index,
                format!(
                    "previous hash {} does not match chain head {}",
                    block.previous_hash,
                    self.last_hash()
                ),
            ));
        }

        let computed = block.compute_hash(self.hasher.as_ref());
        if computed != block.hash {
            return Err(Error::validation(
                index,
                format!("stored hash {} does not match computed hash {}", block.hash, computed),
            ));
        }

        self.blocks.push(block);
        Ok(())
    }

    /// Recheck the link and hash of every block
    pub fn audit(&self) -> Vec<BlockAudit> {
        let mut previous = GENESIS_PREVIOUS_HASH;
        self.blocks
            .iter()
            .enumerate()
            .map(|(index, block)| {
                let audit = BlockAudit {
                    index,
                    hash: block.hash.clone(),
                    link_ok: block.previous_hash == previous,
                    hash_ok: block.has_valid_hash(self.hasher.as_ref()),
                };
                previous = &block.hash;
                audit
            })
            .collect()
    }

    /// Whether every block passes the audit
    pub fn verify(&self) -> bool {
        self.audit().iter().all(BlockAudit::is_valid)
    }

    /// Like [`Chain::verify`] but reports the first failing block
    pub fn validate(&self) -> Result<()> {
        match self.audit().into_iter().find(|audit| !audit.is_valid()) {
            None => Ok(()),
            Some(audit) if !audit.link_ok => {
                Err(Error::validation(audit.index, "previous hash does not match"))
            }
            Some(audit) => Err(Error::validation(audit.index, "hash does not recompute")),
        }
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("hasher", &self.hasher.name())
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl Serialize for Chain {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(&self.blocks)
    }
}
