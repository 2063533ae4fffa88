//! Blockchain Miner
//!
//! A proof-of-work mining coordinator that builds a chain of validated blocks:
//! - Splits each block's nonce space into disjoint ranges across concurrent workers
//! - Aborts outstanding searches as soon as a block is accepted
//! - Discards stale results from earlier block templates by generation
//! - Validates every block's link and hash before it joins the chain
//! - Enforces an overall deadline on the mining session

pub mod block;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod reporter;
pub mod search;
pub mod session;
pub mod types;
pub mod utils;
pub mod worker;

pub use block::{Block, BlockTemplate, Payload, PayloadSource, RandomTransactions};
pub use chain::Chain;
pub use config::Config;
pub use coordinator::{mine, Coordinator, CoordinatorHandle, CoordinatorOptions, MiningReport};
pub use crypto::{HashAlgorithm, Hasher};
pub use error::{Error, Result};
pub use reporter::{Reporter, TracingReporter};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "blockchain-miner";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
