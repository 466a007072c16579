//! Solana vanity keypair pool with a single-use co-signing vault.
//!
//! Keypairs whose base58 address ends in a chosen suffix are mined ahead of
//! time with rayon and buffered in a [`pool::MiningPool`]. Dispensing one
//! never reveals its secret: the key moves into the [`vault::KeyVault`] and
//! the caller receives an opaque vault id that can co-sign exactly one
//! transaction before it expires.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod miner;
pub mod pool;
pub mod rate_limit;
pub mod routes;
pub mod search;
pub mod server;
pub mod store;
pub mod vault;

pub use error::{LedgerError, Result, StoreError, SuffixError, VanityError, VaultError};
pub use miner::{MineOutcome, OnDemandMiner};
pub use pool::{Dispense, MiningPool, PoolConfig};
pub use search::{Candidate, SearchOutcome, SearchWorkers, SuffixMatcher};
pub use vault::{KeyVault, VaultConfig};
