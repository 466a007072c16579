//! On-demand search for a caller-chosen suffix.
//!
//! Unlike the pool this path keeps no shared state: every call validates the
//! suffix, runs one bounded search on its own workers and hands the match
//! straight to the caller (who vaults it). Nothing mined here enters the pool.

use std::time::{Duration, Instant};

use tracing::info;

use crate::error::SuffixError;
use crate::search::{validate_suffix, Candidate, SearchOutcome, SearchWorkers, SuffixMatcher};

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub max_attempts: u64,
    pub max_suffix_len: usize,
    pub case_insensitive: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5_000_000,
            max_suffix_len: 4,
            case_insensitive: true,
        }
    }
}

#[derive(Debug)]
pub enum MineOutcome {
    Found {
        candidate: Candidate,
        attempts: u64,
        elapsed: Duration,
    },
    /// The budget ran out before a match. Not an error, and not retried.
    Timeout { attempts: u64, elapsed: Duration },
}

pub struct OnDemandMiner {
    workers: SearchWorkers,
    config: MinerConfig,
}

impl OnDemandMiner {
    pub fn new(workers: SearchWorkers, config: MinerConfig) -> Self {
        Self { workers, config }
    }

    pub fn validate(&self, suffix: &str) -> Result<(), SuffixError> {
        validate_suffix(suffix, self.config.max_suffix_len)
    }

    /// Searches with the configured attempt budget.
    pub async fn mine(&self, suffix: &str) -> Result<MineOutcome, SuffixError> {
        self.mine_with_budget(suffix, self.config.max_attempts).await
    }

    /// Searches for at most `max_attempts` keypairs. Dropping the future
    /// stops the search.
    pub async fn mine_with_budget(
        &self,
        suffix: &str,
        max_attempts: u64,
    ) -> Result<MineOutcome, SuffixError> {
        self.validate(suffix)?;

        let matcher = SuffixMatcher::new(suffix, self.config.case_insensitive);
        let started = Instant::now();
        let outcome = self.workers.run(matcher, max_attempts, None).await;
        let elapsed = started.elapsed();

        Ok(match outcome {
            SearchOutcome::Found {
                candidate,
                attempts,
            } => {
                info!(
                    "Custom suffix '{}' matched {} after {} attempts in {:.2?}",
                    suffix, candidate.public_key, attempts, elapsed
                );
                MineOutcome::Found {
                    candidate,
                    attempts,
                    elapsed,
                }
            }
            SearchOutcome::Exhausted { attempts } => {
                info!(
                    "Custom suffix '{}' gave up after {} attempts in {:.2?}",
                    suffix, attempts, elapsed
                );
                MineOutcome::Timeout { attempts, elapsed }
            }
        })
    }
}
