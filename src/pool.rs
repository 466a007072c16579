//! Pre-mined pool of keypairs for the platform's fixed suffix.
//!
//! Dispensing is a constant-time pop from the front of an in-memory queue.
//! When the queue falls under the low-water mark a single background refill
//! task searches in batches on the pool's own [`SearchWorkers`] until the
//! queue is back at target. Every change is published to a write-behind
//! task that persists the latest snapshot, so neither dispense nor refill
//! ever waits on storage.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::search::{Candidate, SearchOutcome, SearchWorkers, SuffixMatcher};
use crate::store::SnapshotStore;

/// Cumulative search statistics. Counters only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorStats {
    pub attempts: u64,
    pub found: u64,
    pub last_found_at: Option<DateTime<Utc>>,
}

/// What gets persisted: pool contents plus stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    #[serde(default)]
    pub suffix: String,
    pub candidates: Vec<Candidate>,
    pub stats: GeneratorStats,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub suffix: String,
    pub case_insensitive: bool,
    /// Refill stops once the queue holds this many candidates
    pub target: usize,
    /// Low-water mark; a dispense that leaves fewer triggers a refill
    pub min: usize,
    /// Attempts per search batch; the refill task yields between batches
    pub refill_batch: u64,
    /// Attempts between progress log lines
    pub progress_every: u64,
    pub startup_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            suffix: "pump".to_string(),
            case_insensitive: true,
            target: 20,
            min: 5,
            refill_batch: 25_000,
            progress_every: 50_000,
            startup_delay: Duration::from_secs(5),
        }
    }
}

/// Result of a dispense call. An empty pool is an ordinary outcome.
#[derive(Debug)]
pub enum Dispense {
    Dispensed { candidate: Candidate, remaining: usize },
    Empty,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub pool_size: usize,
    pub target: usize,
    pub min: usize,
    pub generating: bool,
    pub stats: GeneratorStats,
    pub suffix: String,
}

struct PoolState {
    buffer: VecDeque<Candidate>,
    stats: GeneratorStats,
}

struct Inner {
    config: PoolConfig,
    matcher: SuffixMatcher,
    state: Mutex<PoolState>,
    /// Single-flight guard for the refill task
    generating: AtomicBool,
    stop: Arc<AtomicBool>,
    workers: SearchWorkers,
    store: Arc<dyn SnapshotStore>,
    snapshots: watch::Sender<PoolSnapshot>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn snapshot(&self, state: &PoolState) -> PoolSnapshot {
        PoolSnapshot {
            suffix: self.config.suffix.clone(),
            candidates: state.buffer.iter().cloned().collect(),
            stats: state.stats.clone(),
        }
    }

    /// Called with the state lock held so published snapshots are ordered.
    fn publish(&self, state: &PoolState) {
        self.snapshots.send_replace(self.snapshot(state));
    }
}

/// Handle to the shared pool. Cloning is cheap.
#[derive(Clone)]
pub struct MiningPool {
    inner: Arc<Inner>,
}

impl MiningPool {
    /// Restores the pool from `store` and starts the write-behind task.
    ///
    /// Candidates that no longer match the configured suffix are dropped.
    pub async fn load(
        config: PoolConfig,
        workers: SearchWorkers,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, StoreError> {
        let matcher = SuffixMatcher::new(config.suffix.clone(), config.case_insensitive);
        let snapshot = store.load().await?.unwrap_or_default();

        let loaded = snapshot.candidates.len();
        let buffer: VecDeque<Candidate> = snapshot
            .candidates
            .iter()
            .filter(|c| matcher.matches(&c.public_key))
            .cloned()
            .collect();
        if buffer.len() < loaded {
            warn!(
                "Dropped {} persisted candidates not matching suffix '{}'",
                loaded - buffer.len(),
                config.suffix
            );
        }
        info!(
            "Loaded {} pooled keypairs ({} attempts, {} found so far)",
            buffer.len(),
            snapshot.stats.attempts,
            snapshot.stats.found
        );

        let state = PoolState {
            buffer,
            stats: snapshot.stats.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let (snapshots, rx) = watch::channel(PoolSnapshot::default());
        let writer = tokio::spawn(write_behind(Arc::clone(&store), rx, Arc::clone(&stop)));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                matcher,
                state: Mutex::new(state),
                generating: AtomicBool::new(false),
                stop,
                workers,
                store,
                snapshots,
                writer: Mutex::new(Some(writer)),
            }),
        })
    }

    /// Schedules a refill after the startup delay if the pool is short.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.len() >= self.inner.config.target {
            return None;
        }
        let pool = self.clone();
        let delay = self.inner.config.startup_delay;
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pool.trigger_refill();
        }))
    }

    /// Pops the oldest candidate.
    ///
    /// Falling below the low-water mark, or finding the pool empty, kicks off
    /// a background refill; the caller never waits for it. After
    /// `shutdown` the pool is always empty, so nothing can be handed out
    /// that the final snapshot still holds.
    pub fn dispense(&self) -> Dispense {
        let (popped, remaining) = {
            let mut state = self.inner.state.lock();
            if self.inner.stop.load(Ordering::Acquire) {
                return Dispense::Empty;
            }
            let popped = state.buffer.pop_front();
            if popped.is_some() {
                self.inner.publish(&state);
            }
            (popped, state.buffer.len())
        };

        match popped {
            Some(candidate) => {
                debug!("Dispensed {} ({} left)", candidate.public_key, remaining);
                if remaining < self.inner.config.min {
                    self.trigger_refill();
                }
                Dispense::Dispensed {
                    candidate,
                    remaining,
                }
            }
            None => {
                self.trigger_refill();
                Dispense::Empty
            }
        }
    }

    /// Spawns the refill task unless one is already running.
    ///
    /// Returns true if this call started it.
    pub fn trigger_refill(&self) -> bool {
        if !self.try_begin_refill() {
            return false;
        }
        let pool = self.clone();
        tokio::spawn(async move { pool.refill_loop().await });
        true
    }

    /// Runs a refill to completion on the calling task. No-op (returns
    /// false) if a refill is already running.
    pub async fn refill(&self) -> bool {
        if !self.try_begin_refill() {
            return false;
        }
        self.refill_loop().await;
        true
    }

    fn try_begin_refill(&self) -> bool {
        !self.inner.stop.load(Ordering::Relaxed)
            && self
                .inner
                .generating
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    async fn refill_loop(&self) {
        let inner = &self.inner;
        let mut session_attempts = 0u64;
        let mut next_report = inner.config.progress_every;
        info!(
            "Refill started: suffix '{}', target {}",
            inner.config.suffix, inner.config.target
        );

        while self.continue_refill() {
            let outcome = inner
                .workers
                .run(
                    inner.matcher.clone(),
                    inner.config.refill_batch,
                    Some(Arc::clone(&inner.stop)),
                )
                .await;

            session_attempts += outcome.attempts();
            let (pool_size, total_attempts) = self.record(outcome);

            if session_attempts >= next_report {
                info!(
                    "Refill progress: {} attempts this run, {} lifetime, pool {}/{}",
                    session_attempts, total_attempts, pool_size, inner.config.target
                );
                next_report = session_attempts + inner.config.progress_every;
            }
        }

        info!("Refill finished after {} attempts", session_attempts);
    }

    /// Checks the exit condition and clears the single-flight flag under the
    /// state lock, so a concurrent dispense either sees the flag still set
    /// and is covered by this run, or sees it cleared and starts a new one.
    fn continue_refill(&self) -> bool {
        let state = self.inner.state.lock();
        let stopped = self.inner.stop.load(Ordering::Relaxed);
        if stopped || state.buffer.len() >= self.inner.config.target {
            self.inner.generating.store(false, Ordering::Release);
            return false;
        }
        true
    }

    fn record(&self, outcome: SearchOutcome) -> (usize, u64) {
        let mut state = self.inner.state.lock();
        state.stats.attempts += outcome.attempts();

        if let SearchOutcome::Found { candidate, .. } = outcome {
            state.stats.found += 1;
            state.stats.last_found_at = Some(Utc::now());
            info!(
                "Found {} (pool {}/{})",
                candidate.public_key,
                state.buffer.len() + 1,
                self.inner.config.target
            );
            state.buffer.push_back(candidate);
            self.inner.publish(&state);
        }

        (state.buffer.len(), state.stats.attempts)
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            pool_size: state.buffer.len(),
            target: self.inner.config.target,
            min: self.inner.config.min,
            generating: self.is_generating(),
            stats: state.stats.clone(),
            suffix: self.inner.config.suffix.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_generating(&self) -> bool {
        self.inner.generating.load(Ordering::Acquire)
    }

    /// Stops any running refill at its next check, lets the write-behind
    /// task finish its current save, then writes the final snapshot itself
    /// so nothing older can land after it.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.inner.stop.store(true, Ordering::Release);
        let snapshot = {
            let state = self.inner.state.lock();
            // Wakes an idle writer so it observes the stop flag
            self.inner.publish(&state);
            self.inner.snapshot(&state)
        };

        let writer = self.inner.writer.lock().take();
        if let Some(handle) = writer {
            if let Err(e) = handle.await {
                warn!("Snapshot writer ended abnormally: {}", e);
            }
        }
        self.inner.store.save(&snapshot).await?;
        info!("Pool snapshot flushed ({} keypairs)", snapshot.candidates.len());
        Ok(())
    }
}

/// Persists the most recent published snapshot. Intermediate versions may
/// be skipped; only the latest matters.
async fn write_behind(
    store: Arc<dyn SnapshotStore>,
    mut rx: watch::Receiver<PoolSnapshot>,
    stop: Arc<AtomicBool>,
) {
    while rx.changed().await.is_ok() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let snapshot = rx.borrow_and_update().clone();
        if let Err(e) = store.save(&snapshot).await {
            warn!("Failed to persist pool snapshot: {}", e);
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
    }
}
