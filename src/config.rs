//! CLI arguments and environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::miner::MinerConfig;
use crate::pool::PoolConfig;
use crate::search::validate_suffix;
use crate::vault::VaultConfig;

fn default_threads() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Solana vanity keypair pool with a single-use co-signing vault
#[derive(Parser, Debug, Clone)]
#[command(name = "vanity-vault")]
#[command(about = "Pre-mines vanity keypairs and co-signs with them exactly once")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Fixed suffix pre-mined into the pool
    #[arg(long, env = "POOL_SUFFIX", default_value = "pump")]
    pub pool_suffix: String,

    /// Desired pool size
    #[arg(long, env = "POOL_TARGET", default_value = "20")]
    pub pool_target: usize,

    /// Low-water mark that triggers a refill
    #[arg(long, env = "POOL_MIN", default_value = "5")]
    pub pool_min: usize,

    /// Threads used by the pool refill
    #[arg(long, env = "POOL_THREADS", default_value_t = default_threads())]
    pub pool_threads: usize,

    /// Attempts per refill batch
    #[arg(long, env = "REFILL_BATCH", default_value = "25000")]
    pub refill_batch: u64,

    /// Attempts between refill progress logs
    #[arg(long, env = "REFILL_PROGRESS_EVERY", default_value = "50000")]
    pub refill_progress_every: u64,

    /// Delay before the startup refill
    #[arg(long, env = "REFILL_STARTUP_DELAY_SECS", default_value = "5")]
    pub refill_startup_delay_secs: u64,

    /// Match suffixes case-sensitively
    #[arg(long, env = "CASE_SENSITIVE", default_value = "false")]
    pub case_sensitive: bool,

    /// Attempt budget of a custom suffix search
    #[arg(long, env = "CUSTOM_MAX_ATTEMPTS", default_value = "5000000")]
    pub custom_max_attempts: u64,

    /// Longest accepted custom suffix
    #[arg(long, env = "CUSTOM_MAX_SUFFIX_LEN", default_value = "4")]
    pub custom_max_suffix_len: usize,

    /// Threads used by custom suffix searches
    #[arg(long, env = "CUSTOM_THREADS", default_value_t = default_threads())]
    pub custom_threads: usize,

    /// Per-source cool-down for pool dispenses
    #[arg(long, env = "DISPENSE_COOLDOWN_SECS", default_value = "60")]
    pub dispense_cooldown_secs: u64,

    /// Per-source cool-down for custom searches
    #[arg(long, env = "CUSTOM_COOLDOWN_SECS", default_value = "10")]
    pub custom_cooldown_secs: u64,

    /// Identify request sources by the X-Forwarded-For hop appended by a
    /// single trusted proxy
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value = "false")]
    pub trust_forwarded_for: bool,

    /// Vault entry time-to-live
    #[arg(long, env = "VAULT_TTL_SECS", default_value = "300")]
    pub vault_ttl_secs: u64,

    /// How long a used vault entry is kept
    #[arg(long, env = "VAULT_GRACE_SECS", default_value = "60")]
    pub vault_grace_secs: u64,

    /// Vault sweep period
    #[arg(long, env = "VAULT_SWEEP_SECS", default_value = "120")]
    pub vault_sweep_secs: u64,

    /// Solana JSON-RPC endpoint for sign-and-send
    #[arg(long, env = "SOLANA_RPC_URL", default_value = "https://api.mainnet-beta.solana.com")]
    pub solana_rpc_url: String,

    /// Timeout for transaction submission
    #[arg(long, env = "SUBMIT_TIMEOUT_SECS", default_value = "30")]
    pub submit_timeout_secs: u64,

    /// Postgres URL; when set, pool snapshots are stored there
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Accept invalid TLS certificates from Postgres
    #[arg(long, env = "DB_ACCEPT_INVALID_CERTS", default_value = "false")]
    pub db_accept_invalid_certs: bool,

    /// Snapshot file used when no database is configured
    #[arg(long, env = "SNAPSHOT_PATH", default_value = "vanity-pool.json")]
    pub snapshot_path: PathBuf,
}

impl Args {
    pub fn validate(&self) -> Result<(), String> {
        validate_suffix(&self.pool_suffix, 8)
            .map_err(|e| format!("POOL_SUFFIX: {e}"))?;

        if self.pool_target == 0 {
            return Err("POOL_TARGET must be at least 1".into());
        }
        if self.pool_min > self.pool_target {
            return Err(format!(
                "POOL_MIN ({}) cannot exceed POOL_TARGET ({})",
                self.pool_min, self.pool_target
            ));
        }
        if !(1..=8).contains(&self.custom_max_suffix_len) {
            return Err("CUSTOM_MAX_SUFFIX_LEN must be between 1 and 8".into());
        }

        let non_zero = [
            ("REFILL_BATCH", self.refill_batch),
            ("REFILL_PROGRESS_EVERY", self.refill_progress_every),
            ("CUSTOM_MAX_ATTEMPTS", self.custom_max_attempts),
            ("VAULT_TTL_SECS", self.vault_ttl_secs),
            ("VAULT_SWEEP_SECS", self.vault_sweep_secs),
            ("SUBMIT_TIMEOUT_SECS", self.submit_timeout_secs),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(format!("{name} must be greater than zero"));
        }
        Ok(())
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            suffix: self.pool_suffix.clone(),
            case_insensitive: !self.case_sensitive,
            target: self.pool_target,
            min: self.pool_min,
            refill_batch: self.refill_batch,
            progress_every: self.refill_progress_every,
            startup_delay: Duration::from_secs(self.refill_startup_delay_secs),
        }
    }

    pub fn miner_config(&self) -> MinerConfig {
        MinerConfig {
            max_attempts: self.custom_max_attempts,
            max_suffix_len: self.custom_max_suffix_len,
            case_insensitive: !self.case_sensitive,
        }
    }

    pub fn vault_config(&self) -> VaultConfig {
        VaultConfig {
            ttl: Duration::from_secs(self.vault_ttl_secs),
            grace: Duration::from_secs(self.vault_grace_secs),
            sweep_interval: Duration::from_secs(self.vault_sweep_secs),
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
        }
    }

    pub fn dispense_cooldown(&self) -> Duration {
        Duration::from_secs(self.dispense_cooldown_secs)
    }

    pub fn custom_cooldown(&self) -> Duration {
        Duration::from_secs(self.custom_cooldown_secs)
    }
}
