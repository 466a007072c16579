use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use vanity_vault::config::Args;
use vanity_vault::ledger::{LedgerClient, RpcLedger};
use vanity_vault::miner::OnDemandMiner;
use vanity_vault::pool::MiningPool;
use vanity_vault::rate_limit::CooldownLimiter;
use vanity_vault::search::SearchWorkers;
use vanity_vault::server::{self, AppState};
use vanity_vault::store::{FileStore, PostgresStore, SnapshotStore};
use vanity_vault::vault::{spawn_cleaner, KeyVault};
use vanity_vault::VanityError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; everything can come from the environment
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vanity_vault={},info", args.log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    args.validate().map_err(VanityError::Config)?;

    let store: Arc<dyn SnapshotStore> = match &args.database_url {
        Some(db_url) => {
            let store = PostgresStore::connect(db_url, args.db_accept_invalid_certs)
                .await
                .context("connecting to the snapshot database")?;
            info!("Pool snapshots stored in Postgres");
            Arc::new(store)
        }
        None => {
            info!("Pool snapshots stored in {}", args.snapshot_path.display());
            Arc::new(FileStore::new(&args.snapshot_path))
        }
    };

    let pool_workers =
        SearchWorkers::new("pool-refill", args.pool_threads).map_err(VanityError::from)?;
    let custom_workers =
        SearchWorkers::new("custom-mine", args.custom_threads).map_err(VanityError::from)?;

    info!(
        "Search threads: {} for pool refill, {} for custom suffixes",
        pool_workers.threads(),
        custom_workers.threads()
    );

    let pool = MiningPool::load(args.pool_config(), pool_workers, store)
        .await
        .map_err(VanityError::from)?;
    pool.start();

    let vault = KeyVault::new(args.vault_config());
    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcLedger::new(
        args.solana_rpc_url.clone(),
        Duration::from_secs(args.submit_timeout_secs),
    ));

    let state = Arc::new(AppState {
        pool: pool.clone(),
        miner: OnDemandMiner::new(custom_workers, args.miner_config()),
        vault: vault.clone(),
        ledger: Some(ledger),
        dispense_limiter: Arc::new(CooldownLimiter::new(args.dispense_cooldown())),
        custom_limiter: Arc::new(CooldownLimiter::new(args.custom_cooldown())),
        trust_forwarded_for: args.trust_forwarded_for,
    });

    let cleaner = spawn_cleaner(
        vault,
        vec![
            Arc::clone(&state.dispense_limiter),
            Arc::clone(&state.custom_limiter),
        ],
        args.vault_config().sweep_interval,
    );

    info!(
        "Pool suffix '{}' (target {}, min {}), custom suffixes up to {} chars, RPC {}",
        args.pool_suffix,
        args.pool_target,
        args.pool_min,
        args.custom_max_suffix_len,
        args.solana_rpc_url
    );
    if args.trust_forwarded_for {
        warn!("Rate limits keyed on X-Forwarded-For; only safe behind a trusted proxy");
    }

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;

    server::run(state, listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    cleaner.abort();
    if let Err(e) = pool.shutdown().await {
        error!("Final pool snapshot failed: {}", e);
    }
    info!("Bye");
    Ok(())
}
