//! Durable storage for pool snapshots.
//!
//! The pool is a cache of pre-mined keypairs, not a ledger, so a store only
//! has to hold the latest snapshot. Vault entries are never persisted.

use std::path::PathBuf;

use async_trait::async_trait;
use deadpool_postgres::{Manager, Pool};
use native_tls::TlsConnector;
use parking_lot::Mutex;
use postgres_native_tls::MakeTlsConnector;
use tracing::info;

use crate::error::StoreError;
use crate::pool::PoolSnapshot;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the last saved snapshot, or `None` on first start.
    async fn load(&self) -> Result<Option<PoolSnapshot>, StoreError>;

    /// Replaces the saved snapshot.
    async fn save(&self, snapshot: &PoolSnapshot) -> Result<(), StoreError>;
}

/// Snapshot kept as a JSON file, replaced atomically via rename.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn load(&self) -> Result<Option<PoolSnapshot>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, snapshot: &PoolSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS vanity_pool_snapshot (
    id INTEGER PRIMARY KEY,
    snapshot TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)";

/// Snapshot kept as a single row in Postgres.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connects over TLS and makes sure the snapshot table exists.
    pub async fn connect(db_url: &str, accept_invalid_certs: bool) -> Result<Self, StoreError> {
        let tls = MakeTlsConnector::new(
            TlsConnector::builder()
                .danger_accept_invalid_certs(accept_invalid_certs)
                .build()?,
        );

        let config: tokio_postgres::Config = db_url.parse()?;
        let mgr = Manager::new(config, tls);
        let pool = Pool::builder(mgr).max_size(4).build()?;

        let client = pool.get().await?;
        client.execute(CREATE_TABLE, &[]).await?;
        info!("Postgres snapshot store ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl SnapshotStore for PostgresStore {
    async fn load(&self) -> Result<Option<PoolSnapshot>, StoreError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT snapshot FROM vanity_pool_snapshot WHERE id = 1", &[])
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get(0);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, snapshot: &PoolSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO vanity_pool_snapshot (id, snapshot, updated_at) VALUES (1, $1, now()) \
                 ON CONFLICT (id) DO UPDATE SET snapshot = EXCLUDED.snapshot, updated_at = now()",
                &[&json],
            )
            .await?;
        Ok(())
    }
}

/// In-process store, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStore {
    snapshot: Mutex<Option<PoolSnapshot>>,
    saves: std::sync::atomic::AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: PoolSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Number of completed saves.
    pub fn saves(&self) -> u64 {
        self.saves.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn latest(&self) -> Option<PoolSnapshot> {
        self.snapshot.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<PoolSnapshot>, StoreError> {
        Ok(self.snapshot.lock().clone())
    }

    async fn save(&self, snapshot: &PoolSnapshot) -> Result<(), StoreError> {
        *self.snapshot.lock() = Some(snapshot.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::GeneratorStats;
    use crate::search::Candidate;
    use solana_sdk::signature::Keypair;

    fn snapshot_with(n: usize) -> PoolSnapshot {
        PoolSnapshot {
            suffix: "pump".to_string(),
            candidates: (0..n).map(|_| Candidate::from_keypair(&Keypair::new())).collect(),
            stats: GeneratorStats {
                attempts: 1_234,
                found: n as u64,
                last_found_at: None,
            },
        }
    }

    #[tokio::test]
    async fn file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("pool.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_keeps_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("pool.json"));

        store.save(&snapshot_with(3)).await.unwrap();
        let latest = snapshot_with(1);
        store.save(&latest).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.candidates.len(), 1);
        assert_eq!(loaded.candidates[0].public_key, latest.candidates[0].public_key);
        assert_eq!(loaded.stats.attempts, 1_234);
        // Secret survives the round trip so a restart can still dispense it
        assert!(loaded.candidates[0].keypair().is_ok());
    }

    #[tokio::test]
    async fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        store.save(&snapshot_with(0)).await.unwrap();
        store.save(&snapshot_with(2)).await.unwrap();
        assert_eq!(store.saves(), 2);
        assert_eq!(store.latest().unwrap().candidates.len(), 2);
    }
}
