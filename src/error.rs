//! Error taxonomy for the mining pool, vault and their collaborators.

use thiserror::Error;

/// Rejections of a suffix before any search work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuffixError {
    #[error("suffix cannot be empty")]
    Empty,

    #[error("suffix is longer than {max} characters")]
    TooLong { max: usize },

    #[error("'{0}' is not a base58 character")]
    InvalidCharacter(char),
}

/// Failures of a vault signing flow.
///
/// Every variant except `InvalidTransaction` and `LedgerUnavailable` is
/// terminal for the vault entry: the caller has to dispense a new keypair.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault entry not found")]
    NotFound,

    #[error("vault entry has already signed a transaction")]
    AlreadyUsed,

    #[error("vault entry has expired")]
    Expired,

    #[error("vaulted key is not a required signer of this transaction")]
    KeyNotReferenced,

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("signing failed: {0}")]
    Signing(String),

    /// Submission failed after the co-signature was produced. The signed
    /// bytes are handed back so the caller can broadcast them elsewhere.
    #[error("submission failed: {reason}")]
    Submission {
        reason: String,
        signed_transaction: Vec<u8>,
    },

    #[error("no ledger client configured")]
    LedgerUnavailable,
}

impl VaultError {
    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::NotFound => "vault_not_found",
            VaultError::AlreadyUsed => "vault_already_used",
            VaultError::Expired => "vault_expired",
            VaultError::KeyNotReferenced => "key_not_referenced",
            VaultError::InvalidTransaction(_) => "invalid_transaction",
            VaultError::Signing(_) => "signing_failed",
            VaultError::Submission { .. } => "submission_failed",
            VaultError::LedgerUnavailable => "ledger_unavailable",
        }
    }
}

/// Failures of the pool snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("postgres pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("postgres pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Failures reported by a ledger client.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("submission timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Startup-level failures.
#[derive(Debug, Error)]
pub enum VanityError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to build search thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T, E = VanityError> = std::result::Result<T, E>;
