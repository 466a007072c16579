//! Single-use custody of dispensed secret keys.
//!
//! A dispensed keypair's secret never leaves the server. The caller gets an
//! unguessable `vaultId` instead, and can spend it exactly once to have the
//! vaulted key co-sign a transaction that names it as a signer. After that
//! the entry is kept only for a short grace period, then dropped and its key
//! material zeroized.
//!
//! Entries live only in memory: a restart invalidates every outstanding
//! `vaultId`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{LedgerError, VaultError};
use crate::ledger::LedgerClient;
use crate::rate_limit::CooldownLimiter;
use crate::search::Candidate;

/// Bytes of OS randomness behind every vault id.
pub const VAULT_ID_BYTES: usize = 32;
const VAULT_ID_PREFIX: &str = "vlt_";

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub ttl: Duration,
    /// How long a used entry is kept before deletion
    pub grace: Duration,
    pub sweep_interval: Duration,
    /// Budget for `sign_and_send` network I/O, separate from the TTL
    pub submit_timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            grace: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(120),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

/// One vaulted key. `Debug` never prints the secret.
#[derive(Debug)]
pub struct VaultEntry {
    pub vault_id: String,
    candidate: Candidate,
    pub dispensed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
    /// Set for on-demand mints, kept for audit
    pub custom_suffix: Option<String>,
}

impl VaultEntry {
    pub fn public_key(&self) -> &str {
        &self.candidate.public_key
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn is_retired(&self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        self.used_at.is_some_and(|used| now >= used + grace)
    }
}

/// What the caller learns from a store: never the secret.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultReceipt {
    pub vault_id: String,
    pub public_key: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: u64,
}

#[derive(Debug)]
pub struct SignedTransaction {
    pub public_key: String,
    pub transaction: VersionedTransaction,
    /// bincode wire encoding of `transaction`
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VaultStats {
    pub live: usize,
    pub used: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub retired: usize,
}

struct VaultInner {
    entries: DashMap<String, VaultEntry>,
    config: VaultConfig,
    clock: Arc<dyn Clock>,
}

/// Handle to the shared vault. Cloning is cheap.
#[derive(Clone)]
pub struct KeyVault {
    inner: Arc<VaultInner>,
}

impl KeyVault {
    pub fn new(config: VaultConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: VaultConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                entries: DashMap::new(),
                config,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// Takes custody of a pooled keypair.
    pub fn store(&self, candidate: Candidate, ttl: Duration) -> VaultReceipt {
        self.insert(candidate, ttl, None)
    }

    /// Takes custody of an on-demand keypair, remembering its suffix.
    pub fn store_custom(&self, candidate: Candidate, ttl: Duration, suffix: &str) -> VaultReceipt {
        self.insert(candidate, ttl, Some(suffix.to_string()))
    }

    fn insert(
        &self,
        candidate: Candidate,
        ttl: Duration,
        custom_suffix: Option<String>,
    ) -> VaultReceipt {
        let now = self.inner.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let public_key = candidate.public_key.clone();

        let mut candidate = Some(candidate);
        let vault_id = loop {
            let id = new_vault_id();
            // A collision at 256 bits would mean a broken RNG; draw again
            if let Entry::Vacant(slot) = self.inner.entries.entry(id.clone()) {
                if let Some(candidate) = candidate.take() {
                    slot.insert(VaultEntry {
                        vault_id: id.clone(),
                        candidate,
                        dispensed_at: now,
                        expires_at,
                        used_at: None,
                        custom_suffix: custom_suffix.clone(),
                    });
                }
                break id;
            }
        };

        info!(
            "Vault stored {} as {}{}",
            public_key,
            short_id(&vault_id),
            custom_suffix
                .as_deref()
                .map(|s| format!(" (custom suffix '{}')", s))
                .unwrap_or_default()
        );

        VaultReceipt {
            vault_id,
            public_key,
            expires_at,
            expires_in_seconds: ttl.as_secs(),
        }
    }

    /// Adds the vaulted key's signature to `transaction_bytes` and burns the
    /// entry.
    ///
    /// Checks run in order: existence, prior use, expiry, then that the
    /// vaulted key is one of the transaction's required signers. Only a
    /// successful signature marks the entry used; a malformed or foreign
    /// transaction leaves it untouched.
    pub fn sign(
        &self,
        vault_id: &str,
        transaction_bytes: &[u8],
    ) -> Result<SignedTransaction, VaultError> {
        let now = self.inner.clock.now();
        let mut entry = self
            .inner
            .entries
            .get_mut(vault_id)
            .ok_or(VaultError::NotFound)?;

        if entry.is_used() {
            warn!("Vault {} rejected: already used", short_id(vault_id));
            return Err(VaultError::AlreadyUsed);
        }

        if entry.is_expired(now) {
            drop(entry);
            self.inner
                .entries
                .remove_if(vault_id, |_, e| !e.is_used() && e.is_expired(now));
            info!("Vault {} rejected: expired", short_id(vault_id));
            return Err(VaultError::Expired);
        }

        let mut transaction = decode_transaction(transaction_bytes)?;
        let slot = match signer_slot(&transaction, entry.public_key()) {
            Ok(slot) => slot,
            Err(e) => {
                warn!(
                    "Vault {} rejected: {} is not a signer of the presented transaction",
                    short_id(vault_id),
                    entry.public_key()
                );
                return Err(e);
            }
        };

        let keypair = entry.candidate.keypair()?;
        co_sign(&mut transaction, slot, &keypair)?;
        let bytes = bincode::serialize(&transaction)
            .map_err(|e| VaultError::Signing(format!("failed to encode transaction: {e}")))?;

        entry.used_at = Some(now);
        let public_key = entry.public_key().to_string();
        drop(entry);

        info!("Vault {} co-signed for {}", short_id(vault_id), public_key);
        self.schedule_retirement(vault_id);

        Ok(SignedTransaction {
            public_key,
            transaction,
            bytes,
        })
    }

    /// `sign`, then broadcast through `ledger`.
    ///
    /// The entry is spent the moment the signature exists. If submission
    /// fails or times out the error carries the co-signed bytes so the caller
    /// can resubmit them; the vault will not sign again.
    pub async fn sign_and_send(
        &self,
        vault_id: &str,
        transaction_bytes: &[u8],
        ledger: &dyn LedgerClient,
    ) -> Result<SentTransaction, VaultError> {
        let signed = self.sign(vault_id, transaction_bytes)?;
        let timeout = self.inner.config.submit_timeout;

        let result = match tokio::time::timeout(timeout, ledger.submit(&signed.transaction)).await
        {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(timeout)),
        };

        match result {
            Ok(signature) => {
                info!(
                    "Vault {} transaction submitted: {}",
                    short_id(vault_id),
                    signature
                );
                Ok(SentTransaction {
                    public_key: signed.public_key,
                    signature,
                })
            }
            Err(e) => {
                warn!(
                    "Vault {} transaction signed but not submitted: {}",
                    short_id(vault_id),
                    e
                );
                Err(VaultError::Submission {
                    reason: e.to_string(),
                    signed_transaction: signed.bytes,
                })
            }
        }
    }

    /// Deletes a used entry once its grace period has passed.
    fn schedule_retirement(&self, vault_id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime: the periodic sweep picks it up
            return;
        };
        let vault = self.clone();
        let vault_id = vault_id.to_string();
        let grace = self.inner.config.grace;
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            if vault
                .inner
                .entries
                .remove_if(&vault_id, |_, e| e.is_used())
                .is_some()
            {
                debug!("Vault {} retired", short_id(&vault_id));
            }
        });
    }

    /// Removes expired entries (used or not) and used entries past grace.
    ///
    /// Candidates are collected under shard read locks, then removed one at
    /// a time, so concurrent `sign` calls are blocked only briefly.
    pub fn sweep(&self) -> SweepReport {
        let now = self.inner.clock.now();
        let grace = chrono::Duration::from_std(self.inner.config.grace)
            .unwrap_or(chrono::Duration::zero());

        let stale: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.is_expired(now) || e.is_retired(now, grace))
            .map(|e| e.key().clone())
            .collect();

        let mut report = SweepReport::default();
        for vault_id in stale {
            if let Some((_, entry)) = self.inner.entries.remove_if(&vault_id, |_, e| {
                e.is_expired(now) || e.is_retired(now, grace)
            }) {
                if entry.is_used() {
                    report.retired += 1;
                } else {
                    report.expired += 1;
                }
            }
        }
        report
    }

    pub fn stats(&self) -> VaultStats {
        let mut stats = VaultStats::default();
        for entry in self.inner.entries.iter() {
            stats.live += 1;
            if entry.is_used() {
                stats.used += 1;
            }
        }
        stats
    }

    pub fn contains(&self, vault_id: &str) -> bool {
        self.inner.entries.contains_key(vault_id)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// Periodic sweep of the vault and the cool-down tables.
pub fn spawn_cleaner(
    vault: KeyVault,
    limiters: Vec<Arc<CooldownLimiter>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = vault.sweep();
            let forgotten: usize = limiters.iter().map(|l| l.cleanup()).sum();
            if report.expired + report.retired > 0 {
                info!(
                    "Vault sweep removed {} expired and {} used entries",
                    report.expired, report.retired
                );
            }
            if forgotten > 0 {
                debug!("Forgot {} idle rate-limit sources", forgotten);
            }
        }
    })
}

fn new_vault_id() -> String {
    let mut bytes = [0u8; VAULT_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", VAULT_ID_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Enough of an id to correlate log lines without replaying it.
fn short_id(vault_id: &str) -> &str {
    let end = vault_id
        .char_indices()
        .nth(VAULT_ID_PREFIX.len() + 6)
        .map(|(i, _)| i)
        .unwrap_or(vault_id.len());
    &vault_id[..end]
}

fn decode_transaction(bytes: &[u8]) -> Result<VersionedTransaction, VaultError> {
    let transaction: VersionedTransaction = bincode::deserialize(bytes)
        .map_err(|e| VaultError::InvalidTransaction(e.to_string()))?;

    let required = transaction.message.header().num_required_signatures as usize;
    if transaction.signatures.len() > required {
        return Err(VaultError::InvalidTransaction(format!(
            "{} signatures for {} required signers",
            transaction.signatures.len(),
            required
        )));
    }
    Ok(transaction)
}

/// Index of `public_key` among the transaction's required signers.
fn signer_slot(transaction: &VersionedTransaction, public_key: &str) -> Result<usize, VaultError> {
    let pubkey = Pubkey::from_str(public_key)
        .map_err(|e| VaultError::Signing(format!("bad vaulted public key: {e}")))?;
    let required = transaction.message.header().num_required_signatures as usize;

    transaction
        .message
        .static_account_keys()
        .iter()
        .take(required)
        .position(|key| *key == pubkey)
        .ok_or(VaultError::KeyNotReferenced)
}

fn co_sign(
    transaction: &mut VersionedTransaction,
    slot: usize,
    keypair: &Keypair,
) -> Result<(), VaultError> {
    let required = transaction.message.header().num_required_signatures as usize;
    let signature = keypair
        .try_sign_message(&transaction.message.serialize())
        .map_err(|e| VaultError::Signing(e.to_string()))?;

    if transaction.signatures.len() < required {
        transaction.signatures.resize(required, Signature::default());
    }
    transaction.signatures[slot] = signature;
    Ok(())
}
