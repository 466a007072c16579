//! Submission of co-signed transactions to the Solana network.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::transaction::VersionedTransaction;

use crate::error::LedgerError;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Broadcasts `transaction` and returns the network-assigned signature
    /// once the node has accepted it.
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<String, LedgerError>;
}

/// JSON-RPC client against a Solana node.
pub struct RpcLedger {
    client: RpcClient,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                url.into(),
                timeout,
                CommitmentConfig::confirmed(),
            ),
        }
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn submit(&self, transaction: &VersionedTransaction) -> Result<String, LedgerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(CommitmentConfig::confirmed().commitment),
            max_retries: Some(3),
            ..RpcSendTransactionConfig::default()
        };

        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .map(|signature| signature.to_string())
            .map_err(|e| LedgerError::Rpc(e.to_string()))
    }
}
