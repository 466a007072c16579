//! `/vault/*`: single-use co-signing with a vaulted key.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{bad_request, error_response, json_response, JsonResponse};
use crate::error::VaultError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    vault_id: String,
    /// bincode wire transaction, standard base64
    transaction_base64: String,
}

fn parse_request(body: &[u8]) -> Result<(String, Vec<u8>), JsonResponse> {
    let request: SignRequest = serde_json::from_slice(body).map_err(|e| {
        bad_request(format!(
            "expected {{\"vaultId\": ..., \"transactionBase64\": ...}}: {e}"
        ))
    })?;
    let bytes = STANDARD
        .decode(request.transaction_base64.trim())
        .map_err(|e| {
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_transaction",
                format!("transactionBase64 is not base64: {e}"),
            )
        })?;
    Ok((request.vault_id, bytes))
}

/// `POST /vault/sign { vaultId, transactionBase64 }`
pub fn sign(state: &AppState, body: &[u8]) -> JsonResponse {
    let (vault_id, bytes) = match parse_request(body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match state.vault.sign(&vault_id, &bytes) {
        Ok(signed) => json_response(
            StatusCode::OK,
            json!({
                "signedTransactionBase64": STANDARD.encode(&signed.bytes),
                "publicKey": signed.public_key,
            }),
        ),
        Err(e) => vault_error_response(&e),
    }
}

/// `POST /vault/sign-and-send { vaultId, transactionBase64 }`
pub async fn sign_and_send(state: &AppState, body: &[u8]) -> JsonResponse {
    let (vault_id, bytes) = match parse_request(body) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    // Refuse before signing so the entry is not spent for nothing
    let Some(ledger) = state.ledger.as_deref() else {
        return vault_error_response(&VaultError::LedgerUnavailable);
    };

    match state.vault.sign_and_send(&vault_id, &bytes, ledger).await {
        Ok(sent) => json_response(
            StatusCode::OK,
            json!({
                "signature": sent.signature,
                "publicKey": sent.public_key,
            }),
        ),
        Err(e) => vault_error_response(&e),
    }
}

/// `GET /vault/status`
pub fn status(state: &AppState) -> JsonResponse {
    let stats = state.vault.stats();
    json_response(
        StatusCode::OK,
        json!({ "live": stats.live, "used": stats.used }),
    )
}

pub fn vault_error_response(error: &VaultError) -> JsonResponse {
    let status = match error {
        VaultError::NotFound => StatusCode::NOT_FOUND,
        VaultError::AlreadyUsed => StatusCode::CONFLICT,
        VaultError::Expired => StatusCode::GONE,
        VaultError::KeyNotReferenced => StatusCode::FORBIDDEN,
        VaultError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
        VaultError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        VaultError::Submission { .. } => StatusCode::BAD_GATEWAY,
        VaultError::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    };

    match error {
        VaultError::Submission {
            reason,
            signed_transaction,
        } => json_response(
            status,
            json!({
                "error": error.code(),
                "message": reason,
                "signedTransactionBase64": STANDARD.encode(signed_transaction),
            }),
        ),
        _ => error_response(status, error.code(), error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use solana_sdk::hash::Hash;
    use solana_sdk::message::Message;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::system_instruction;
    use solana_sdk::transaction::{Transaction, VersionedTransaction};

    use super::*;
    use crate::miner::{MinerConfig, OnDemandMiner};
    use crate::pool::{MiningPool, PoolConfig};
    use crate::rate_limit::CooldownLimiter;
    use crate::routes::test_support::body_json;
    use crate::search::{Candidate, SearchWorkers};
    use crate::store::MemoryStore;
    use crate::vault::{KeyVault, VaultConfig};

    async fn state() -> AppState {
        let workers = SearchWorkers::new("vault-route-test", 1).unwrap();
        let pool = MiningPool::load(
            PoolConfig::default(),
            workers.clone(),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();
        AppState {
            pool,
            miner: OnDemandMiner::new(workers, MinerConfig::default()),
            vault: KeyVault::new(VaultConfig::default()),
            ledger: None,
            dispense_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(60))),
            custom_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(10))),
            trust_forwarded_for: false,
        }
    }

    fn request(vault_id: &str, payer: &Keypair, mint: &Keypair) -> Vec<u8> {
        let ix = system_instruction::create_account(
            &payer.pubkey(),
            &mint.pubkey(),
            1_461_600,
            82,
            &solana_sdk::system_program::id(),
        );
        let mut tx = Transaction::new_unsigned(Message::new(&[ix], Some(&payer.pubkey())));
        tx.partial_sign(&[payer], Hash::new_unique());
        let wire = bincode::serialize(&VersionedTransaction::from(tx)).unwrap();
        json!({ "vaultId": vault_id, "transactionBase64": STANDARD.encode(wire) })
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn sign_once_then_conflict() {
        let state = state().await;
        let mint = Keypair::new();
        let payer = Keypair::new();
        let receipt = state
            .vault
            .store(Candidate::from_keypair(&mint), Duration::from_secs(60));
        let body = request(&receipt.vault_id, &payer, &mint);

        let response = sign(&state, &body);
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["publicKey"], mint.pubkey().to_string());

        let wire = STANDARD
            .decode(json["signedTransactionBase64"].as_str().unwrap())
            .unwrap();
        let signed: VersionedTransaction = bincode::deserialize(&wire).unwrap();
        assert!(signed.verify_with_results().into_iter().all(|ok| ok));

        let again = sign(&state, &body);
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(again).await["error"], "vault_already_used");
    }

    #[tokio::test]
    async fn unknown_vault_id_is_404() {
        let state = state().await;
        let body = request("vlt_nope", &Keypair::new(), &Keypair::new());
        let response = sign(&state, &body);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "vault_not_found");
    }

    #[tokio::test]
    async fn bad_base64_is_invalid_transaction() {
        let state = state().await;
        let body = br#"{"vaultId":"vlt_x","transactionBase64":"%%%"}"#;
        let response = sign(&state, body);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_transaction");
    }

    #[tokio::test]
    async fn send_without_ledger_keeps_entry_unspent() {
        let state = state().await;
        let mint = Keypair::new();
        let receipt = state
            .vault
            .store(Candidate::from_keypair(&mint), Duration::from_secs(60));
        let body = request(&receipt.vault_id, &Keypair::new(), &mint);

        let response = sign_and_send(&state, &body).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.vault.stats().used, 0);
    }

    #[tokio::test]
    async fn submission_failure_returns_signed_bytes() {
        let error = VaultError::Submission {
            reason: "blockhash not found".into(),
            signed_transaction: vec![1, 2, 3],
        };
        let response = vault_error_response(&error);
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "submission_failed");
        assert_eq!(body["signedTransactionBase64"], STANDARD.encode([1u8, 2, 3]));
    }
}
