//! `/vanity/*`: pool dispense, custom mining, pool status.

use hyper::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{bad_request, error_response, json_response, rate_limited, JsonResponse};
use crate::miner::MineOutcome;
use crate::pool::Dispense;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
struct CustomRequest {
    suffix: String,
}

/// `GET /vanity/dispense`
pub fn dispense(state: &AppState, source: &str) -> JsonResponse {
    if let Err(wait) = state.dispense_limiter.check(source) {
        return rate_limited(wait);
    }

    match state.pool.dispense() {
        Dispense::Dispensed {
            candidate,
            remaining,
        } => {
            let receipt = state.vault.store(candidate, state.vault.config().ttl);
            json_response(
                StatusCode::OK,
                json!({
                    "publicKey": receipt.public_key,
                    "vaultId": receipt.vault_id,
                    "expiresInSeconds": receipt.expires_in_seconds,
                    "poolRemaining": remaining,
                }),
            )
        }
        Dispense::Empty => json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "pool_empty", "poolRemaining": 0 }),
        ),
    }
}

/// `POST /vanity/custom { suffix }`
pub async fn custom(state: &AppState, source: &str, body: &[u8]) -> JsonResponse {
    let request: CustomRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("expected {{\"suffix\": ...}}: {e}")),
    };

    // Bad input is refused without spending the caller's cool-down
    if let Err(e) = state.miner.validate(&request.suffix) {
        return error_response(StatusCode::BAD_REQUEST, "invalid_suffix", e.to_string());
    }
    if let Err(wait) = state.custom_limiter.check(source) {
        return rate_limited(wait);
    }

    match state.miner.mine(&request.suffix).await {
        Ok(MineOutcome::Found {
            candidate,
            attempts,
            elapsed,
        }) => {
            let receipt =
                state
                    .vault
                    .store_custom(candidate, state.vault.config().ttl, &request.suffix);
            json_response(
                StatusCode::OK,
                json!({
                    "publicKey": receipt.public_key,
                    "vaultId": receipt.vault_id,
                    "expiresInSeconds": receipt.expires_in_seconds,
                    "attempts": attempts,
                    "durationSeconds": elapsed.as_secs_f64(),
                }),
            )
        }
        Ok(MineOutcome::Timeout { attempts, elapsed }) => json_response(
            StatusCode::REQUEST_TIMEOUT,
            json!({
                "error": "not_found",
                "attempts": attempts,
                "durationSeconds": elapsed.as_secs_f64(),
            }),
        ),
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_suffix", e.to_string()),
    }
}

/// `GET /vanity/status`
pub fn status(state: &AppState) -> JsonResponse {
    let status = state.pool.status();
    json_response(
        StatusCode::OK,
        json!({
            "poolSize": status.pool_size,
            "target": status.target,
            "min": status.min,
            "generating": status.generating,
            "stats": {
                "attempts": status.stats.attempts,
                "found": status.stats.found,
                "lastFoundAt": status.stats.last_found_at,
            },
            "suffix": status.suffix,
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::miner::{MinerConfig, OnDemandMiner};
    use crate::pool::{MiningPool, PoolConfig, PoolSnapshot};
    use crate::rate_limit::CooldownLimiter;
    use crate::routes::test_support::body_json;
    use crate::search::{Candidate, SearchOutcome, SearchWorkers, SuffixMatcher};
    use crate::store::MemoryStore;
    use crate::vault::{KeyVault, VaultConfig};

    async fn state_with(candidates: Vec<Candidate>, max_attempts: u64) -> AppState {
        let config = PoolConfig {
            suffix: "a".to_string(),
            target: candidates.len().max(1),
            min: 0,
            refill_batch: 2_000,
            ..PoolConfig::default()
        };
        let store = Arc::new(MemoryStore::with_snapshot(PoolSnapshot {
            suffix: "a".to_string(),
            candidates,
            ..PoolSnapshot::default()
        }));
        let workers = SearchWorkers::new("route-test", 2).unwrap();
        let pool = MiningPool::load(config, workers.clone(), store).await.unwrap();
        let miner = OnDemandMiner::new(
            workers,
            MinerConfig {
                max_attempts,
                ..MinerConfig::default()
            },
        );

        AppState {
            pool,
            miner,
            vault: KeyVault::new(VaultConfig::default()),
            ledger: None,
            dispense_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(60))),
            custom_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(10))),
            trust_forwarded_for: false,
        }
    }

    fn mined_a() -> Candidate {
        match SuffixMatcher::new("a", true).search(1_000_000, || false) {
            SearchOutcome::Found { candidate, .. } => candidate,
            SearchOutcome::Exhausted { .. } => panic!("no match"),
        }
    }

    #[tokio::test]
    async fn dispense_hands_out_vault_id_not_secret() {
        let state = state_with(vec![mined_a()], 10).await;
        let response = dispense(&state, "10.0.0.1");
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let vault_id = body["vaultId"].as_str().unwrap();
        assert!(state.vault.contains(vault_id));
        assert_eq!(body["poolRemaining"], 0);
        assert_eq!(body["expiresInSeconds"], 300);
        assert_eq!(body.as_object().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn dispense_is_rate_limited_per_source() {
        let state = state_with(vec![mined_a(), mined_a()], 10).await;
        assert_eq!(dispense(&state, "10.0.0.1").status(), StatusCode::OK);
        assert_eq!(
            dispense(&state, "10.0.0.1").status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(dispense(&state, "10.0.0.2").status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_pool_reports_pool_empty() {
        let state = state_with(Vec::new(), 10).await;
        let response = dispense(&state, "10.0.0.1");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "pool_empty");
        assert_eq!(body["poolRemaining"], 0);
    }

    #[tokio::test]
    async fn custom_rejects_bad_suffix_without_charging() {
        let state = state_with(Vec::new(), 10).await;
        let response = custom(&state, "10.0.0.1", br#"{"suffix":"O0"}"#).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_suffix");
        assert!(state.custom_limiter.is_empty());
    }

    #[tokio::test]
    async fn custom_exhaustion_is_408_with_attempts() {
        let state = state_with(Vec::new(), 10).await;
        let response = custom(&state, "10.0.0.1", br#"{"suffix":"zzzz"}"#).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "not_found");
        assert_eq!(body["attempts"], 10);

        let again = custom(&state, "10.0.0.1", br#"{"suffix":"zzzz"}"#).await;
        assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn custom_match_goes_to_vault() {
        let state = state_with(Vec::new(), 1_000_000).await;
        let response = custom(&state, "10.0.0.1", br#"{"suffix":"x"}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["publicKey"].as_str().unwrap().to_lowercase().ends_with('x'));
        assert!(state.vault.contains(body["vaultId"].as_str().unwrap()));
        assert_eq!(state.pool.len(), 0);
    }
}
