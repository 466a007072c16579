use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use vanity_vault::miner::{MinerConfig, OnDemandMiner};
use vanity_vault::pool::{MiningPool, PoolConfig};
use vanity_vault::rate_limit::CooldownLimiter;
use vanity_vault::search::SearchWorkers;
use vanity_vault::server::{self, AppState};
use vanity_vault::store::MemoryStore;
use vanity_vault::vault::{KeyVault, VaultConfig};

async fn request(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn serves_routes_until_shutdown() {
    let workers = SearchWorkers::new("it-http", 1).unwrap();
    let pool = MiningPool::load(
        PoolConfig {
            suffix: "a".to_string(),
            target: 1,
            min: 0,
            ..PoolConfig::default()
        },
        workers.clone(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();

    let state = Arc::new(AppState {
        pool,
        miner: OnDemandMiner::new(workers, MinerConfig::default()),
        vault: KeyVault::new(VaultConfig::default()),
        ledger: None,
        dispense_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(60))),
        custom_limiter: Arc::new(CooldownLimiter::new(Duration::from_secs(10))),
        trust_forwarded_for: false,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(server::run(state, listener, async move {
        let _ = stop_rx.await;
    }));

    let health = request(
        addr,
        "GET /health HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.contains(r#""status":"ok""#));

    let status = request(
        addr,
        "GET /vanity/status HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(status.starts_with("HTTP/1.1 200"));
    assert!(status.contains(r#""suffix":"a""#));

    let body = r#"{"vaultId":"vlt_missing","transactionBase64":"AA=="}"#;
    let sign = request(
        addr,
        &format!(
            "POST /vault/sign HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ),
    )
    .await;
    assert!(sign.starts_with("HTTP/1.1 404"));
    assert!(sign.contains("vault_not_found"));

    let missing = request(
        addr,
        "GET /nowhere HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(missing.starts_with("HTTP/1.1 404"));
    assert!(missing.contains("not_found_route"));

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
}
