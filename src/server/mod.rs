//! HTTP server and the state shared by its handlers.

mod http;

pub use http::run;

use std::sync::Arc;

use crate::ledger::LedgerClient;
use crate::miner::OnDemandMiner;
use crate::pool::MiningPool;
use crate::rate_limit::CooldownLimiter;
use crate::vault::KeyVault;

/// Everything a request handler can reach.
pub struct AppState {
    pub pool: MiningPool,
    pub miner: OnDemandMiner,
    pub vault: KeyVault,
    /// `None` disables `/vault/sign-and-send`
    pub ledger: Option<Arc<dyn LedgerClient>>,
    pub dispense_limiter: Arc<CooldownLimiter>,
    pub custom_limiter: Arc<CooldownLimiter>,
    /// Key rate limits on `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,
}
