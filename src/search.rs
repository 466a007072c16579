//! Brute-force search for keypairs whose base58 public key ends in a suffix.
//!
//! Each attempt generates a fresh ed25519 keypair and throws it away unless
//! it matches; nothing about a near miss is kept. Searches run on a
//! dedicated rayon pool ([`SearchWorkers`]) and hand their result back to
//! async callers over a oneshot channel, so request handling never shares
//! threads with mining.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use tokio::sync::oneshot;
use tracing::error;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{SuffixError, VaultError};

/// The bitcoin base58 alphabet used for Solana addresses.
pub const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Checks that `suffix` is non-empty, at most `max_len` characters and made
/// only of base58 symbols. `0`, `O`, `I` and `l` can never appear in an
/// address, so asking for them would search forever.
pub fn validate_suffix(suffix: &str, max_len: usize) -> Result<(), SuffixError> {
    if suffix.is_empty() {
        return Err(SuffixError::Empty);
    }
    if suffix.chars().count() > max_len {
        return Err(SuffixError::TooLong { max: max_len });
    }
    if let Some(bad) = suffix.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        return Err(SuffixError::InvalidCharacter(bad));
    }
    Ok(())
}

/// A matched keypair waiting to be dispensed.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub public_key: String,
    /// base58 of the 64-byte keypair (secret half followed by public half)
    secret_key: String,
    pub generated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn from_keypair(keypair: &Keypair) -> Self {
        let bytes = Zeroizing::new(keypair.to_bytes());
        Self {
            public_key: keypair.pubkey().to_string(),
            secret_key: bs58::encode(&bytes[..]).into_string(),
            generated_at: Utc::now(),
        }
    }

    /// Rebuilds the signing keypair and checks it still belongs to
    /// `public_key`.
    pub fn keypair(&self) -> Result<Keypair, VaultError> {
        let bytes = Zeroizing::new(
            bs58::decode(&self.secret_key)
                .into_vec()
                .map_err(|e| VaultError::Signing(format!("corrupt key material: {e}")))?,
        );
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| VaultError::Signing(format!("corrupt key material: {e}")))?;

        if keypair.pubkey().to_string() != self.public_key {
            return Err(VaultError::Signing(
                "key material does not match public key".to_string(),
            ));
        }
        Ok(keypair)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("generated_at", &self.generated_at)
            .finish()
    }
}

impl Drop for Candidate {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Result of one bounded search.
#[derive(Debug)]
pub enum SearchOutcome {
    Found { candidate: Candidate, attempts: u64 },
    Exhausted { attempts: u64 },
}

impl SearchOutcome {
    pub fn attempts(&self) -> u64 {
        match self {
            SearchOutcome::Found { attempts, .. } | SearchOutcome::Exhausted { attempts } => {
                *attempts
            }
        }
    }
}

/// Suffix test applied to each generated public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixMatcher {
    suffix: String,
    case_insensitive: bool,
}

impl SuffixMatcher {
    pub fn new(suffix: impl Into<String>, case_insensitive: bool) -> Self {
        Self {
            suffix: suffix.into(),
            case_insensitive,
        }
    }

    pub fn matches(&self, encoded: &str) -> bool {
        if !self.case_insensitive {
            return encoded.ends_with(&self.suffix);
        }
        // base58 is pure ASCII, so byte slicing is safe here
        let (haystack, needle) = (encoded.as_bytes(), self.suffix.as_bytes());
        haystack.len() >= needle.len()
            && haystack[haystack.len() - needle.len()..].eq_ignore_ascii_case(needle)
    }

    /// Generates keypairs in parallel on the current rayon pool until one
    /// matches, `max_attempts` keypairs have been tried, or `should_stop`
    /// returns true.
    pub fn search<F>(&self, max_attempts: u64, should_stop: F) -> SearchOutcome
    where
        F: Fn() -> bool + Sync,
    {
        let attempts = AtomicU64::new(0);
        let found = AtomicBool::new(false);
        let winner: Mutex<Option<Candidate>> = Mutex::new(None);

        let budget = AttemptBudget {
            issued: 0,
            max_attempts,
            found: &found,
            should_stop: &should_stop,
        };

        budget.par_bridge().for_each(|_| {
            // Work already queued when another thread won
            if found.load(Ordering::Relaxed) {
                return;
            }

            let keypair = Keypair::new();
            attempts.fetch_add(1, Ordering::Relaxed);

            if self.matches(&keypair.pubkey().to_string()) && !found.swap(true, Ordering::SeqCst) {
                *winner.lock() = Some(Candidate::from_keypair(&keypair));
            }
        });

        let attempts = attempts.into_inner();
        match winner.into_inner() {
            Some(candidate) => SearchOutcome::Found {
                candidate,
                attempts,
            },
            None => SearchOutcome::Exhausted { attempts },
        }
    }
}

/// Hands out one unit of work per attempt until the budget is spent, a match
/// is found, or the caller asks to stop.
struct AttemptBudget<'a, F> {
    issued: u64,
    max_attempts: u64,
    found: &'a AtomicBool,
    should_stop: &'a F,
}

impl<F: Fn() -> bool> Iterator for AttemptBudget<'_, F> {
    type Item = ();

    fn next(&mut self) -> Option<Self::Item> {
        if self.issued >= self.max_attempts
            || self.found.load(Ordering::Relaxed)
            || (self.should_stop)()
        {
            None
        } else {
            self.issued += 1;
            Some(())
        }
    }
}

/// Sets the flag when dropped, so a caller that goes away (for example an
/// HTTP client disconnecting) stops its search.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// A dedicated thread pool for CPU-bound searches.
#[derive(Clone)]
pub struct SearchWorkers {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
}

impl SearchWorkers {
    pub fn new(name: &str, threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let threads = threads.max(1);
        let prefix = name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()?;

        Ok(Self {
            pool: Arc::new(pool),
            threads,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs a bounded search off the async runtime.
    ///
    /// Dropping the returned future cancels the search. `stop` is an extra
    /// external stop flag (pool shutdown).
    pub async fn run(
        &self,
        matcher: SuffixMatcher,
        max_attempts: u64,
        stop: Option<Arc<AtomicBool>>,
    ) -> SearchOutcome {
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancelled));
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let should_stop = || {
                cancelled.load(Ordering::Relaxed)
                    || stop.as_ref().is_some_and(|s| s.load(Ordering::Relaxed))
            };
            let outcome = matcher.search(max_attempts, should_stop);
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("search worker exited without reporting a result");
                SearchOutcome::Exhausted { attempts: 0 }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_ambiguous_symbols() {
        assert_eq!(validate_suffix("", 4), Err(SuffixError::Empty));
        assert_eq!(
            validate_suffix("abcde", 4),
            Err(SuffixError::TooLong { max: 4 })
        );
        for bad in ["0", "O", "I", "l", "a-b"] {
            assert!(
                matches!(validate_suffix(bad, 4), Err(SuffixError::InvalidCharacter(_))),
                "{bad} should be rejected"
            );
        }
        assert!(validate_suffix("pump", 4).is_ok());
        assert!(validate_suffix("zZ9", 4).is_ok());
    }

    #[test]
    fn matcher_folds_case_when_asked() {
        let folded = SuffixMatcher::new("pump", true);
        assert!(folded.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgPUMP"));
        assert!(folded.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJospump"));
        assert!(!folded.matches("ump"));

        let exact = SuffixMatcher::new("pump", false);
        assert!(!exact.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgPUMP"));
        assert!(exact.matches("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJospump"));
    }

    #[test]
    fn search_finds_single_character_suffix() {
        let matcher = SuffixMatcher::new("a", true);
        match matcher.search(100_000, || false) {
            SearchOutcome::Found {
                candidate,
                attempts,
            } => {
                assert!(candidate.public_key.to_lowercase().ends_with('a'));
                assert!(attempts >= 1);
                let keypair = candidate.keypair().unwrap();
                assert_eq!(keypair.pubkey().to_string(), candidate.public_key);
            }
            SearchOutcome::Exhausted { attempts } => {
                panic!("no match after {attempts} attempts")
            }
        }
    }

    #[test]
    fn search_exhausts_exact_budget() {
        let matcher = SuffixMatcher::new("zzzz", false);
        match matcher.search(10, || false) {
            SearchOutcome::Exhausted { attempts } => assert_eq!(attempts, 10),
            SearchOutcome::Found { .. } => panic!("four-symbol match in 10 attempts"),
        }
    }

    #[test]
    fn stop_flag_halts_search() {
        let matcher = SuffixMatcher::new("zzzz", false);
        let outcome = matcher.search(u64::MAX, || true);
        assert_eq!(outcome.attempts(), 0);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let candidate = Candidate::from_keypair(&Keypair::new());
        let rendered = format!("{:?}", candidate);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&candidate.secret_key));
    }

    #[tokio::test]
    async fn workers_report_back_over_channel() {
        let workers = SearchWorkers::new("test-search", 2).unwrap();
        let outcome = workers
            .run(SuffixMatcher::new("b", true), 100_000, None)
            .await;
        assert!(matches!(outcome, SearchOutcome::Found { .. }));
    }
}
