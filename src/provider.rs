//! External collaborator seams.
//!
//! `QuoteProvider` and `HoldingsProvider` are the two boundaries the engine
//! depends on but does not implement: a provider exposes quote-fetch and
//! holdings-fetch methods only. Production wiring plugs in a real market
//! data adapter; tests use [`StaticProvider`].
//!
//! [`retry_with_backoff`] is the one piece of provider-call *policy* that is
//! in scope: every provider call gets a timeout and exponential
//! backoff on transient errors, generalized from the repeated
//! timeout-then-retry shape in the teacher's scraper modules into a single
//! reusable helper instead of being copy-pasted per adapter.

use crate::models::{Holding, Quote};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Fetch the latest quote for one security.
    async fn get_quote(&self, code: &str) -> anyhow::Result<Quote>;

    /// Fetch latest quotes for many securities in one round trip. The
    /// default implementation fans out to [`get_quote`](Self::get_quote);
    /// real adapters should override this with a genuine batch call.
    async fn get_quotes(&self, codes: &[String]) -> anyhow::Result<Vec<Quote>> {
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            out.push(self.get_quote(code).await?);
        }
        Ok(out)
    }
}

#[async_trait]
pub trait HoldingsProvider: Send + Sync {
    /// Fetch the top-N holdings for one ETF, most-recent snapshot.
    async fn top_holdings(&self, etf_code: &str, top_n: usize) -> anyhow::Result<Vec<Holding>>;

    /// Human-readable name for an ETF code (used when building mapping
    /// entries); falls back to the code itself if unknown.
    async fn etf_name(&self, etf_code: &str) -> anyhow::Result<String> {
        Ok(etf_code.to_string())
    }
}

/// Retry policy per spec §5: 3 attempts, base 200ms, capped at 2s, doubling
/// each attempt, applied around any fallible async provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Run `op` under `policy`'s timeout, retrying with exponential backoff on
/// failure (including timeout) up to `policy.attempts` times.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut last_err = None;
    for attempt in 1..=policy.attempts {
        let attempt_result = tokio::time::timeout(policy.timeout, op()).await;
        match attempt_result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(op = op_name, attempt, error = %e, "provider call failed");
                last_err = Some(e);
            }
            Err(_) => {
                warn!(op = op_name, attempt, "provider call timed out");
                last_err = Some(anyhow::anyhow!("{op_name} timed out after {:?}", policy.timeout));
            }
        }
        if attempt < policy.attempts {
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, policy.max_delay);
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{op_name} failed with no recorded error")))
}

/// An in-memory provider backed by fixed maps, used by tests and by the
/// `init`/backtest code paths that synthesize quotes rather than calling a
/// live adapter.
#[derive(Debug, Default, Clone)]
pub struct StaticProvider {
    pub quotes: HashMap<String, Quote>,
    pub holdings: HashMap<String, Vec<Holding>>,
    pub etf_names: HashMap<String, String>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quotes.insert(quote.code.clone(), quote);
        self
    }

    pub fn with_holdings(mut self, etf_code: impl Into<String>, holdings: Vec<Holding>) -> Self {
        self.holdings.insert(etf_code.into(), holdings);
        self
    }

    pub fn with_etf_name(mut self, etf_code: impl Into<String>, name: impl Into<String>) -> Self {
        self.etf_names.insert(etf_code.into(), name.into());
        self
    }
}

#[async_trait]
impl QuoteProvider for StaticProvider {
    async fn get_quote(&self, code: &str) -> anyhow::Result<Quote> {
        self.quotes
            .get(code)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no quote for {code}"))
    }
}

#[async_trait]
impl HoldingsProvider for StaticProvider {
    async fn top_holdings(&self, etf_code: &str, top_n: usize) -> anyhow::Result<Vec<Holding>> {
        Ok(self
            .holdings
            .get(etf_code)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(top_n)
            .collect())
    }

    async fn etf_name(&self, etf_code: &str) -> anyhow::Result<String> {
        Ok(self
            .etf_names
            .get(etf_code)
            .cloned()
            .unwrap_or_else(|| etf_code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retry_with_backoff_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            timeout: Duration::from_secs(1),
        };

        let c = calls.clone();
        let result = retry_with_backoff(policy, "test_op", move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    anyhow::bail!("transient");
                }
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_exhausts_attempts() {
        let policy = RetryPolicy {
            attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            timeout: Duration::from_secs(1),
        };
        let result: anyhow::Result<i32> =
            retry_with_backoff(policy, "test_op", || async { anyhow::bail!("always fails") })
                .await;
        assert!(result.is_err());
    }
}
