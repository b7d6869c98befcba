//! Arbitrage Engine: orchestrates a scan over the watchlist,
//! driving the strategy pipeline per security and persisting accepted
//! signals. Generalizes the teacher's `arbitrage/engine.rs` scan-then-filter
//! shape from a two-platform spread detector into the stock/ETF pipeline.

use crate::cache::TtlCache;
use crate::clock::{Clock, TradingHours};
use crate::mapping::StockEtfMapping;
use crate::models::{CandidateETF, Quote, TradingSignal};
use crate::provider::QuoteProvider;
use crate::repository::SignalRepository;
use crate::strategy::{draft_signal, EventDetector, FundSelector, ScoringConfig, SignalFilter};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of the per-security subroutine for one watched code: either a
/// persisted signal, or a rejection with the reason it stopped at.
#[derive(Debug, Clone)]
pub enum SecurityOutcome {
    Signal(TradingSignal),
    Rejected { stock_code: String, reason: String },
    /// The quote fetch itself failed (provider timeout/error), as opposed to
    /// a clean "no event" result. Counted separately so a total provider
    /// outage is distinguishable from a quiet scan.
    ProviderError { stock_code: String },
}

/// Aggregate outcome of one `scan` call.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub candidates_seen: usize,
    pub events: usize,
    pub signals_emitted: Vec<TradingSignal>,
    pub signals_rejected_with_reasons: Vec<(String, String)>,
    pub quote_errors: usize,
    pub elapsed_ms: u64,
}

/// Tunables resolved from `EngineConfig`/`AppConfig` at construction time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub min_weight: f64,
    pub quote_ttl: Duration,
    pub scan_concurrency: usize,
    pub scan_interval: Duration,
    pub shutdown_grace: Duration,
    pub scoring: ScoringConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_weight: 0.05,
            quote_ttl: Duration::from_secs(5),
            scan_concurrency: 8,
            scan_interval: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
            scoring: ScoringConfig::default(),
        }
    }
}

/// The scan+monitor orchestrator. Holds shared, stateless-beyond-their-caches
/// handles to its collaborators.
pub struct ArbitrageEngine {
    quotes: Arc<dyn QuoteProvider>,
    mapping: Arc<StockEtfMapping>,
    repository: Arc<dyn SignalRepository>,
    detector: Arc<dyn EventDetector>,
    selector: Arc<dyn FundSelector>,
    filters: Vec<Arc<dyn SignalFilter>>,
    quote_cache: TtlCache<String, Quote>,
    settings: EngineSettings,
    trading_hours: TradingHours,
    monitor_running: std::sync::atomic::AtomicBool,
    last_scan_time: parking_lot::Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    today_signals: AtomicI64,
    limitup_count: AtomicI64,
    scan_generation: AtomicU64,
}

impl ArbitrageEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quotes: Arc<dyn QuoteProvider>,
        mapping: Arc<StockEtfMapping>,
        repository: Arc<dyn SignalRepository>,
        detector: Arc<dyn EventDetector>,
        selector: Arc<dyn FundSelector>,
        filters: Vec<Arc<dyn SignalFilter>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            quotes,
            mapping,
            repository,
            detector,
            selector,
            filters,
            quote_cache: TtlCache::new(10_000),
            settings,
            trading_hours: TradingHours::default(),
            monitor_running: std::sync::atomic::AtomicBool::new(false),
            last_scan_time: parking_lot::Mutex::new(None),
            today_signals: AtomicI64::new(0),
            limitup_count: AtomicI64::new(0),
            scan_generation: AtomicU64::new(0),
        }
    }

    pub fn is_monitor_running(&self) -> bool {
        self.monitor_running.load(Ordering::SeqCst)
    }

    pub fn last_scan_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        *self.last_scan_time.lock()
    }

    pub fn today_signal_count(&self) -> i64 {
        self.today_signals.load(Ordering::SeqCst)
    }

    pub fn limitup_count(&self) -> i64 {
        self.limitup_count.load(Ordering::SeqCst)
    }

    pub fn mapping(&self) -> &Arc<StockEtfMapping> {
        &self.mapping
    }

    /// Fetch quotes for `codes` through the same single-flight TTL cache
    /// `scan` uses, for control-plane reads (`/api/stocks`, the limit-up
    /// list) that want a live-ish view without hammering the provider.
    /// Codes whose fetch fails are silently dropped, matching the per-security
    /// failure model: a missing quote is not an error here.
    pub async fn quotes_for(&self, codes: &[String]) -> Vec<Quote> {
        let mut out = Vec::with_capacity(codes.len());
        for code in codes {
            let fetch = self.quote_cache.get_or_fill(code.clone(), self.settings.quote_ttl, {
                let quotes = self.quotes.clone();
                let code = code.clone();
                move || {
                    let quotes = quotes.clone();
                    let code = code.clone();
                    async move { quotes.get_quote(&code).await }
                }
            });
            if let Ok((quote, _filled)) = fetch.await {
                out.push(quote);
            }
        }
        out
    }

    /// One sweep over `watched`. Requires `self` behind an `Arc` because each
    /// security is scanned in its own spawned task, and `tokio::spawn`
    /// requires its future to be `'static`.
    pub async fn scan(self: &Arc<Self>, watched: &[String], clock: &dyn Clock) -> ScanResult {
        let started = Instant::now();
        let now = clock.now();
        let seconds_to_close = self.trading_hours.seconds_to_close(now);

        let permits = self.settings.scan_concurrency.max(1).min(watched.len().max(1));
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles = Vec::with_capacity(watched.len());
        for code in watched {
            let code = code.clone();
            let semaphore = semaphore.clone();
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                this.run_security(code, seconds_to_close).await
            }));
        }

        let mut result = ScanResult::default();
        result.candidates_seen = watched.len();

        for handle in handles {
            match handle.await {
                Ok(Some(outcome)) => match outcome {
                    SecurityOutcome::Signal(signal) => {
                        result.events += 1;
                        self.today_signals.fetch_add(1, Ordering::SeqCst);
                        self.limitup_count.fetch_add(1, Ordering::SeqCst);
                        result.signals_emitted.push(signal);
                    }
                    SecurityOutcome::Rejected { stock_code, reason } => {
                        result.events += 1;
                        result.signals_rejected_with_reasons.push((stock_code, reason));
                    }
                    SecurityOutcome::ProviderError { stock_code } => {
                        result.quote_errors += 1;
                        warn!(stock_code = %stock_code, "quote fetch failed");
                    }
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "security subroutine task panicked"),
            }
        }

        *self.last_scan_time.lock() = Some(now);
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        self.scan_generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// The per-security subroutine. Returns `None` for
    /// "no event" (not a candidate worth reporting at all); `Some(outcome)`
    /// for every detected event, whether it ends in a signal or a rejection.
    async fn run_security(&self, code: String, seconds_to_close: i64) -> Option<SecurityOutcome> {
        let quote = match self
            .quote_cache
            .get_or_fill(code.clone(), self.settings.quote_ttl, {
                let quotes = self.quotes.clone();
                let code = code.clone();
                move || {
                    let quotes = quotes.clone();
                    let code = code.clone();
                    async move { quotes.get_quote(&code).await }
                }
            })
            .await
        {
            Ok((quote, _filled)) => quote,
            Err(e) => {
                debug!(stock_code = %code, error = %e, "quote fetch failed");
                return Some(SecurityOutcome::ProviderError { stock_code: code });
            }
        };

        let event = self.detector.detect(&quote)?;

        if !self.detector.is_valid(&event) {
            return Some(SecurityOutcome::Rejected {
                stock_code: code,
                reason: "event invalid".to_string(),
            });
        }

        let eligible: Vec<CandidateETF> = self
            .mapping
            .get_etfs_for(&code)
            .into_iter()
            .filter(|etf| etf.weight >= self.settings.min_weight)
            .collect();

        if eligible.is_empty() {
            return Some(SecurityOutcome::Rejected {
                stock_code: code,
                reason: "no eligible ETF".to_string(),
            });
        }

        let fund = match self.selector.select(&eligible, &event) {
            Some(fund) => fund,
            None => {
                return Some(SecurityOutcome::Rejected {
                    stock_code: code,
                    reason: "selector returned none".to_string(),
                })
            }
        };

        let selection_reason = self.selector.get_selection_reason(&fund);
        let draft = draft_signal(&event, &fund, &selection_reason, seconds_to_close, &self.settings.scoring);

        for filter in &self.filters {
            let (pass, reason) = filter.filter(&event, &fund, &draft);
            if !pass {
                debug!(stock_code = %code, filter = filter.name(), %reason, "signal rejected");
                return Some(SecurityOutcome::Rejected {
                    stock_code: code,
                    reason,
                });
            }
        }

        let signal = TradingSignal {
            id: 0,
            timestamp: quote.timestamp,
            stock_code: draft.stock_code,
            stock_name: draft.stock_name,
            stock_price: quote.price,
            etf_code: draft.etf_code,
            etf_name: draft.etf_name,
            weight: draft.weight,
            event_type: draft.event_type,
            confidence_level: draft.confidence_level,
            confidence_score: draft.confidence_score,
            risk_level: draft.risk_level,
            reason: draft.reason,
            breakdown: draft.breakdown,
        };

        match self.repository.insert(signal) {
            Ok(persisted) => Some(SecurityOutcome::Signal(persisted)),
            Err(e) => {
                warn!(stock_code = %code, error = %e, "signal insert failed");
                Some(SecurityOutcome::Rejected {
                    stock_code: code,
                    reason: "storage error".to_string(),
                })
            }
        }
    }

    /// Long-lived monitor loop: scans every `scan_interval` while inside
    /// trading hours, sleeps until the next open otherwise.
    /// Idempotent `start`/`stop` is enforced by the caller (see
    /// `coordinator` in `main.rs`), not here — this method just runs until
    /// `cancel` fires.
    pub async fn run_monitor_loop(
        self: Arc<Self>,
        watchlist_codes: impl Fn() -> Vec<String> + Send + Sync + 'static,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) {
        self.monitor_running.store(true, Ordering::SeqCst);
        info!("monitor loop starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let now = clock.now();
            if !self.trading_hours.is_trading_time(now) {
                let sleep = tokio::time::sleep(Duration::from_secs(30));
                tokio::select! {
                    _ = sleep => continue,
                    _ = cancel.cancelled() => break,
                }
            }

            let watched = watchlist_codes();
            let result = self.scan(&watched, clock.as_ref()).await;
            info!(
                signals = result.signals_emitted.len(),
                rejected = result.signals_rejected_with_reasons.len(),
                elapsed_ms = result.elapsed_ms,
                "scan complete"
            );

            let sleep = tokio::time::sleep(self.settings.scan_interval);
            tokio::select! {
                _ = sleep => {},
                _ = cancel.cancelled() => break,
            }
        }

        self.monitor_running.store(false, Ordering::SeqCst);
        info!("monitor loop stopped");
    }
}
