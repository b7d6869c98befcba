//! Backtest Driver: replays the arbitrage pipeline over a historical date
//! range at a chosen granularity, producing a deterministic signal set,
//! tracked through `BacktestJob`/`BacktestResult`.

pub mod job;

pub use job::{BacktestConfig, BacktestJob, JobQuery, JobStore};

use crate::clock::{FixedClock, TradingHours};
use crate::config::{validate, Registries};
use crate::engine::{ArbitrageEngine, EngineSettings};
use crate::mapping::StockEtfMapping;
use crate::models::{
    BacktestResult, BacktestStatistics, ConfidenceLevel, Granularity, Holding, Interpolation, Quote,
};
use crate::provider::{HoldingsProvider, QuoteProvider};
use crate::registry::PluginRegistry;
use crate::repository::{InMemorySignalRepository, SignalRepository};
use crate::strategy::{EventDetector, FundSelector, ScoringConfig, SignalFilter};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Historical quote lookup, the backtest analogue of [`QuoteProvider`]: one
/// quote per `(code, bar timestamp)` instead of "latest".
#[async_trait]
pub trait HistoricalQuoteSource: Send + Sync {
    async fn quote_at(&self, code: &str, at: DateTime<Utc>) -> anyhow::Result<Quote>;
}

/// Quarterly (or otherwise periodic) holdings disclosures for one ETF,
/// ascending by `as_of`, used to interpolate a holding's weight/rank for an
/// arbitrary backtest date.
#[async_trait]
pub trait HoldingsSnapshotSource: Send + Sync {
    async fn snapshots(&self, etf_code: &str) -> anyhow::Result<Vec<(NaiveDate, Vec<Holding>)>>;
}

/// A calendar view resolving `[start, end]` to the trading dates within it.
pub trait TradingCalendar: Send + Sync {
    fn trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate>;
}

/// Weekday-only calendar (Mon–Fri); no exchange holiday table. A documented
/// simplification — a real holiday calendar is out of scope here.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusinessDayCalendar;

impl TradingCalendar for BusinessDayCalendar {
    fn trading_dates(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = Vec::new();
        let mut d = start;
        while d <= end {
            if !matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
                dates.push(d);
            }
            match d.succ_opt() {
                Some(next) => d = next,
                None => break,
            }
        }
        dates
    }
}

/// Interpolate a holding's `(weight, rank)` for `target` from `snapshots`
/// (need not be pre-sorted). `rank` is taken from the nearer snapshot, never
/// interpolated. Returns `None` iff
/// `snapshots` is empty.
pub fn interpolate_weight(
    interpolation: Interpolation,
    target: NaiveDate,
    snapshots: &[(NaiveDate, f64, u32)],
) -> Option<(f64, u32)> {
    if snapshots.is_empty() {
        return None;
    }
    let mut sorted = snapshots.to_vec();
    sorted.sort_by_key(|(as_of, _, _)| *as_of);

    match interpolation {
        Interpolation::Step => sorted
            .iter()
            .rev()
            .find(|(as_of, _, _)| *as_of <= target)
            .or_else(|| sorted.first())
            .map(|(_, w, r)| (*w, *r)),
        Interpolation::Linear => {
            let before = sorted.iter().rev().find(|(as_of, _, _)| *as_of <= target);
            let after = sorted.iter().find(|(as_of, _, _)| *as_of >= target);
            match (before, after) {
                (Some((d0, w0, r0)), Some((d1, w1, r1))) if d0 != d1 => {
                    let span = (*d1 - *d0).num_days().max(1) as f64;
                    let elapsed = (target - *d0).num_days() as f64;
                    let t = (elapsed / span).clamp(0.0, 1.0);
                    let rank = if t < 0.5 { *r0 } else { *r1 };
                    Some((w0 + (w1 - w0) * t, rank))
                }
                (Some((_, w, r)), _) => Some((*w, *r)),
                (None, Some((_, w, r))) => Some((*w, *r)),
                (None, None) => None,
            }
        }
    }
}

/// Adapts a [`HoldingsSnapshotSource`] into a [`HoldingsProvider`] pinned to
/// one backtest date, so [`StockEtfMapping::rebuild`] can be called
/// unchanged against interpolated historical holdings.
pub struct InterpolatedHoldingsProvider {
    source: Arc<dyn HoldingsSnapshotSource>,
    target: NaiveDate,
    interpolation: Interpolation,
}

impl InterpolatedHoldingsProvider {
    pub fn new(
        source: Arc<dyn HoldingsSnapshotSource>,
        target: NaiveDate,
        interpolation: Interpolation,
    ) -> Self {
        Self {
            source,
            target,
            interpolation,
        }
    }
}

#[async_trait]
impl HoldingsProvider for InterpolatedHoldingsProvider {
    async fn top_holdings(&self, etf_code: &str, top_n: usize) -> anyhow::Result<Vec<Holding>> {
        let snapshots = self.source.snapshots(etf_code).await?;
        if snapshots.is_empty() {
            return Ok(Vec::new());
        }

        let mut per_stock: HashMap<String, Vec<(NaiveDate, f64, u32)>> = HashMap::new();
        for (as_of, holdings) in &snapshots {
            for h in holdings {
                per_stock
                    .entry(h.stock_code.clone())
                    .or_default()
                    .push((*as_of, h.weight, h.rank));
            }
        }

        let mut out: Vec<Holding> = per_stock
            .into_iter()
            .filter_map(|(stock_code, series)| {
                interpolate_weight(self.interpolation, self.target, &series).map(|(weight, rank)| Holding {
                    stock_code,
                    etf_code: etf_code.to_string(),
                    weight,
                    rank,
                    as_of: self.target,
                })
            })
            .collect();

        out.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(top_n);
        Ok(out)
    }
}

/// A [`QuoteProvider`] pinned to one historical bar timestamp, so the
/// existing [`ArbitrageEngine`] can run its per-security subroutine
/// unmodified against replayed data.
struct BarQuoteProvider {
    source: Arc<dyn HistoricalQuoteSource>,
    at: DateTime<Utc>,
}

#[async_trait]
impl QuoteProvider for BarQuoteProvider {
    async fn get_quote(&self, code: &str) -> anyhow::Result<Quote> {
        self.source.quote_at(code, self.at).await
    }
}

/// Synthetic bar timestamps for one trading date. Daily
/// granularity emits a single bar mid-afternoon; 5-minute granularity walks
/// both sessions.
fn bars_for_date(date: NaiveDate, granularity: Granularity, hours: &TradingHours) -> Vec<DateTime<Utc>> {
    match granularity {
        Granularity::Daily => {
            let t = NaiveTime::from_hms_opt(14, 50, 0).unwrap();
            vec![Utc.from_utc_datetime(&date.and_time(t))]
        }
        Granularity::FiveMinute => {
            let mut bars = Vec::new();
            for (open, close) in [
                (hours.morning_open, hours.morning_close),
                (hours.afternoon_open, hours.afternoon_close),
            ] {
                let mut t = open;
                loop {
                    bars.push(Utc.from_utc_datetime(&date.and_time(t)));
                    if t >= close {
                        break;
                    }
                    t += chrono::Duration::minutes(5);
                }
            }
            bars
        }
    }
}

/// An in-memory [`HistoricalQuoteSource`] + [`HoldingsSnapshotSource`] for
/// tests and the `init`-time placeholder wiring (no real historical data
/// adapter is in scope).
#[derive(Debug, Default, Clone)]
pub struct StaticHistoricalSource {
    quotes: HashMap<(String, DateTime<Utc>), Quote>,
    snapshots: HashMap<String, Vec<(NaiveDate, Vec<Holding>)>>,
}

impl StaticHistoricalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quote(mut self, code: impl Into<String>, at: DateTime<Utc>, quote: Quote) -> Self {
        self.quotes.insert((code.into(), at), quote);
        self
    }

    pub fn with_snapshot(
        mut self,
        etf_code: impl Into<String>,
        as_of: NaiveDate,
        holdings: Vec<Holding>,
    ) -> Self {
        self.snapshots.entry(etf_code.into()).or_default().push((as_of, holdings));
        self
    }
}

#[async_trait]
impl HistoricalQuoteSource for StaticHistoricalSource {
    async fn quote_at(&self, code: &str, at: DateTime<Utc>) -> anyhow::Result<Quote> {
        self.quotes
            .get(&(code.to_string(), at))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no historical quote for {code} at {at}"))
    }
}

#[async_trait]
impl HoldingsSnapshotSource for StaticHistoricalSource {
    async fn snapshots(&self, etf_code: &str) -> anyhow::Result<Vec<(NaiveDate, Vec<Holding>)>> {
        Ok(self.snapshots.get(etf_code).cloned().unwrap_or_default())
    }
}

/// Replays the pipeline over `[start_date, end_date]`.
/// Determinism is maintained by pinning `scan_concurrency` to 1 and
/// constructing a fresh engine (and quote cache) per bar, so one bar's
/// cached quote never leaks into the next.
pub struct BacktestDriver {
    quotes: Arc<dyn HistoricalQuoteSource>,
    holdings: Arc<dyn HoldingsSnapshotSource>,
    calendar: Arc<dyn TradingCalendar>,
    /// `(etf_code, etf_name)` universe used to build each date's mapping —
    /// mirrors the universe the production `init` command rebuilds against,
    /// since a backtest request has no independent way to discover it.
    etf_universe: Vec<(String, String)>,
    detectors: Arc<PluginRegistry<dyn EventDetector>>,
    selectors: Arc<PluginRegistry<dyn FundSelector>>,
    filters: Arc<PluginRegistry<dyn SignalFilter>>,
    jobs: Arc<JobStore>,
}

impl BacktestDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        quotes: Arc<dyn HistoricalQuoteSource>,
        holdings: Arc<dyn HoldingsSnapshotSource>,
        calendar: Arc<dyn TradingCalendar>,
        etf_universe: Vec<(String, String)>,
        detectors: Arc<PluginRegistry<dyn EventDetector>>,
        selectors: Arc<PluginRegistry<dyn FundSelector>>,
        filters: Arc<PluginRegistry<dyn SignalFilter>>,
        jobs: Arc<JobStore>,
    ) -> Self {
        Self {
            quotes,
            holdings,
            calendar,
            etf_universe,
            detectors,
            selectors,
            filters,
            jobs,
        }
    }

    pub fn jobs(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Validate `config`, enqueue it, and spawn the replay in the
    /// background. `default_securities` is the watchlist snapshot to fall
    /// back to when `config.securities` is absent.
    pub fn submit(
        self: &Arc<Self>,
        config: BacktestConfig,
        default_securities: Vec<String>,
    ) -> anyhow::Result<Uuid> {
        if config.start_date > config.end_date {
            anyhow::bail!("start_date must not be after end_date");
        }

        let registries = Registries {
            detectors: self.detectors.as_ref(),
            selectors: self.selectors.as_ref(),
            filters: self.filters.as_ref(),
        };
        let (ok, errors) = validate(&config.engine_config, &registries);
        if !ok {
            anyhow::bail!("invalid engine_config: {}", errors.join("; "));
        }

        if self
            .calendar
            .trading_dates(config.start_date, config.end_date)
            .is_empty()
        {
            anyhow::bail!(
                "no trading dates in [{}, {}]",
                config.start_date,
                config.end_date
            );
        }

        let securities = config.securities.clone().unwrap_or(default_securities);
        let (job_id, token) = self.jobs.submit(config);

        let driver = self.clone();
        tokio::spawn(async move { driver.run_job(job_id, token, securities).await });

        Ok(job_id)
    }

    async fn run_job(self: Arc<Self>, job_id: Uuid, token: CancellationToken, securities: Vec<String>) {
        self.jobs.mark_running(job_id);
        let Some(job) = self.jobs.get(job_id) else {
            return;
        };

        let outcome = self.execute(&job.config, job_id, &token, &securities).await;
        if token.is_cancelled() {
            // `JobStore::cancel` already recorded the terminal state.
            return;
        }
        match outcome {
            Ok(result) => self.jobs.complete(job_id, result),
            Err(e) => self.jobs.fail(job_id, e.to_string()),
        }
    }

    async fn execute(
        &self,
        config: &BacktestConfig,
        job_id: Uuid,
        token: &CancellationToken,
        securities: &[String],
    ) -> anyhow::Result<BacktestResult> {
        let dates = self.calendar.trading_dates(config.start_date, config.end_date);
        let total = dates.len().max(1);

        let detector = self.detectors.build(
            &config.engine_config.event_detector,
            &Value::Object(config.engine_config.event_config.clone()),
        )?;
        let selector = self.selectors.build(
            &config.engine_config.fund_selector,
            &Value::Object(config.engine_config.fund_config.clone()),
        )?;
        let mut filters = Vec::with_capacity(config.engine_config.signal_filters.len());
        for name in &config.engine_config.signal_filters {
            let cfg = config
                .engine_config
                .filter_configs
                .get(name)
                .cloned()
                .map(Value::Object)
                .unwrap_or(Value::Null);
            filters.push(self.filters.build(name, &cfg)?);
        }

        // One repository shared across the whole run (not per-bar), so ids
        // stay monotonic for the run and results never touch the live
        // signals store.
        let repository: Arc<dyn SignalRepository> = Arc::new(InMemorySignalRepository::new());
        let trading_hours = TradingHours::default();
        let settings = EngineSettings {
            min_weight: config.engine_config.min_weight,
            quote_ttl: Duration::from_secs(5),
            scan_concurrency: 1,
            scan_interval: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(10),
            scoring: ScoringConfig::default(),
        };

        let mut all_signals = Vec::new();

        for (done, date) in dates.iter().enumerate() {
            if token.is_cancelled() {
                anyhow::bail!("cancelled");
            }

            let mapping = Arc::new(StockEtfMapping::new());
            let holdings_provider =
                InterpolatedHoldingsProvider::new(self.holdings.clone(), *date, config.interpolation);
            mapping
                .rebuild(&self.etf_universe, &holdings_provider, 10, 0.0)
                .await?;

            for bar in bars_for_date(*date, config.granularity, &trading_hours) {
                let quote_provider: Arc<dyn QuoteProvider> = Arc::new(BarQuoteProvider {
                    source: self.quotes.clone(),
                    at: bar,
                });
                // Fresh engine per bar: a fresh TtlCache so one bar's quote
                // never answers the next bar's lookup for the same code.
                let engine = Arc::new(ArbitrageEngine::new(
                    quote_provider,
                    mapping.clone(),
                    repository.clone(),
                    detector.clone(),
                    selector.clone(),
                    filters.clone(),
                    settings.clone(),
                ));
                let clock = FixedClock(bar);
                let mut result = engine.scan(securities, &clock).await;
                result.signals_emitted.sort_by(|a, b| a.stock_code.cmp(&b.stock_code));
                all_signals.append(&mut result.signals_emitted);
            }

            self.jobs.set_progress(job_id, (done + 1) as f64 / total as f64);
        }

        let mut statistics = BacktestStatistics::default();
        for signal in &all_signals {
            statistics.total_signals += 1;
            match signal.confidence_level {
                ConfidenceLevel::High => statistics.high_confidence_count += 1,
                ConfidenceLevel::Medium => statistics.medium_confidence_count += 1,
                ConfidenceLevel::Low => statistics.low_confidence_count += 1,
            }
            *statistics
                .per_date_counts
                .entry(signal.timestamp.format("%Y-%m-%d").to_string())
                .or_insert(0) += 1;
        }

        Ok(BacktestResult {
            statistics,
            signals: all_signals,
            config_echo: config.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_registries, EngineConfig};
    use crate::models::{BacktestStatus, Granularity, Interpolation};
    use chrono::TimeZone;

    #[test]
    fn business_day_calendar_excludes_weekends() {
        let cal = BusinessDayCalendar;
        // 2024-01-06/07 is a Sat/Sun.
        let dates = cal.trading_dates(
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
        );
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 8).unwrap(),
            ]
        );
    }

    #[test]
    fn linear_interpolation_midpoint() {
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 11).unwrap();
        let target = NaiveDate::from_ymd_opt(2024, 1, 6).unwrap();
        let (weight, rank) =
            interpolate_weight(Interpolation::Linear, target, &[(d0, 0.05, 3), (d1, 0.09, 1)]).unwrap();
        assert!((weight - 0.07).abs() < 1e-9, "got {weight}");
        assert_eq!(rank, 1, "midpoint rounds to the later snapshot's rank");
    }

    #[test]
    fn step_interpolation_holds_last_snapshot() {
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let target = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
        let (weight, rank) =
            interpolate_weight(Interpolation::Step, target, &[(d0, 0.05, 3), (d1, 0.09, 1)]).unwrap();
        assert_eq!(weight, 0.05);
        assert_eq!(rank, 3);
    }

    #[test]
    fn interpolation_before_first_snapshot_falls_back_to_earliest() {
        let d0 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let target = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (weight, _) = interpolate_weight(Interpolation::Linear, target, &[(d0, 0.08, 2)]).unwrap();
        assert_eq!(weight, 0.08);
    }

    fn quote_at(ts: DateTime<Utc>, code: &str, price: f64, change_pct: f64) -> Quote {
        Quote {
            code: code.to_string(),
            name: "Moutai".to_string(),
            price,
            change_pct,
            volume: 1e6,
            amount: 1.98e9,
            timestamp: ts,
            is_limit_up: true,
            is_limit_down: false,
        }
    }

    async fn run_balanced_backtest() -> BacktestResult {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 14, 50, 0).unwrap();
        let source = Arc::new(
            StaticHistoricalSource::new()
                .with_quote("600519", ts, quote_at(ts, "600519", 1980.0, 0.0999))
                .with_snapshot(
                    "510300",
                    NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
                    vec![Holding {
                        stock_code: "600519".into(),
                        etf_code: "510300".into(),
                        weight: 0.085,
                        rank: 5,
                        as_of: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
                    }],
                ),
        );
        let (detectors, selectors, filters) = builtin_registries();
        let jobs = Arc::new(JobStore::new());
        let driver = Arc::new(BacktestDriver::new(
            source.clone(),
            source,
            Arc::new(BusinessDayCalendar),
            vec![("510300".to_string(), "CSI 300 ETF".to_string())],
            Arc::new(detectors),
            Arc::new(selectors),
            Arc::new(filters),
            jobs.clone(),
        ));

        let config = BacktestConfig {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            granularity: Granularity::Daily,
            engine_config: EngineConfig::balanced(),
            securities: Some(vec!["600519".to_string()]),
            interpolation: Interpolation::Linear,
        };
        let job_id = driver.submit(config, Vec::new()).unwrap();

        loop {
            let job = jobs.get(job_id).unwrap();
            match job.status {
                BacktestStatus::Completed => return job.result.unwrap(),
                BacktestStatus::Failed => panic!("backtest failed: {:?}", job.error),
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    #[tokio::test]
    async fn backtest_emits_expected_signal() {
        let result = run_balanced_backtest().await;
        assert_eq!(result.signals.len(), 1);
        assert_eq!(result.signals[0].stock_code, "600519");
        assert_eq!(result.statistics.total_signals, 1);
    }

    #[tokio::test]
    async fn backtest_is_deterministic_across_reruns() {
        let first = run_balanced_backtest().await;
        let second = run_balanced_backtest().await;
        assert_eq!(first.signals.len(), second.signals.len());
        for (a, b) in first.signals.iter().zip(second.signals.iter()) {
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.stock_code, b.stock_code);
            assert_eq!(a.etf_code, b.etf_code);
            assert_eq!(a.confidence_score, b.confidence_score);
        }
    }
}
