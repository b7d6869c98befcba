//! Core data model shared across the engine: quotes, holdings, events,
//! candidate ETFs, trading signals, and backtest jobs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A point-in-time market quote for a single security.
///
/// Immutable; produced by the `QuoteProvider` boundary (out of scope — see
/// [`crate::provider`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub code: String,
    pub name: String,
    pub price: f64,
    /// Fractional change from previous close, e.g. `0.10` = +10%.
    pub change_pct: f64,
    pub volume: f64,
    /// Cash turnover.
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub is_limit_up: bool,
    pub is_limit_down: bool,
}

/// A single ETF's disclosed position in one stock, as of a snapshot date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Holding {
    pub stock_code: String,
    pub etf_code: String,
    /// Fraction of the ETF's net assets, in `[0, 1]`.
    pub weight: f64,
    /// 1-based position within the ETF's top holdings.
    pub rank: u32,
    pub as_of: NaiveDate,
}

/// One ETF entry under a stock's mapping, or an enriched selection
/// candidate once daily liquidity/quote data has been attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateETF {
    pub etf_code: String,
    pub etf_name: String,
    pub weight: f64,
    pub rank: u32,
    /// Liquidity proxy used by liquidity-sensitive filters/selectors.
    pub daily_amount: f64,
    pub quote: Option<Quote>,
}

/// Market events a detector can raise. `Breakout` and `Momentum` are
/// framework-present per spec — no canonical detector implements them yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MarketEvent {
    LimitUp {
        stock_code: String,
        stock_name: String,
        price: f64,
        change_pct: f64,
        limit_time: DateTime<Utc>,
        seal_amount: f64,
        open_count: u32,
        is_first_limit: bool,
        timestamp: DateTime<Utc>,
    },
    Breakout {
        stock_code: String,
        timestamp: DateTime<Utc>,
    },
    Momentum {
        stock_code: String,
        timestamp: DateTime<Utc>,
    },
}

impl MarketEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            MarketEvent::LimitUp { .. } => "limit_up",
            MarketEvent::Breakout { .. } => "breakout",
            MarketEvent::Momentum { .. } => "momentum",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::LimitUp { timestamp, .. } => *timestamp,
            MarketEvent::Breakout { timestamp, .. } => *timestamp,
            MarketEvent::Momentum { timestamp, .. } => *timestamp,
        }
    }

    pub fn stock_code(&self) -> &str {
        match self {
            MarketEvent::LimitUp { stock_code, .. } => stock_code,
            MarketEvent::Breakout { stock_code, .. } => stock_code,
            MarketEvent::Momentum { stock_code, .. } => stock_code,
        }
    }
}

/// `TradingSignal.confidence_level` per spec §3/§4.D scoring buckets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// `TradingSignal.risk_level` / `CandidateETF` risk classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

/// Named per-factor sub-scores backing `TradingSignal.confidence_score`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceBreakdown {
    pub order: f64,
    pub weight: f64,
    pub liquidity: f64,
    pub time: f64,
}

/// A trading signal, produced by the pipeline and persisted by the
/// [`crate::repository::SignalRepository`]. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSignal {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub stock_code: String,
    pub stock_name: String,
    /// Quote price at signal time, carried through to the CSV export (spec
    /// §6) even though nothing in the scoring pipeline reads it back.
    pub stock_price: f64,
    pub etf_code: String,
    pub etf_name: String,
    pub weight: f64,
    pub event_type: String,
    pub confidence_level: ConfidenceLevel,
    pub confidence_score: f64,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub breakdown: ConfidenceBreakdown,
}

/// A draft signal before the filter chain runs. Carries the same scoring
/// fields as [`TradingSignal`] but has no `id`/persisted timestamp yet.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftSignal {
    pub stock_code: String,
    pub stock_name: String,
    pub etf_code: String,
    pub etf_name: String,
    pub weight: f64,
    pub event_type: String,
    pub confidence_level: ConfidenceLevel,
    pub confidence_score: f64,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub breakdown: ConfidenceBreakdown,
    pub seconds_to_close: i64,
}

/// A single entry in the watchlist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEntry {
    pub code: String,
    pub name: String,
    pub market: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Status of a [`crate::backtest::BacktestJob`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BacktestStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Replay granularity for a backtest run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    #[serde(rename = "5m")]
    FiveMinute,
}

/// Holdings-interpolation strategy between quarterly snapshots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    Linear,
    Step,
}

/// Aggregate statistics attached to a completed [`BacktestResult`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BacktestStatistics {
    pub total_signals: usize,
    pub high_confidence_count: usize,
    pub medium_confidence_count: usize,
    pub low_confidence_count: usize,
    /// `YYYY-MM-DD` -> signal count emitted on that date.
    pub per_date_counts: HashMap<String, usize>,
}

/// Final output of a completed backtest job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestResult {
    pub statistics: BacktestStatistics,
    pub signals: Vec<TradingSignal>,
    /// The submitted config this result was produced from, for callers that
    /// only kept the `job_id` around.
    pub config_echo: crate::backtest::job::BacktestConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_event_accessors_match_variant() {
        let ts = Utc::now();
        let ev = MarketEvent::LimitUp {
            stock_code: "600519".into(),
            stock_name: "Moutai".into(),
            price: 1980.0,
            change_pct: 0.0999,
            limit_time: ts,
            seal_amount: 1.2e9,
            open_count: 0,
            is_first_limit: true,
            timestamp: ts,
        };
        assert_eq!(ev.event_type(), "limit_up");
        assert_eq!(ev.stock_code(), "600519");
        assert_eq!(ev.timestamp(), ts);
    }

    #[test]
    fn confidence_level_str_round_trips_through_serde() {
        let json = serde_json::to_string(&ConfidenceLevel::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: ConfidenceLevel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConfidenceLevel::High);
    }
}
