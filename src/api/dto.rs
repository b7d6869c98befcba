//! Request/response shapes for the control plane.
//! Plain data carried over the wire; `src/models.rs` types are reused
//! directly wherever the endpoint table's success body names a data-model
//! type verbatim (`Quote`, `CandidateETF`, `TradingSignal`, `WatchEntry`,
//! `BacktestJob`, `BacktestResult`).

use crate::models::Granularity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub monitor_running: bool,
    pub is_trading_time: bool,
    pub watchlist_count: usize,
    pub covered_etf_count: usize,
    pub today_signals: i64,
    pub limitup_count: i64,
    pub last_scan_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SignalListQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub today_only: bool,
    pub stock_code: Option<String>,
    pub etf_code: Option<String>,
    pub event_type: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub signals_emitted: usize,
    pub signals_rejected: usize,
    pub quote_errors: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MonitorStatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct BacktestStartRequest {
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
    pub strategy_template: Option<String>,
    pub engine_config: Option<crate::config::EngineConfig>,
    #[serde(default)]
    pub securities: Option<Vec<String>>,
    #[serde(default = "default_interpolation")]
    pub interpolation: crate::models::Interpolation,
}

fn default_granularity() -> Granularity {
    Granularity::Daily
}

fn default_interpolation() -> crate::models::Interpolation {
    crate::models::Interpolation::Linear
}

#[derive(Debug, Serialize)]
pub struct BacktestStartResponse {
    pub job_id: uuid::Uuid,
}

#[derive(Debug, Deserialize, Default)]
pub struct JobListQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    pub status: Option<crate::models::BacktestStatus>,
}

#[derive(Debug, Deserialize)]
pub struct WatchlistAddRequest {
    pub code: String,
    pub name: String,
    pub market: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WatchlistAddResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PluginsResponse {
    pub evaluators: Vec<String>,
    /// No notification sender is in scope; always empty.
    pub senders: Vec<String>,
    /// No raw provider adapter is in scope; always empty.
    pub sources: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub priority: i32,
    pub description: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct StrategiesResponse {
    pub event_detectors: Vec<PluginDescriptor>,
    pub fund_selectors: Vec<PluginDescriptor>,
    pub signal_filters: Vec<PluginDescriptor>,
}

#[derive(Debug, Deserialize, Default)]
pub struct StrategiesValidateQuery {
    /// Shorthand: resolve to a named template (`balanced`/`conservative`/
    /// `aggressive`) instead of specifying each field individually.
    pub template: Option<String>,
    pub event_detector: Option<String>,
    pub fund_selector: Option<String>,
    /// Comma-separated filter names, e.g. `time_filter,liquidity_filter`.
    pub signal_filters: Option<String>,
    pub min_weight: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct StrategiesValidateResponse {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// Sanitized view of the process configuration surface; no secrets exist in this config, but the
/// field set is still curated rather than dumping `AppConfig` verbatim.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub strategy_template: String,
    pub min_weight: f64,
    pub scan_interval_seconds: u64,
    pub scan_concurrency: usize,
    pub min_time_to_close_seconds: i64,
    pub quote_ttl_seconds: u64,
    pub limit_up_ttl_seconds: u64,
    pub max_cache_entries: usize,
    pub trading_hours: TradingHoursDto,
}

#[derive(Debug, Serialize)]
pub struct TradingHoursDto {
    pub morning: [String; 2],
    pub afternoon: [String; 2],
}
