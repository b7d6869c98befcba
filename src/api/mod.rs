//! HTTP Control Plane: a thin axum router over the engine,
//! watchlist, signal repository, and backtest driver. `AppState` follows the
//! teacher's `main.rs` pattern — one `Clone`-derived struct of `Arc`-wrapped
//! collaborators, shared via `.with_state(...)`, no other process-wide
//! singleton.

pub mod dto;
pub mod error;
pub mod routes;

use crate::backtest::BacktestDriver;
use crate::cache::TtlCache;
use crate::clock::{Clock, TradingHours};
use crate::engine::{ArbitrageEngine, EngineSettings};
use crate::models::Quote;
use crate::registry::PluginRegistry;
use crate::repository::SignalRepository;
use crate::strategy::{EventDetector, FundSelector, SignalFilter};
use crate::watchlist::Watchlist;
use axum::routing::{delete, get, post};
use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Shared, `Arc`-wrapped handles every handler reads from: the single place
/// daily counters and the monitor cancellation handle live, so start/stop
/// semantics stay consistent across every request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ArbitrageEngine>,
    pub watchlist: Arc<Watchlist>,
    pub repository: Arc<dyn SignalRepository>,
    pub backtest: Arc<BacktestDriver>,
    pub detectors: Arc<PluginRegistry<dyn EventDetector>>,
    pub selectors: Arc<PluginRegistry<dyn FundSelector>>,
    pub filters: Arc<PluginRegistry<dyn SignalFilter>>,
    pub limit_up_cache: Arc<TtlCache<String, Vec<Quote>>>,
    pub limit_up_ttl: Duration,
    /// `Some` while the monitor loop is running; `monitor_start`/`monitor_stop`
    /// use this to detect the already-running/not-running 409 cases without
    /// racing the engine's own `monitor_running` flag, which only flips after
    /// the spawned loop observes cancellation.
    pub monitor_cancel: Arc<Mutex<Option<CancellationToken>>>,
    pub clock: Arc<dyn Clock>,
    pub trading_hours: TradingHours,
    pub engine_settings: EngineSettings,
    pub strategy_template: String,
}

/// Build the full router: routes plus CORS and request-logging middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/stocks", get(routes::stocks))
        .route("/api/stocks/:code/related-etfs", get(routes::related_etfs))
        .route("/api/limit-up", get(routes::limit_up))
        .route("/api/signals", get(routes::list_signals))
        .route("/api/monitor/scan", post(routes::monitor_scan))
        .route("/api/monitor/start", post(routes::monitor_start))
        .route("/api/monitor/stop", post(routes::monitor_stop))
        .route("/api/backtest/start", post(routes::backtest_start))
        .route("/api/backtest/jobs", get(routes::backtest_jobs))
        .route("/api/backtest/:id", get(routes::backtest_get).delete(routes::backtest_cancel))
        .route("/api/backtest/:id/result", get(routes::backtest_result))
        .route("/api/backtest/:id/signals", get(routes::backtest_signals_csv))
        .route("/api/watchlist", get(routes::watchlist_list))
        .route("/api/watchlist/add", post(routes::watchlist_add))
        .route("/api/watchlist/:code", delete(routes::watchlist_remove))
        .route("/api/plugins", get(routes::plugins))
        .route("/api/strategies", get(routes::strategies))
        .route("/api/strategies/validate", get(routes::strategies_validate))
        .route("/api/config", get(routes::config))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::logging::request_logging_simple))
        .with_state(state)
}
