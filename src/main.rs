//! Binary entry point: `serve` runs the HTTP control plane, `init` rebuilds
//! the stock↔ETF mapping store and exits. CLI shape grounded in the
//! teacher's `bin/route_quality_monitor.rs` (`clap::Parser`, `#[tokio::main]`).

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use etf_arb_engine::api::{self, AppState};
use etf_arb_engine::backtest::{BacktestDriver, BusinessDayCalendar, JobStore, StaticHistoricalSource};
use etf_arb_engine::cache::TtlCache;
use etf_arb_engine::clock::{Clock, SystemClock, TradingHours};
use etf_arb_engine::config::{builtin_registries, AppConfig, EngineConfig};
use etf_arb_engine::engine::{ArbitrageEngine, EngineSettings};
use etf_arb_engine::mapping::StockEtfMapping;
use etf_arb_engine::provider::{QuoteProvider, StaticProvider};
use etf_arb_engine::repository::SqliteSignalRepository;
use etf_arb_engine::watchlist::Watchlist;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "etf-arb-engine")]
#[command(about = "ETF arbitrage opportunity engine")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control plane (default).
    Serve,
    /// Rebuild the stock↔ETF mapping store against the configured ETF
    /// universe and exit, without starting the server.
    Init,
}

/// The ETF universe a real deployment would rebuild the mapping against.
/// No discovery mechanism is in scope; this is the seam a real deployment
/// fills in with its own fund list.
fn etf_universe() -> Vec<(String, String)> {
    Vec::new()
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("etf_arb_engine={log_level},tower_http=info").into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    let args = Args::parse();
    let config = AppConfig::from_env();
    init_tracing(&config.log_level);

    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;

    let mapping = Arc::new(StockEtfMapping::new());
    // The production market-data adapter is out of scope; `StaticProvider`
    // stands in empty, implementing both seams, until a real one is wired in.
    let provider = Arc::new(StaticProvider::new());

    match args.command.unwrap_or(Command::Serve) {
        Command::Init => {
            info!("rebuilding stock/ETF mapping store");
            mapping
                .rebuild(&etf_universe(), provider.as_ref(), 10, 0.0)
                .await
                .context("rebuilding mapping store")?;
            mapping.save(&config.mapping_path).context("saving mapping store")?;
            info!(path = %config.mapping_path.display(), "mapping store saved");
            Ok(())
        }
        Command::Serve => serve(config, mapping, provider).await,
    }
}

async fn serve(config: AppConfig, mapping: Arc<StockEtfMapping>, provider: Arc<StaticProvider>) -> Result<()> {
    info!("ETF arbitrage engine starting");

    if config.mapping_path.exists() {
        mapping.load(&config.mapping_path).context("loading mapping store")?;
    } else {
        mapping
            .rebuild(&etf_universe(), provider.as_ref(), 10, 0.0)
            .await
            .context("building initial mapping store")?;
    }

    let watchlist = Arc::new(
        Watchlist::load_or_new(&config.watchlist_path).context("loading watchlist")?,
    );
    let repository: Arc<dyn etf_arb_engine::repository::SignalRepository> =
        Arc::new(SqliteSignalRepository::open(&config.signals_db_path).context("opening signals store")?);

    let (detectors, selectors, filters) = builtin_registries();
    let detectors = Arc::new(detectors);
    let selectors = Arc::new(selectors);
    let filters = Arc::new(filters);

    let engine_config = EngineConfig::from_template(&config.strategy_template)
        .unwrap_or_else(EngineConfig::balanced);

    let detector = detectors
        .build(&engine_config.event_detector, &serde_json::Value::Object(engine_config.event_config.clone()))
        .context("building configured event detector")?;
    let selector = selectors
        .build(&engine_config.fund_selector, &serde_json::Value::Object(engine_config.fund_config.clone()))
        .context("building configured fund selector")?;
    let mut resolved_filters = Vec::with_capacity(engine_config.signal_filters.len());
    for name in &engine_config.signal_filters {
        let cfg = engine_config
            .filter_configs
            .get(name)
            .cloned()
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Null);
        resolved_filters.push(filters.build(name, &cfg).context("building configured signal filter")?);
    }

    let engine_settings = EngineSettings {
        min_weight: engine_config.min_weight,
        ..EngineSettings::default()
    };

    let quotes: Arc<dyn QuoteProvider> = provider.clone();
    let engine = Arc::new(ArbitrageEngine::new(
        quotes,
        mapping.clone(),
        repository.clone(),
        detector,
        selector,
        resolved_filters,
        engine_settings.clone(),
    ));

    let jobs = Arc::new(JobStore::new());
    let historical_source = Arc::new(StaticHistoricalSource::new());
    let backtest = Arc::new(BacktestDriver::new(
        historical_source.clone(),
        historical_source,
        Arc::new(BusinessDayCalendar),
        etf_universe(),
        detectors.clone(),
        selectors.clone(),
        filters.clone(),
        jobs,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState {
        engine,
        watchlist,
        repository,
        backtest,
        detectors,
        selectors,
        filters,
        limit_up_cache: Arc::new(TtlCache::new(8)),
        limit_up_ttl: Duration::from_secs(30),
        monitor_cancel: Arc::new(Mutex::new(None)),
        clock,
        trading_hours: TradingHours::default(),
        engine_settings,
        strategy_template: config.strategy_template.clone(),
    };

    let app: Router = api::router(state);
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr).await.context("binding listener")?;
    info!(%addr, "control plane listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
