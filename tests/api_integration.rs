//! End-to-end tests against the full control-plane router, exercising it
//! the way the teacher exercises its own axum routers: build a real
//! `Router`, drive it with `tower::ServiceExt::oneshot`, inspect status and
//! body (`src/api/backtest_v2.rs`'s `test_list_runs_empty`/`test_get_run_*`
//! style), generalized here from a single sub-router to the whole app.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use etf_arb_engine::api::{self, AppState};
use etf_arb_engine::backtest::{BacktestDriver, BusinessDayCalendar, JobStore, StaticHistoricalSource};
use etf_arb_engine::cache::TtlCache;
use etf_arb_engine::clock::{Clock, SystemClock, TradingHours};
use etf_arb_engine::config::{builtin_registries, EngineConfig};
use etf_arb_engine::engine::{ArbitrageEngine, EngineSettings};
use etf_arb_engine::mapping::StockEtfMapping;
use etf_arb_engine::models::{Holding, Quote};
use etf_arb_engine::provider::StaticProvider;
use etf_arb_engine::repository::InMemorySignalRepository;
use etf_arb_engine::watchlist::Watchlist;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn quote(code: &str, price: f64, limit_up: bool) -> Quote {
    Quote {
        code: code.to_string(),
        name: "Moutai".to_string(),
        price,
        change_pct: if limit_up { 0.10 } else { 0.01 },
        volume: 1e6,
        amount: 1.98e9,
        timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 9, 35, 0).unwrap(),
        is_limit_up: limit_up,
        is_limit_down: false,
    }
}

/// Build a full `AppState` wired the way `main.rs::serve` wires it, but
/// against in-memory collaborators so the test never touches the filesystem.
async fn test_state(watchlist_codes: &[&str]) -> AppState {
    let mapping = Arc::new(StockEtfMapping::new());
    let provider = StaticProvider::new()
        .with_quote(quote("600519", 1800.0, true))
        .with_holdings(
            "510300",
            vec![Holding {
                stock_code: "600519".to_string(),
                etf_code: "510300".to_string(),
                weight: 0.085,
                rank: 1,
                as_of: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            }],
        );
    let provider = Arc::new(provider);
    mapping
        .rebuild(&[("510300".into(), "CSI 300 ETF".into())], provider.as_ref(), 10, 0.0)
        .await
        .unwrap();

    let watchlist = Arc::new(Watchlist::new());
    for code in watchlist_codes {
        watchlist
            .add(etf_arb_engine::models::WatchEntry {
                code: code.to_string(),
                name: "Moutai".to_string(),
                market: "SH".to_string(),
                notes: None,
            })
            .unwrap();
    }

    let repository: Arc<dyn etf_arb_engine::repository::SignalRepository> =
        Arc::new(InMemorySignalRepository::new());

    let (detectors, selectors, filters) = builtin_registries();
    let detectors = Arc::new(detectors);
    let selectors = Arc::new(selectors);
    let filters = Arc::new(filters);

    let engine_config = EngineConfig::balanced();
    let detector = detectors
        .build(&engine_config.event_detector, &Value::Object(engine_config.event_config.clone()))
        .unwrap();
    let selector = selectors
        .build(&engine_config.fund_selector, &Value::Object(engine_config.fund_config.clone()))
        .unwrap();
    let resolved_filters = engine_config
        .signal_filters
        .iter()
        .map(|name| filters.build(name, &Value::Null).unwrap())
        .collect();

    let engine_settings = EngineSettings {
        min_weight: engine_config.min_weight,
        ..EngineSettings::default()
    };

    let quotes: Arc<dyn etf_arb_engine::provider::QuoteProvider> = provider.clone();
    let engine = Arc::new(ArbitrageEngine::new(
        quotes,
        mapping,
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
        Vec::new(),
        detectors.clone(),
        selectors.clone(),
        filters.clone(),
        jobs,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    AppState {
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
        strategy_template: "balanced".to_string(),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = api::router(test_state(&[]).await);
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}

#[tokio::test]
async fn status_reflects_watchlist_and_mapping_state() {
    let app = api::router(test_state(&["600519"]).await);
    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["watchlist_count"], 1);
    assert_eq!(json["covered_etf_count"], 1);
    assert_eq!(json["monitor_running"], false);
}

#[tokio::test]
async fn related_etfs_404s_for_an_unmapped_stock() {
    let app = api::router(test_state(&[]).await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stocks/000001/related-etfs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["kind"], "not_found");
}

#[tokio::test]
async fn related_etfs_200s_for_a_mapped_stock() {
    let app = api::router(test_state(&[]).await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/stocks/600519/related-etfs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json[0]["etf_code"], "510300");
}

#[tokio::test]
async fn watchlist_add_list_and_remove_round_trip() {
    let app = api::router(test_state(&[]).await);

    let add = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/watchlist/add")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "code": "600519",
                        "name": "Moutai",
                        "market": "SH",
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(add.status(), StatusCode::CREATED);
    assert_eq!(body_json(add).await["status"], "success");

    let list = app
        .clone()
        .oneshot(Request::builder().uri("/api/watchlist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let entries = body_json(list).await;
    assert_eq!(entries.as_array().unwrap().len(), 1);

    let remove = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/watchlist/600519")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(remove.status(), StatusCode::NO_CONTENT);

    let remove_again = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/watchlist/600519")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(remove_again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn monitor_scan_emits_a_signal_for_a_limit_up_stock() {
    let app = api::router(test_state(&["600519"]).await);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/monitor/scan")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["signals_emitted"], 1);
    assert_eq!(json["quote_errors"], 0);
}

#[tokio::test]
async fn monitor_start_then_start_again_conflicts_then_stop_succeeds() {
    let app = api::router(test_state(&["600519"]).await);

    let start = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/monitor/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(start.status(), StatusCode::OK);

    let start_again = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/monitor/start")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(start_again.status(), StatusCode::CONFLICT);

    let stop = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/monitor/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stop.status(), StatusCode::OK);

    let stop_again = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/monitor/stop")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(stop_again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn backtest_start_then_poll_until_completed() {
    let app = api::router(test_state(&["600519"]).await);

    let start = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/backtest/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_vec(&serde_json::json!({
                        "start_date": "2026-01-05",
                        "end_date": "2026-01-06",
                        "strategy_template": "balanced",
                    }))
                    .unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(start.status(), StatusCode::ACCEPTED);
    let job_id = body_json(start).await["job_id"].as_str().unwrap().to_string();

    let mut completed = false;
    for _ in 0..50 {
        let get = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/backtest/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get.status(), StatusCode::OK);
        let json = body_json(get).await;
        if json["status"] == "completed" {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(completed, "backtest job never reached completed status");

    let result = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/backtest/{job_id}/result"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(result.status(), StatusCode::OK);
}

#[tokio::test]
async fn strategies_validate_rejects_an_unknown_template() {
    let app = api::router(test_state(&[]).await);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/strategies/validate?template=not_a_real_template")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ok"], false);
}
