//! Endpoint handlers: same shape throughout (`Query`/`Path` extractors,
//! `State<AppState>`, `Result<Json<T>, ApiError>` returns) so every route
//! fails through the one structured [`ApiError`] envelope rather than a
//! bare `StatusCode`.

use super::dto::*;
use super::error::ApiError;
use super::AppState;
use crate::backtest::{BacktestConfig, BacktestJob, JobQuery};
use crate::clock::Clock;
use crate::config::{validate, EngineConfig, Registries};
use crate::models::{BacktestStatus, TradingSignal, WatchEntry};
use crate::repository::SignalQuery;
use crate::watchlist::AddOutcome;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let now = state.clock.now();
    Json(StatusResponse {
        monitor_running: state.engine.is_monitor_running(),
        is_trading_time: state.trading_hours.is_trading_time(now),
        watchlist_count: state.watchlist.codes().len(),
        covered_etf_count: state.engine.mapping().covered_etf_count(),
        today_signals: state.engine.today_signal_count(),
        limitup_count: state.engine.limitup_count(),
        last_scan_time: state.engine.last_scan_time(),
    })
}

pub async fn stocks(State(state): State<AppState>) -> Json<Vec<crate::models::Quote>> {
    let codes = state.watchlist.codes();
    Json(state.engine.quotes_for(&codes).await)
}

pub async fn related_etfs(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Vec<crate::models::CandidateETF>>, ApiError> {
    if !state.engine.mapping().has(&code) {
        return Err(ApiError::not_found(format!("unknown stock code '{code}'")));
    }
    Ok(Json(state.engine.mapping().get_etfs_for(&code)))
}

/// Today's limit-up list, single-flighted through its own cache so concurrent pollers don't each trigger a
/// fresh watchlist-wide quote sweep.
pub async fn limit_up(State(state): State<AppState>) -> Result<Json<Vec<crate::models::Quote>>, ApiError> {
    let engine = state.engine.clone();
    let watchlist = state.watchlist.clone();
    let (quotes, _filled) = state
        .limit_up_cache
        .get_or_fill("today".to_string(), state.limit_up_ttl, move || {
            let engine = engine.clone();
            let watchlist = watchlist.clone();
            async move {
                let codes = watchlist.codes();
                let all = engine.quotes_for(&codes).await;
                Ok::<_, anyhow::Error>(all.into_iter().filter(|q| q.is_limit_up).collect::<Vec<_>>())
            }
        })
        .await
        .map_err(|e| ApiError::dependency(e.to_string()))?;
    Ok(Json(quotes))
}

pub async fn list_signals(
    State(state): State<AppState>,
    Query(query): Query<SignalListQuery>,
) -> Result<Json<Vec<TradingSignal>>, ApiError> {
    if let (Some(start), Some(end)) = (query.start, query.end) {
        if start > end {
            return Err(ApiError::validation("start must not be after end"));
        }
    }

    let (start, end) = if query.today_only {
        let now = state.clock.now();
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        (Some(query.start.unwrap_or(midnight)), query.end)
    } else {
        (query.start, query.end)
    };

    let signals = state
        .repository
        .list(&SignalQuery {
            start,
            end,
            stock_code: query.stock_code,
            etf_code: query.etf_code,
            event_type: query.event_type,
            limit: query.limit,
            offset: 0,
        })
        .map_err(ApiError::from)?;
    Ok(Json(signals))
}

pub async fn monitor_scan(State(state): State<AppState>) -> Result<Json<ScanResponse>, ApiError> {
    let codes = state.watchlist.codes();
    let result = state.engine.scan(&codes, state.clock.as_ref()).await;

    if !codes.is_empty() && result.quote_errors == codes.len() {
        return Err(ApiError::dependency("quote provider unavailable"));
    }

    Ok(Json(ScanResponse {
        signals_emitted: result.signals_emitted.len(),
        signals_rejected: result.signals_rejected_with_reasons.len(),
        quote_errors: result.quote_errors,
        elapsed_ms: result.elapsed_ms,
    }))
}

pub async fn monitor_start(State(state): State<AppState>) -> Result<Json<MonitorStatusResponse>, ApiError> {
    let mut guard = state.monitor_cancel.lock();
    if guard.is_some() {
        return Err(ApiError::conflict("monitor already running"));
    }
    let token = CancellationToken::new();
    *guard = Some(token.clone());
    drop(guard);

    let engine = state.engine.clone();
    let watchlist = state.watchlist.clone();
    let clock = state.clock.clone();
    tokio::spawn(async move {
        engine.run_monitor_loop(move || watchlist.codes(), clock, token).await;
    });

    Ok(Json(MonitorStatusResponse { status: "running" }))
}

pub async fn monitor_stop(State(state): State<AppState>) -> Result<Json<MonitorStatusResponse>, ApiError> {
    let mut guard = state.monitor_cancel.lock();
    match guard.take() {
        Some(token) => {
            token.cancel();
            Ok(Json(MonitorStatusResponse { status: "stopped" }))
        }
        None => Err(ApiError::conflict("monitor not running")),
    }
}

/// Resolve a submitted [`BacktestStartRequest`] into a validated
/// [`EngineConfig`]: an explicit `engine_config` wins over `strategy_template`,
/// which itself falls back to `balanced`.
fn resolve_engine_config(request: &BacktestStartRequest) -> Result<EngineConfig, ApiError> {
    if let Some(config) = &request.engine_config {
        return Ok(config.clone());
    }
    let template = request.strategy_template.as_deref().unwrap_or("balanced");
    EngineConfig::from_template(template)
        .ok_or_else(|| ApiError::validation(format!("unknown strategy_template '{template}'")))
}

pub async fn backtest_start(
    State(state): State<AppState>,
    Json(request): Json<BacktestStartRequest>,
) -> Result<(StatusCode, Json<BacktestStartResponse>), ApiError> {
    let engine_config = resolve_engine_config(&request)?;

    let registries = Registries {
        detectors: &state.detectors,
        selectors: &state.selectors,
        filters: &state.filters,
    };
    let (ok, errors) = validate(&engine_config, &registries);
    if !ok {
        return Err(ApiError::validation("invalid engine_config").with_details(errors.join("; ")));
    }

    let config = BacktestConfig {
        start_date: request.start_date,
        end_date: request.end_date,
        granularity: request.granularity,
        engine_config,
        securities: request.securities,
        interpolation: request.interpolation,
    };

    let job_id = state
        .backtest
        .submit(config, state.watchlist.codes())
        .map_err(|e| ApiError::validation(e.to_string()))?;

    Ok((StatusCode::ACCEPTED, Json(BacktestStartResponse { job_id })))
}

pub async fn backtest_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BacktestJob>, ApiError> {
    state
        .backtest
        .jobs()
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no backtest job '{id}'")))
}

pub async fn backtest_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::BacktestResult>, ApiError> {
    let job = state
        .backtest
        .jobs()
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("no backtest job '{id}'")))?;
    match job.status {
        BacktestStatus::Completed => Ok(Json(job.result.expect("completed job carries a result"))),
        _ => Err(ApiError::conflict(format!("job '{id}' is not completed (status: {:?})", job.status))),
    }
}

/// Quote-and-comma-escape one CSV field.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn signals_to_csv(signals: &[TradingSignal]) -> String {
    let mut out = String::from("\u{feff}");
    out.push_str("timestamp,stock_code,stock_name,stock_price,etf_code,etf_name,etf_weight,confidence,risk_level,reason\n");
    for s in signals {
        out.push_str(&csv_quote(&s.timestamp.to_rfc3339()));
        out.push(',');
        out.push_str(&csv_quote(&s.stock_code));
        out.push(',');
        out.push_str(&csv_quote(&s.stock_name));
        out.push(',');
        out.push_str(&csv_quote(&s.stock_price.to_string()));
        out.push(',');
        out.push_str(&csv_quote(&s.etf_code));
        out.push(',');
        out.push_str(&csv_quote(&s.etf_name));
        out.push(',');
        out.push_str(&csv_quote(&s.weight.to_string()));
        out.push(',');
        out.push_str(&csv_quote(&s.confidence_score.to_string()));
        out.push(',');
        out.push_str(&csv_quote(s.risk_level.as_str()));
        out.push(',');
        out.push_str(&csv_quote(&s.reason));
        out.push('\n');
    }
    out
}

pub async fn backtest_signals_csv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let job = state
        .backtest
        .jobs()
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("no backtest job '{id}'")))?;
    let signals = job.result.map(|r| r.signals).unwrap_or_default();
    let csv = signals_to_csv(&signals);
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        csv,
    )
        .into_response())
}

pub async fn backtest_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Json<Vec<BacktestJob>> {
    Json(state.backtest.jobs().list(&JobQuery {
        status: query.status,
        limit: query.limit,
        offset: query.offset,
    }))
}

pub async fn backtest_cancel(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if state.backtest.jobs().cancel(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no backtest job '{id}'")))
    }
}

pub async fn watchlist_list(State(state): State<AppState>) -> Json<Vec<WatchEntry>> {
    Json(state.watchlist.list())
}

pub async fn watchlist_add(
    State(state): State<AppState>,
    Json(request): Json<WatchlistAddRequest>,
) -> Result<(StatusCode, Json<WatchlistAddResponse>), ApiError> {
    let entry = WatchEntry {
        code: request.code,
        name: request.name,
        market: request.market,
        notes: request.notes,
    };
    match state.watchlist.add(entry).map_err(|e| ApiError::validation(e.to_string()))? {
        AddOutcome::Added => Ok((StatusCode::CREATED, Json(WatchlistAddResponse { status: "success" }))),
        AddOutcome::AlreadyExists => Ok((StatusCode::OK, Json(WatchlistAddResponse { status: "already_exists" }))),
    }
}

pub async fn watchlist_remove(State(state): State<AppState>, Path(code): Path<String>) -> Result<StatusCode, ApiError> {
    if state.watchlist.remove(&code).map_err(ApiError::from)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("'{code}' is not on the watchlist")))
    }
}

pub async fn plugins(State(state): State<AppState>) -> Json<PluginsResponse> {
    let mut evaluators: Vec<String> = state.detectors.list().into_iter().map(|(n, _)| n).collect();
    evaluators.extend(state.selectors.list().into_iter().map(|(n, _)| n));
    evaluators.extend(state.filters.list().into_iter().map(|(n, _)| n));
    Json(PluginsResponse {
        evaluators,
        senders: Vec::new(),
        sources: Vec::new(),
    })
}

fn descriptors<T: ?Sized>(registry: &crate::registry::PluginRegistry<T>) -> Vec<PluginDescriptor> {
    registry
        .list()
        .into_iter()
        .map(|(name, meta)| PluginDescriptor {
            name,
            priority: meta.priority,
            description: meta.description,
            version: meta.version,
        })
        .collect()
}

pub async fn strategies(State(state): State<AppState>) -> Json<StrategiesResponse> {
    Json(StrategiesResponse {
        event_detectors: descriptors(&state.detectors),
        fund_selectors: descriptors(&state.selectors),
        signal_filters: descriptors(&state.filters),
    })
}

pub async fn strategies_validate(
    State(state): State<AppState>,
    Query(query): Query<StrategiesValidateQuery>,
) -> Json<StrategiesValidateResponse> {
    let config = if let Some(template) = &query.template {
        match EngineConfig::from_template(template) {
            Some(config) => config,
            None => {
                return Json(StrategiesValidateResponse {
                    ok: false,
                    errors: vec![format!("unknown strategy template '{template}'")],
                })
            }
        }
    } else {
        let mut config = EngineConfig::balanced();
        if let Some(name) = &query.event_detector {
            config.event_detector = name.clone();
        }
        if let Some(name) = &query.fund_selector {
            config.fund_selector = name.clone();
        }
        if let Some(names) = &query.signal_filters {
            config.signal_filters = names.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Some(min_weight) = query.min_weight {
            config.min_weight = min_weight;
        }
        config
    };

    let registries = Registries {
        detectors: &state.detectors,
        selectors: &state.selectors,
        filters: &state.filters,
    };
    let (ok, errors) = validate(&config, &registries);
    Json(StrategiesValidateResponse { ok, errors })
}

pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let hours = &state.trading_hours;
    let settings = &state.engine_settings;
    Json(ConfigResponse {
        strategy_template: state.strategy_template.clone(),
        min_weight: settings.min_weight,
        scan_interval_seconds: settings.scan_interval.as_secs(),
        scan_concurrency: settings.scan_concurrency,
        min_time_to_close_seconds: 1800,
        quote_ttl_seconds: settings.quote_ttl.as_secs(),
        limit_up_ttl_seconds: state.limit_up_ttl.as_secs(),
        max_cache_entries: 10_000,
        trading_hours: TradingHoursDto {
            morning: [hours.morning_open.to_string(), hours.morning_close.to_string()],
            afternoon: [hours.afternoon_open.to_string(), hours.afternoon_close.to_string()],
        },
    })
}
