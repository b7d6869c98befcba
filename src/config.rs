//! Engine configuration: the typed shape of a pipeline configuration, its
//! validator against the plugin registries, named strategy templates, and
//! process-level bootstrap configuration.

use crate::registry::{PluginMetadata, PluginRegistry};
use crate::strategy::detector::{EventDetector, LimitUpDetector};
use crate::strategy::filters::{ConfidenceFilter, LiquidityFilter, RiskFilter, SignalFilter, TimeFilter};
use crate::strategy::selector::{BestLiquiditySelector, FundSelector, HighestWeightSelector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A pipeline configuration: which plugins to run and their parameters.
/// Resolved against the registries by [`validate`] before the engine starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub event_detector: String,
    pub fund_selector: String,
    pub signal_filters: Vec<String>,
    #[serde(default)]
    pub event_config: Map<String, Value>,
    #[serde(default)]
    pub fund_config: Map<String, Value>,
    #[serde(default)]
    pub filter_configs: HashMap<String, Map<String, Value>>,
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

fn default_min_weight() -> f64 {
    0.05
}

impl EngineConfig {
    /// The `balanced` strategy template.
    pub fn balanced() -> Self {
        Self {
            event_detector: "limit_up".to_string(),
            fund_selector: "highest_weight".to_string(),
            signal_filters: vec![
                "time_filter".to_string(),
                "liquidity_filter".to_string(),
                "confidence_filter".to_string(),
                "risk_filter".to_string(),
            ],
            event_config: Map::new(),
            fund_config: Map::new(),
            filter_configs: HashMap::new(),
            min_weight: 0.05,
        }
    }

    /// The `conservative` strategy template.
    pub fn conservative() -> Self {
        let mut cfg = Self::balanced();
        cfg.min_weight = 0.08;
        cfg.filter_configs.insert(
            "liquidity_filter".to_string(),
            [("min_daily_amount".to_string(), Value::from(8e7))]
                .into_iter()
                .collect(),
        );
        cfg
    }

    /// The `aggressive` strategy template.
    pub fn aggressive() -> Self {
        let mut cfg = Self::balanced();
        cfg.min_weight = 0.03;
        cfg.filter_configs.insert(
            "liquidity_filter".to_string(),
            [("min_daily_amount".to_string(), Value::from(3e7))]
                .into_iter()
                .collect(),
        );
        cfg
    }

    pub fn from_template(name: &str) -> Option<Self> {
        match name {
            "conservative" => Some(Self::conservative()),
            "balanced" => Some(Self::balanced()),
            "aggressive" => Some(Self::aggressive()),
            _ => None,
        }
    }
}

/// The registries a validator or engine builder needs to resolve plugin
/// names against. Borrowed, never owned by the config itself.
pub struct Registries<'a> {
    pub detectors: &'a PluginRegistry<dyn EventDetector>,
    pub selectors: &'a PluginRegistry<dyn FundSelector>,
    pub filters: &'a PluginRegistry<dyn SignalFilter>,
}

/// Validate `config` against `registries`, per spec §4.H.
///
/// Returns `(true, [])` iff every named plugin resolves, `signal_filters`
/// contains no duplicate, `signal_filters` is non-empty, and every
/// filter-specific numeric parameter is in range. Otherwise returns
/// `(false, errors)` naming every violation found (not just the first).
pub fn validate(config: &EngineConfig, registries: &Registries<'_>) -> (bool, Vec<String>) {
    let mut errors = Vec::new();

    if !registries.detectors.contains(&config.event_detector) {
        errors.push(format!(
            "unknown event_detector '{}'",
            config.event_detector
        ));
    }
    if !registries.selectors.contains(&config.fund_selector) {
        errors.push(format!("unknown fund_selector '{}'", config.fund_selector));
    }

    if config.signal_filters.is_empty() {
        errors.push("signal_filters must not be empty".to_string());
    }

    let mut seen = std::collections::HashSet::new();
    for name in &config.signal_filters {
        if !seen.insert(name.as_str()) {
            errors.push(format!("filter '{name}' appears more than once"));
        }
        if !registries.filters.contains(name) {
            errors.push(format!("unknown signal filter '{name}'"));
        }
    }

    if config.min_weight < 0.0 || config.min_weight > 1.0 {
        errors.push(format!(
            "min_weight must be in [0,1], got {}",
            config.min_weight
        ));
    }

    for (name, params) in &config.filter_configs {
        if let Some(Value::Number(n)) = params.get("min_time_to_close") {
            if n.as_f64().map(|v| v < 0.0).unwrap_or(true) {
                errors.push(format!("{name}.min_time_to_close must be >= 0"));
            }
        }
        if let Some(Value::Number(n)) = params.get("min_daily_amount") {
            if n.as_f64().map(|v| v < 0.0).unwrap_or(true) {
                errors.push(format!("{name}.min_daily_amount must be >= 0"));
            }
        }
        if let Some(Value::Number(n)) = params.get("min_confidence") {
            let v = n.as_f64().unwrap_or(-1.0);
            if !(0.0..=1.0).contains(&v) {
                errors.push(format!("{name}.min_confidence must be in [0,1]"));
            }
        }
    }

    (errors.is_empty(), errors)
}

/// Process-level bootstrap configuration, loaded from the environment
/// (and an optional `.env` file — see `main.rs`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub data_dir: std::path::PathBuf,
    pub mapping_path: std::path::PathBuf,
    pub watchlist_path: std::path::PathBuf,
    pub signals_db_path: std::path::PathBuf,
    pub log_level: String,
    pub strategy_template: String,
}

impl AppConfig {
    /// Build from environment variables, falling back to defaults that work
    /// for a local `cargo run` against `./data`.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ETF_ARB_DATA_DIR")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let port = std::env::var("ETF_ARB_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let data_dir: std::path::PathBuf = data_dir;
        Self {
            bind_addr: std::env::var("ETF_ARB_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            mapping_path: data_dir.join("stock_etf_mapping.json"),
            watchlist_path: data_dir.join("watchlist.json"),
            signals_db_path: data_dir.join("signals.db"),
            data_dir,
            log_level: std::env::var("ETF_ARB_LOG").unwrap_or_else(|_| "info".to_string()),
            strategy_template: std::env::var("ETF_ARB_STRATEGY")
                .unwrap_or_else(|_| "balanced".to_string()),
        }
    }
}

fn f64_param(config: &Value, key: &str, default: f64) -> f64 {
    config
        .get(key)
        .and_then(Value::as_f64)
        .unwrap_or(default)
}

fn i64_param(config: &Value, key: &str, default: i64) -> i64 {
    config.get(key).and_then(Value::as_i64).unwrap_or(default)
}

/// The six canonical plugins, registered under the names
/// `EngineConfig`'s templates reference. Each filter factory reads its
/// tunable from the config subtree `registry.build` is called with,
/// falling back to the plugin's own `Default`.
pub fn builtin_registries() -> (
    PluginRegistry<dyn EventDetector>,
    PluginRegistry<dyn FundSelector>,
    PluginRegistry<dyn SignalFilter>,
) {
    let detectors: PluginRegistry<dyn EventDetector> = PluginRegistry::new();
    detectors
        .register(
            "limit_up",
            Arc::new(|_cfg: &Value| Arc::new(LimitUpDetector::default()) as Arc<dyn EventDetector>),
            PluginMetadata {
                priority: 0,
                description: "A-share daily price-limit detector".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");

    let selectors: PluginRegistry<dyn FundSelector> = PluginRegistry::new();
    selectors
        .register(
            "highest_weight",
            Arc::new(|_cfg: &Value| Arc::new(HighestWeightSelector) as Arc<dyn FundSelector>),
            PluginMetadata {
                priority: 10,
                description: "selects the ETF with the largest disclosed weight".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");
    selectors
        .register(
            "best_liquidity",
            Arc::new(|_cfg: &Value| Arc::new(BestLiquiditySelector) as Arc<dyn FundSelector>),
            PluginMetadata {
                priority: 0,
                description: "selects the ETF with the largest daily turnover".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");

    let filters: PluginRegistry<dyn SignalFilter> = PluginRegistry::new();
    filters
        .register(
            "time_filter",
            Arc::new(|cfg: &Value| {
                Arc::new(TimeFilter {
                    min_time_to_close: i64_param(
                        cfg,
                        "min_time_to_close",
                        TimeFilter::default().min_time_to_close,
                    ),
                }) as Arc<dyn SignalFilter>
            }),
            PluginMetadata {
                priority: 30,
                description: "rejects signals too close to session close".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");
    filters
        .register(
            "liquidity_filter",
            Arc::new(|cfg: &Value| {
                Arc::new(LiquidityFilter {
                    min_daily_amount: f64_param(
                        cfg,
                        "min_daily_amount",
                        LiquidityFilter::default().min_daily_amount,
                    ),
                }) as Arc<dyn SignalFilter>
            }),
            PluginMetadata {
                priority: 20,
                description: "rejects ETFs too illiquid to transact".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");
    filters
        .register(
            "confidence_filter",
            Arc::new(|cfg: &Value| {
                Arc::new(ConfidenceFilter {
                    min_confidence: f64_param(
                        cfg,
                        "min_confidence",
                        ConfidenceFilter::default().min_confidence,
                    ),
                }) as Arc<dyn SignalFilter>
            }),
            PluginMetadata {
                priority: 10,
                description: "rejects drafts below the configured confidence floor".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");
    filters
        .register(
            "risk_filter",
            Arc::new(|_cfg: &Value| Arc::new(RiskFilter) as Arc<dyn SignalFilter>),
            PluginMetadata {
                priority: 0,
                description: "rejects high-risk drafts outright".to_string(),
                version: "0.1.0".to_string(),
            },
        )
        .expect("builtin registration is infallible");

    (detectors, selectors, filters)
}
