//! `EventDetector`: the first pipeline stage. `detect` turns a quote into a
//! [`MarketEvent`], `is_valid` rejects events that are structurally
//! implausible for their board.

use crate::models::{MarketEvent, Quote};
use chrono::Timelike;

/// A market-event detector, selected by name through the plugin registry.
///
/// Non-async and object-safe: detection is pure computation on a quote
/// already fetched by the engine.
pub trait EventDetector: Send + Sync {
    fn detect(&self, quote: &Quote) -> Option<MarketEvent>;

    /// Reject events that are implausible for the security's board (e.g. a
    /// claimed limit-up whose `change_pct` is below the board's minimum).
    fn is_valid(&self, event: &MarketEvent) -> bool;
}

/// Daily price-limit fraction for a security's board, inferred from its
/// code prefix.
fn daily_limit_for_code(code: &str) -> f64 {
    let prefix3 = code.get(0..3).unwrap_or("");
    let prefix2 = code.get(0..2).unwrap_or("");
    match prefix3 {
        "600" | "601" | "603" | "605" => 0.10,
        "688" | "300" | "301" => 0.20,
        "920" => 0.30,
        _ => match prefix2 {
            "00" => 0.10, // 000/001
            "43" | "83" | "87" => 0.30,
            _ => 0.10,
        },
    }
}

const EPSILON_PRICE: f64 = 0.001;
const EPSILON_PCT: f64 = 0.001;

/// Canonical A-share limit-up detector: fires when a quote's price and
/// reported change percentage both reach the board's daily limit.
///
/// `seal_amount` / `open_count` / `is_first_limit` are not derivable from a
/// bare [`Quote`] — the provider boundary is expected to report them when
/// available; this detector fills in neutral defaults (`seal_amount` from
/// `amount`, `open_count = 0`, `is_first_limit = true`) when it has nothing
/// better, leaving richer detection to a provider-specific adapter.
#[derive(Debug, Default, Clone, Copy)]
pub struct LimitUpDetector;

impl EventDetector for LimitUpDetector {
    fn detect(&self, quote: &Quote) -> Option<MarketEvent> {
        if !quote.is_limit_up {
            return None;
        }

        let limit = daily_limit_for_code(&quote.code);
        let prev_close = quote.price / (1.0 + quote.change_pct);
        let ceiling = (prev_close * (1.0 + limit) * 100.0).round() / 100.0;

        let price_at_ceiling = quote.price >= ceiling - EPSILON_PRICE;
        let pct_at_limit = quote.change_pct >= limit - EPSILON_PCT;
        if !price_at_ceiling || !pct_at_limit {
            return None;
        }

        Some(MarketEvent::LimitUp {
            stock_code: quote.code.clone(),
            stock_name: quote.name.clone(),
            price: quote.price,
            change_pct: quote.change_pct,
            limit_time: quote.timestamp,
            seal_amount: quote.amount,
            open_count: 0,
            is_first_limit: true,
            timestamp: quote.timestamp,
        })
    }

    fn is_valid(&self, event: &MarketEvent) -> bool {
        match event {
            MarketEvent::LimitUp {
                stock_code,
                change_pct,
                ..
            } => {
                let limit = daily_limit_for_code(stock_code);
                *change_pct >= limit - EPSILON_PCT - 0.02
            }
            _ => false,
        }
    }
}

/// Hour-of-day the first limit-up print was seen, used by risk scoring.
pub fn first_limit_hour(event: &MarketEvent) -> u32 {
    match event {
        MarketEvent::LimitUp { limit_time, .. } => limit_time.hour(),
        other => other.timestamp().hour(),
    }
}
