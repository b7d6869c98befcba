//! Draft signal scoring: the confidence/risk formulas applied
//! before the filter chain runs. Pure functions over already-fetched data —
//! no provider or clock dependency beyond the `seconds_to_close` the caller
//! supplies.

use crate::models::{CandidateETF, ConfidenceBreakdown, ConfidenceLevel, DraftSignal, MarketEvent, RiskLevel};
use crate::strategy::detector::first_limit_hour;

/// Tunable knobs behind `signal_evaluation.*`. Only the fields the
/// canonical §4.D formula actually consumes are wired into [`score`]; the
/// rest of the configuration surface (`confidence_low_weight`,
/// `confidence_high_rank`, `confidence_low_rank`) is accepted for forward
/// compatibility with alternate scoring models observed in the source but
/// is not read by this implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringConfig {
    pub weight_order: f64,
    pub weight_weight: f64,
    pub weight_liquidity: f64,
    pub weight_time: f64,
    /// Normalization denominator for `S_weight` (default 0.10).
    pub confidence_high_weight: f64,
    pub cutoff_high: f64,
    pub cutoff_medium: f64,
    pub risk_high_time_seconds: i64,
    pub risk_low_time_seconds: i64,
    pub risk_top10_ratio_high: f64,
    pub risk_morning_hour: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_order: 0.30,
            weight_weight: 0.30,
            weight_liquidity: 0.20,
            weight_time: 0.20,
            confidence_high_weight: 0.10,
            cutoff_high: 0.70,
            cutoff_medium: 0.40,
            risk_high_time_seconds: 600,
            risk_low_time_seconds: 3600,
            risk_top10_ratio_high: 0.70,
            risk_morning_hour: 10,
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Build the draft signal for an accepted `(event, fund)` pair. `seconds_to_close`
/// is supplied by the caller (engine or backtest driver), computed from the
/// clock in effect, so this function stays pure and clock-free.
pub fn draft_signal(
    event: &MarketEvent,
    fund: &CandidateETF,
    selection_reason: &str,
    seconds_to_close: i64,
    config: &ScoringConfig,
) -> DraftSignal {
    let (seal_amount, open_count) = match event {
        MarketEvent::LimitUp {
            seal_amount,
            open_count,
            ..
        } => (*seal_amount, *open_count),
        _ => (0.0, 0),
    };

    let s_weight = clamp01(fund.weight / config.confidence_high_weight);
    let s_order = clamp01(seal_amount / 1e9);
    let s_liquidity = clamp01(fund.daily_amount / 5e8);
    let s_time = clamp01(seconds_to_close as f64 / (2.0 * 3600.0));

    let score = config.weight_order * s_order
        + config.weight_weight * s_weight
        + config.weight_liquidity * s_liquidity
        + config.weight_time * s_time;

    let confidence_level = if score >= config.cutoff_high {
        ConfidenceLevel::High
    } else if score >= config.cutoff_medium {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    };

    // top10_ratio is not modeled on CandidateETF in this corpus; treated as
    // always within bounds, so only time/open_count drive risk here.
    let risk_level = if seconds_to_close < config.risk_high_time_seconds || open_count > 2 {
        RiskLevel::High
    } else if seconds_to_close > config.risk_low_time_seconds
        && first_limit_hour(event) < config.risk_morning_hour
    {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    };

    let reason = format!(
        "{selection_reason}; weight {:.2}%; confidence {:.2} ({})",
        fund.weight * 100.0,
        score,
        confidence_level.as_str()
    );

    DraftSignal {
        stock_code: event.stock_code().to_string(),
        stock_name: match event {
            MarketEvent::LimitUp { stock_name, .. } => stock_name.clone(),
            _ => String::new(),
        },
        etf_code: fund.etf_code.clone(),
        etf_name: fund.etf_name.clone(),
        weight: fund.weight,
        event_type: event.event_type().to_string(),
        confidence_level,
        confidence_score: score,
        risk_level,
        reason,
        breakdown: ConfidenceBreakdown {
            order: s_order,
            weight: s_weight,
            liquidity: s_liquidity,
            time: s_time,
        },
        seconds_to_close,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event() -> MarketEvent {
        MarketEvent::LimitUp {
            stock_code: "600519".into(),
            stock_name: "Moutai".into(),
            price: 1980.0,
            change_pct: 0.0999,
            limit_time: Utc::now(),
            seal_amount: 1.98e9,
            open_count: 0,
            is_first_limit: true,
            timestamp: Utc::now(),
        }
    }

    fn fund() -> CandidateETF {
        CandidateETF {
            etf_code: "510300".into(),
            etf_name: "CSI 300 ETF".into(),
            weight: 0.085,
            rank: 5,
            daily_amount: 8e8,
            quote: None,
        }
    }

    #[test]
    fn scenario_one_scores_high_confidence_and_medium_risk() {
        // spec scenario 1: 14:05 -> seconds_to_close = 3300.
        let draft = draft_signal(&event(), &fund(), "selected 510300", 3300, &ScoringConfig::default());
        assert_eq!(draft.confidence_level, ConfidenceLevel::High);
        assert_eq!(draft.risk_level, RiskLevel::Medium);
        assert!(draft.reason.contains("weight 8.50%"));
    }

    #[test]
    fn very_short_time_to_close_is_high_risk() {
        let draft = draft_signal(&event(), &fund(), "selected 510300", 300, &ScoringConfig::default());
        assert_eq!(draft.risk_level, RiskLevel::High);
    }

    #[test]
    fn low_weight_and_liquidity_yield_low_confidence() {
        let thin_fund = CandidateETF {
            weight: 0.01,
            daily_amount: 1e6,
            ..fund()
        };
        let thin_event = MarketEvent::LimitUp {
            stock_code: "600519".into(),
            stock_name: "Moutai".into(),
            price: 1980.0,
            change_pct: 0.0999,
            limit_time: Utc::now(),
            seal_amount: 1e4,
            open_count: 0,
            is_first_limit: true,
            timestamp: Utc::now(),
        };
        let draft = draft_signal(&thin_event, &thin_fund, "selected", 100, &ScoringConfig::default());
        assert_eq!(draft.confidence_level, ConfidenceLevel::Low);
    }
}
