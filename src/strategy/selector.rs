//! `FundSelector`: the second pipeline stage. Picks one ETF out of the
//! stock's eligible candidates (already filtered by `weight >= min_weight`).

use crate::models::{CandidateETF, MarketEvent};

pub trait FundSelector: Send + Sync {
    /// Choose one candidate, or `None` if `eligible` is empty. Must never
    /// fail on empty input.
    fn select(&self, eligible: &[CandidateETF], event: &MarketEvent) -> Option<CandidateETF>;

    /// Human-readable justification for `fund`, folded into
    /// `TradingSignal.reason`.
    fn get_selection_reason(&self, fund: &CandidateETF) -> String;
}

/// Selects the ETF with maximal `weight`; ties broken by lower `rank`, then
/// by `etf_code` lexicographic order.
#[derive(Debug, Default, Clone, Copy)]
pub struct HighestWeightSelector;

impl FundSelector for HighestWeightSelector {
    fn select(&self, eligible: &[CandidateETF], _event: &MarketEvent) -> Option<CandidateETF> {
        eligible
            .iter()
            .min_by(|a, b| {
                b.weight
                    .partial_cmp(&a.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.rank.cmp(&b.rank))
                    .then_with(|| a.etf_code.cmp(&b.etf_code))
            })
            .cloned()
    }

    fn get_selection_reason(&self, fund: &CandidateETF) -> String {
        format!(
            "selected {} ({}) for weight {:.2}%",
            fund.etf_code,
            fund.etf_name,
            fund.weight * 100.0
        )
    }
}

/// Selects the eligible ETF with maximal `daily_amount`, i.e. the most
/// liquid vehicle regardless of holding weight.
#[derive(Debug, Default, Clone, Copy)]
pub struct BestLiquiditySelector;

impl FundSelector for BestLiquiditySelector {
    fn select(&self, eligible: &[CandidateETF], _event: &MarketEvent) -> Option<CandidateETF> {
        eligible
            .iter()
            .max_by(|a, b| {
                a.daily_amount
                    .partial_cmp(&b.daily_amount)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    fn get_selection_reason(&self, fund: &CandidateETF) -> String {
        format!(
            "selected {} ({}) for liquidity {:.0}",
            fund.etf_code, fund.etf_name, fund.daily_amount
        )
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
            seal_amount: 1.2e9,
            open_count: 0,
            is_first_limit: true,
            timestamp: Utc::now(),
        }
    }

    fn etf(code: &str, weight: f64, rank: u32, daily_amount: f64) -> CandidateETF {
        CandidateETF {
            etf_code: code.to_string(),
            etf_name: format!("ETF {code}"),
            weight,
            rank,
            daily_amount,
            quote: None,
        }
    }

    #[test]
    fn highest_weight_selects_max_weight() {
        let eligible = vec![etf("510300", 0.085, 5, 8e8), etf("510500", 0.02, 1, 9e8)];
        let selected = HighestWeightSelector.select(&eligible, &event()).unwrap();
        assert_eq!(selected.etf_code, "510300");
    }

    #[test]
    fn tie_break_prefers_lower_rank_then_lexicographic_code() {
        // spec scenario 4: equal weight 0.08; A rank=2, B rank=4 -> A wins.
        let eligible = vec![etf("B", 0.08, 4, 1.0), etf("A", 0.08, 2, 1.0)];
        let selected = HighestWeightSelector.select(&eligible, &event()).unwrap();
        assert_eq!(selected.etf_code, "A");
    }

    #[test]
    fn tie_break_falls_back_to_etf_code_when_rank_also_ties() {
        let eligible = vec![etf("B", 0.08, 2, 1.0), etf("A", 0.08, 2, 1.0)];
        let selected = HighestWeightSelector.select(&eligible, &event()).unwrap();
        assert_eq!(selected.etf_code, "A");
    }

    #[test]
    fn empty_eligible_list_yields_none_not_error() {
        assert!(HighestWeightSelector.select(&[], &event()).is_none());
        assert!(BestLiquiditySelector.select(&[], &event()).is_none());
    }

    #[test]
    fn best_liquidity_selects_max_daily_amount() {
        let eligible = vec![etf("510300", 0.085, 5, 8e8), etf("510500", 0.02, 1, 9e8)];
        let selected = BestLiquiditySelector.select(&eligible, &event()).unwrap();
        assert_eq!(selected.etf_code, "510500");
    }
}
