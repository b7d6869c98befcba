//! `SignalFilter`: the third pipeline stage. Filters run in configured
//! order; the first rejection short-circuits and becomes the scan's
//! rejection reason for that security.

use crate::models::{CandidateETF, DraftSignal, MarketEvent, RiskLevel};

pub trait SignalFilter: Send + Sync {
    /// Evaluate `draft`. Returns `(true, note)` on pass, `(false, reason)`
    /// on rejection; the note/reason is folded into `TradingSignal.reason`.
    fn filter(&self, event: &MarketEvent, fund: &CandidateETF, draft: &DraftSignal) -> (bool, String);

    /// Required filters cannot be bypassed by global "skip non-required"
    /// configuration.
    fn is_required(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str;
}

/// Rejects when the security is too close to the session close to realize
/// the arbitrage.
#[derive(Debug, Clone, Copy)]
pub struct TimeFilter {
    pub min_time_to_close: i64,
}

impl Default for TimeFilter {
    fn default() -> Self {
        Self {
            min_time_to_close: 1800,
        }
    }
}

impl SignalFilter for TimeFilter {
    fn filter(&self, _event: &MarketEvent, _fund: &CandidateETF, draft: &DraftSignal) -> (bool, String) {
        if draft.seconds_to_close < self.min_time_to_close {
            (
                false,
                format!(
                    "time to close {}s < {}s",
                    draft.seconds_to_close, self.min_time_to_close
                ),
            )
        } else {
            (true, "time to close sufficient".to_string())
        }
    }

    fn name(&self) -> &'static str {
        "time_filter"
    }
}

/// Rejects ETFs too illiquid to realistically transact.
#[derive(Debug, Clone, Copy)]
pub struct LiquidityFilter {
    pub min_daily_amount: f64,
}

impl Default for LiquidityFilter {
    fn default() -> Self {
        Self {
            min_daily_amount: 5e7,
        }
    }
}

impl SignalFilter for LiquidityFilter {
    fn filter(&self, _event: &MarketEvent, fund: &CandidateETF, _draft: &DraftSignal) -> (bool, String) {
        if fund.daily_amount < self.min_daily_amount {
            (
                false,
                format!(
                    "daily amount {:.0} < {:.0}",
                    fund.daily_amount, self.min_daily_amount
                ),
            )
        } else {
            (true, "liquidity sufficient".to_string())
        }
    }

    fn name(&self) -> &'static str {
        "liquidity_filter"
    }
}

/// Rejects drafts below the configured confidence floor. Non-required: can
/// be bypassed globally since it is a tunable risk appetite knob, not a
/// correctness constraint.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceFilter {
    pub min_confidence: f64,
}

impl Default for ConfidenceFilter {
    fn default() -> Self {
        Self { min_confidence: 0.0 }
    }
}

impl SignalFilter for ConfidenceFilter {
    fn filter(&self, _event: &MarketEvent, _fund: &CandidateETF, draft: &DraftSignal) -> (bool, String) {
        if draft.confidence_score < self.min_confidence {
            (
                false,
                format!(
                    "confidence {:.2} < {:.2}",
                    draft.confidence_score, self.min_confidence
                ),
            )
        } else {
            (true, "confidence sufficient".to_string())
        }
    }

    fn is_required(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "confidence_filter"
    }
}

/// Rejects high-risk drafts outright.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskFilter;

impl SignalFilter for RiskFilter {
    fn filter(&self, _event: &MarketEvent, _fund: &CandidateETF, draft: &DraftSignal) -> (bool, String) {
        if draft.risk_level == RiskLevel::High {
            (false, "risk level high".to_string())
        } else {
            (true, "risk acceptable".to_string())
        }
    }

    fn name(&self) -> &'static str {
        "risk_filter"
    }
}
