use crate::domain::market::{MarketState, Regime};
use chrono::NaiveDate;

/// Aggregate tape statistics feeding the classifier. Fields are optional
/// because any of them can be missing upstream; classification never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketInputs {
    pub up_limit_count: Option<u32>,
    pub prev_down_limit_count: Option<u32>,
    pub max_streak: Option<u32>,
}

/// Classifies the day's regime. Rules are checked in priority order; a day
/// satisfying both the ice-point and surge conditions resolves to
/// ice-point recovery.
pub fn classify(trade_date: NaiveDate, inputs: MarketInputs) -> MarketState {
    if inputs.up_limit_count.is_none()
        || inputs.prev_down_limit_count.is_none()
        || inputs.max_streak.is_none()
    {
        tracing::warn!(
            %trade_date,
            ?inputs,
            "market inputs incomplete; defaulting missing fields to zero"
        );
    }

    let up_limit_count = inputs.up_limit_count.unwrap_or(0);
    let prev_down_limit_count = inputs.prev_down_limit_count.unwrap_or(0);
    let max_streak = inputs.max_streak.unwrap_or(0);

    let regime = if prev_down_limit_count > 15 && max_streak <= 2 {
        Regime::IcePointRecovery
    } else if up_limit_count > 30 || max_streak >= 3 {
        Regime::IncrementalSurge
    } else {
        Regime::Consolidation
    };

    MarketState {
        trade_date,
        up_limit_count,
        prev_down_limit_count,
        max_streak,
        regime,
    }
}
