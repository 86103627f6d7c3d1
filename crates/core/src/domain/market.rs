use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The day's classified market mood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    /// Washed-out tape starting to repair: many down-limits yesterday,
    /// streak height compressed.
    IcePointRecovery,
    /// Fresh money chasing height: broad up-limit breadth or streaks >= 3.
    IncrementalSurge,
    /// Neither; choppy, low-conviction tape.
    Consolidation,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::IcePointRecovery => "ice-point recovery",
            Self::IncrementalSurge => "incremental surge",
            Self::Consolidation => "consolidation",
        };
        f.write_str(label)
    }
}

/// Derived view of the day's aggregate tape. Computed fresh per run, never
/// authoritative storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub trade_date: NaiveDate,
    pub up_limit_count: u32,
    pub prev_down_limit_count: u32,
    /// Highest streak across all of today's up-limit events.
    pub max_streak: u32,
    pub regime: Regime,
}
