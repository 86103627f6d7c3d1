use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One stock that closed at its daily up-limit, as ingested for a single
/// trade date. Immutable once persisted for that date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitUpEvent {
    pub code: String,
    pub name: String,
    pub trade_date: NaiveDate,
    /// First time the stock sealed its up-limit; None if it never sealed.
    pub limit_up_time: Option<NaiveTime>,
    /// Consecutive up-limit days including today ("boards").
    pub streak: u32,
    /// Appeared on the public large-trade disclosure report for the day.
    pub on_disclosure_list: bool,
    pub industry: String,
    pub concepts: BTreeSet<String>,
}

/// Intraday buckets for the first seal time. Shared between popularity
/// scoring and pattern grouping so both speak the same language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimeBucket {
    /// Sealed before 09:35.
    OpeningRush,
    /// Sealed before 10:00.
    EarlyMorning,
    /// Sealed before 10:30.
    MidMorning,
    /// Sealed later in the session, or never sealed.
    Late,
}

impl TimeBucket {
    pub fn of(limit_up_time: Option<NaiveTime>) -> Self {
        use chrono::Timelike;

        let Some(t) = limit_up_time else {
            return Self::Late;
        };
        match t.hour() * 100 + t.minute() {
            hm if hm < 935 => Self::OpeningRush,
            hm if hm < 1000 => Self::EarlyMorning,
            hm if hm < 1030 => Self::MidMorning,
            _ => Self::Late,
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::OpeningRush => "before 09:35",
            Self::EarlyMorning => "09:35-10:00",
            Self::MidMorning => "10:00-10:30",
            Self::Late => "after 10:30",
        };
        f.write_str(label)
    }
}
