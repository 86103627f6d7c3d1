use crate::domain::event::{LimitUpEvent, TimeBucket};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One historical up-limit event with its forward outcomes. Samples with
/// missing forward data are retained for auditing but flagged incomplete
/// and excluded from every aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSample {
    pub code: String,
    pub name: String,
    pub trade_date: NaiveDate,
    pub limit_up_time: Option<NaiveTime>,
    pub streak: u32,
    pub industry: String,
    /// Forward 1-session return, as a fraction.
    pub ret_1d: Option<f64>,
    /// Forward 3-session return, as a fraction.
    pub ret_3d: Option<f64>,
    /// Remained at an up-limit the next session.
    pub continued: Option<bool>,
    pub incomplete: bool,
}

impl BacktestSample {
    /// A sample whose forward fetch failed for good; kept, never aggregated.
    pub fn incomplete_from(event: &LimitUpEvent) -> Self {
        Self {
            code: event.code.clone(),
            name: event.name.clone(),
            trade_date: event.trade_date,
            limit_up_time: event.limit_up_time,
            streak: event.streak,
            industry: event.industry.clone(),
            ret_1d: None,
            ret_3d: None,
            continued: None,
            incomplete: true,
        }
    }

    pub fn time_bucket(&self) -> TimeBucket {
        TimeBucket::of(self.limit_up_time)
    }
}

/// Grouping key for pattern mining.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PatternKey {
    TimeBucket(TimeBucket),
    Industry(String),
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeBucket(b) => write!(f, "seal time {b}"),
            Self::Industry(name) => write!(f, "industry {name}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternStat {
    pub key: PatternKey,
    pub samples: usize,
    pub avg_ret_1d: f64,
    pub avg_ret_3d: f64,
    /// Fraction of samples with a positive 1-session return.
    pub win_rate: f64,
    /// Fraction that stayed at an up-limit the next session.
    pub continuation_rate: f64,
}

/// A group seen in the data but too small to draw conclusions from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsufficientGroup {
    pub key: PatternKey,
    pub samples: usize,
    pub minimum: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SuggestionTarget {
    /// A named weight in the popularity ranker.
    TimeBucketWeight(TimeBucket),
    /// A logic-library entry, by name.
    LogicEntry(String),
}

/// Advisory tuning output. Never applied automatically; feeding it back
/// into the logic library or the weights is a human action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub target: SuggestionTarget,
    pub delta: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternReport {
    pub total_samples: usize,
    pub incomplete_samples: usize,
    /// Minimum group size used for this run.
    pub min_samples: usize,
    pub winning: Vec<PatternStat>,
    pub losing: Vec<PatternStat>,
    pub insufficient: Vec<InsufficientGroup>,
    pub suggestions: Vec<SuggestionRecord>,
}

impl PatternReport {
    /// Errors with `InsufficientSample` when no group met the minimum, so a
    /// thin backtest reads as "no conclusion" instead of an empty report.
    pub fn require_conclusive(&self) -> anyhow::Result<()> {
        if self.winning.is_empty() && self.losing.is_empty() {
            if let Some(largest) = self.insufficient.iter().max_by_key(|g| g.samples) {
                return Err(anyhow::Error::new(
                    crate::error::EngineError::InsufficientSample {
                        key: largest.key.to_string(),
                        samples: largest.samples,
                        minimum: largest.minimum,
                    },
                ));
            }
            return Err(anyhow::Error::new(
                crate::error::EngineError::InsufficientSample {
                    key: "all groups".to_string(),
                    samples: self.total_samples - self.incomplete_samples,
                    minimum: self.min_samples,
                },
            ));
        }
        Ok(())
    }
}
