use crate::domain::event::LimitUpEvent;
use crate::domain::market::{MarketState, Regime};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How central a stock is to its matched narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BenefitTier {
    Core,
    Secondary,
    Opportunistic,
    Unmatched,
}

/// The candidate's standing inside its logic group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionTier {
    /// Holds the group's maximum streak, streak >= 2.
    Leader,
    /// Rising while (or after) the group leader stalls.
    CatchUp,
    /// First board of a new move.
    FirstBoard,
}

/// The narrative a candidate was matched against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogicMatch {
    pub entry_name: String,
    pub strength: u8,
    /// Concept tags shared by the candidate and the entry.
    pub overlap: BTreeSet<String>,
}

/// A ranked candidate. Once it reaches the final watch-list its rationale
/// is guaranteed non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub event: LimitUpEvent,
    pub popularity_score: i64,
    /// 1-based rank over the day's full scored set.
    pub rank: u32,
    pub matched: Option<LogicMatch>,
    pub benefit_tier: BenefitTier,
    pub position_tier: Option<PositionTier>,
    pub rationale: String,
}

/// Why a candidate was kept out of the watch-list. Every drop is recorded;
/// nothing disappears silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExclusionReason {
    BelowPopularityFloor { rank: u32, floor: usize },
    Unmatched,
    StrengthBelowThreshold { strength: u8, minimum: u8 },
    Bandwagon { entry_name: String },
    RegimeIneligible { regime: Regime },
    MalformedEvent { detail: String },
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BelowPopularityFloor { rank, floor } => {
                write!(f, "below popularity floor (rank {rank}, floor {floor})")
            }
            Self::Unmatched => write!(f, "no active logic matched"),
            Self::StrengthBelowThreshold { strength, minimum } => {
                write!(f, "logic strength below threshold ({strength} < {minimum})")
            }
            Self::Bandwagon { entry_name } => {
                write!(f, "bandwagon on {entry_name}, not a genuine beneficiary")
            }
            Self::RegimeIneligible { regime } => {
                write!(f, "not eligible under {regime} regime profile")
            }
            Self::MalformedEvent { detail } => write!(f, "malformed event: {detail}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedCandidate {
    pub code: String,
    pub name: String,
    pub streak: u32,
    pub rank: Option<u32>,
    pub reason: ExclusionReason,
}

/// Daily leader snapshot per logic entry, persisted so the next run can
/// detect a stalling leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderState {
    pub logic_name: String,
    pub code: String,
    pub streak: u32,
}

/// The daily screening output: ordered entries with rationale, plus the
/// mandatory excluded section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchList {
    pub trade_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub market_state: MarketState,
    pub entries: Vec<ScoredCandidate>,
    pub excluded: Vec<ExcludedCandidate>,
    /// Total up-limit events ingested for the day, before any filtering.
    pub total_limit_up: usize,
}

impl WatchList {
    /// Today's leader per logic group, for the previous-regime store.
    pub fn leader_snapshot(&self) -> Vec<LeaderState> {
        self.entries
            .iter()
            .filter(|c| c.position_tier == Some(PositionTier::Leader))
            .filter_map(|c| {
                c.matched.as_ref().map(|m| LeaderState {
                    logic_name: m.entry_name.clone(),
                    code: c.event.code.clone(),
                    streak: c.event.streak,
                })
            })
            .collect()
    }
}
