use crate::domain::event::LimitUpEvent;
use anyhow::ensure;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitUpDayResponse {
    pub trade_date: NaiveDate,
    pub items: Vec<LimitUpItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitUpItem {
    pub code: String,
    pub name: String,
    /// "HH:MM" or "HH:MM:SS"; absent when the stock never sealed.
    pub limit_up_time: Option<String>,
    pub streak: u32,
    #[serde(default)]
    pub on_disclosure_list: bool,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub concepts: Vec<String>,
}

impl LimitUpItem {
    pub fn into_event(self, trade_date: NaiveDate) -> anyhow::Result<LimitUpEvent> {
        ensure!(!self.code.trim().is_empty(), "code must be non-empty");
        ensure!(!self.name.trim().is_empty(), "name must be non-empty");
        ensure!(self.streak >= 1, "streak must be >= 1 (got {})", self.streak);

        let limit_up_time = match self.limit_up_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(parse_seal_time(s)?),
        };

        Ok(LimitUpEvent {
            code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            trade_date,
            limit_up_time,
            streak: self.streak,
            on_disclosure_list: self.on_disclosure_list,
            industry: self.industry.trim().to_string(),
            concepts: self
                .concepts
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect::<BTreeSet<_>>(),
        })
    }
}

fn parse_seal_time(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| anyhow::anyhow!("bad limit_up_time {s:?}: {e}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownLimitCountResponse {
    pub trade_date: NaiveDate,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDaysResponse {
    pub days: Vec<NaiveDate>,
}

/// Price action on the sessions after an event day. `base_close` is the
/// event-day close all forward returns are measured from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardSessionsResponse {
    pub code: String,
    pub base_close: f64,
    pub sessions: Vec<ForwardSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardSession {
    pub trade_date: NaiveDate,
    pub close: f64,
    /// Closed at its up-limit this session.
    pub limit_up: bool,
}
