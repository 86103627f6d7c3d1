use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

const CST_OFFSET_SECS: i32 = 8 * 3600;

// A-share close is 15:00 CST; data vendors finish consolidating the day's
// limit pools shortly after, so use a conservative cutoff.
const CLOSE_CUTOFF_HOUR_CST: u32 = 16;
const CLOSE_CUTOFF_MINUTE_CST: u32 = 0;

/// The market date a run should screen: today after the close cutoff,
/// otherwise the previous business day, with weekend/holiday rollback.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
    }

    let cst = chrono::FixedOffset::east_opt(CST_OFFSET_SECS).context("invalid CST offset")?;
    let now_cst = now_utc.with_timezone(&cst);

    let cutoff_reached =
        (now_cst.hour(), now_cst.minute()) >= (CLOSE_CUTOFF_HOUR_CST, CLOSE_CUTOFF_MINUTE_CST);
    let mut date = now_cst.date_naive();
    if !cutoff_reached {
        date -= Duration::days(1);
    }

    let holidays = configured_holidays();
    while is_weekend(date) || holidays.contains(&date) {
        date -= Duration::days(1);
    }

    Ok(date)
}

/// Last-resort trading calendar: the most recent `count` weekdays ending at
/// `end`, ascending. Used only when the calendar endpoint is down.
pub fn recent_weekdays(end: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(count);
    let mut date = end;
    while out.len() < count {
        if !is_weekend(date) {
            out.push(date);
        }
        date -= Duration::days(1);
    }
    out.reverse();
    out
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

fn configured_holidays() -> HashSet<NaiveDate> {
    // Fixed-date holidays only; lunar-calendar closures (Spring Festival)
    // come in via CN_MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD".
    let mut out = HashSet::new();
    let years = [2024, 2025, 2026, 2027, 2028, 2029, 2030];
    for y in years {
        for (m, d) in [(1, 1), (5, 1), (10, 1), (10, 2), (10, 3)] {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                out.insert(date);
            }
        }
    }

    if let Ok(s) = std::env::var("CN_MARKET_HOLIDAYS") {
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(d) = NaiveDate::parse_from_str(part, "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }

    out
}
