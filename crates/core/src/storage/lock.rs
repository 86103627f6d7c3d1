use anyhow::Context;
use chrono::{Datelike, NaiveDate};

/// Session-scoped advisory locks, one key space per run kind, keyed by
/// trade date. A screen and a backtest for the same date write disjoint
/// tables and may run side by side; two runs of the same kind may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Screen,
    Backtest,
}

const LOCK_NAMESPACE: i64 = 0x4C4F_4E47_544F; // "LONGTO" as hex-ish namespace.

impl RunKind {
    fn lock_key(self, trade_date: NaiveDate) -> i64 {
        let day = i64::from(trade_date.num_days_from_ce());
        let tag: i64 = match self {
            RunKind::Screen => 0,
            RunKind::Backtest => 1,
        };
        LOCK_NAMESPACE ^ (day << 1 | tag)
    }
}

/// Best-effort guard against concurrent runs of one kind on one date. The
/// lock lives with the Postgres session and vanishes if the connection
/// drops.
pub async fn try_acquire_run_lock(
    pool: &sqlx::PgPool,
    kind: RunKind,
    trade_date: NaiveDate,
) -> anyhow::Result<bool> {
    let key = kind.lock_key(trade_date);
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to acquire {kind:?} advisory lock (key={key})"))?;
    Ok(acquired.0)
}

pub async fn release_run_lock(
    pool: &sqlx::PgPool,
    kind: RunKind,
    trade_date: NaiveDate,
) -> anyhow::Result<()> {
    let key = kind.lock_key(trade_date);
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .persistent(false)
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to release {kind:?} advisory lock (key={key})"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_spaces_are_disjoint_per_kind_and_date() {
        let d1 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();

        assert_ne!(
            RunKind::Screen.lock_key(d1),
            RunKind::Backtest.lock_key(d1)
        );
        assert_ne!(RunKind::Screen.lock_key(d1), RunKind::Screen.lock_key(d2));
        assert_ne!(
            RunKind::Backtest.lock_key(d1),
            RunKind::Screen.lock_key(d2)
        );
        // Same kind, same date: the same key, so the second run backs off.
        assert_eq!(RunKind::Screen.lock_key(d1), RunKind::Screen.lock_key(d1));
    }
}
