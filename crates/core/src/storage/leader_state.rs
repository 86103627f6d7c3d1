use crate::domain::watchlist::LeaderState;
use anyhow::Context;
use chrono::NaiveDate;

/// Stores the day's leader per logic group so the next screening run can
/// tell a stalling leader from an advancing one.
pub async fn save_snapshot(
    pool: &sqlx::PgPool,
    trade_date: NaiveDate,
    leaders: &[LeaderState],
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    for leader in leaders {
        sqlx::query(
            "INSERT INTO logic_leader_state (trade_date, logic_name, code, streak) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (trade_date, logic_name) DO UPDATE \
             SET code = EXCLUDED.code, streak = EXCLUDED.streak",
        )
        .bind(trade_date)
        .bind(&leader.logic_name)
        .bind(&leader.code)
        .bind(leader.streak as i32)
        .execute(&mut *tx)
        .await
        .context("insert logic_leader_state failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(())
}

pub async fn load_snapshot(
    pool: &sqlx::PgPool,
    trade_date: NaiveDate,
) -> anyhow::Result<Vec<LeaderState>> {
    let rows: Vec<(String, String, i32)> = sqlx::query_as(
        "SELECT logic_name, code, streak FROM logic_leader_state WHERE trade_date = $1",
    )
    .bind(trade_date)
    .fetch_all(pool)
    .await
    .context("select logic_leader_state failed")?;

    Ok(rows
        .into_iter()
        .map(|(logic_name, code, streak)| LeaderState {
            logic_name,
            code,
            streak: streak.max(0) as u32,
        })
        .collect())
}
