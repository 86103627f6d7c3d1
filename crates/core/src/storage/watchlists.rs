use crate::domain::watchlist::WatchList;
use anyhow::Context;
use chrono::NaiveDate;

/// Persists a finished watch-list as one snapshot row plus per-candidate
/// item and exclusion rows. The full payload is also kept as json so the
/// report command can replay it without re-joining.
pub async fn persist_success(
    pool: &sqlx::PgPool,
    watchlist: &WatchList,
) -> anyhow::Result<uuid::Uuid> {
    let payload = serde_json::to_value(watchlist).context("serialize watch-list failed")?;

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let snapshot_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO watchlist_snapshots \
         (trade_date, generated_at, regime, up_limit_count, prev_down_limit_count, max_streak, status, error, payload) \
         VALUES ($1, $2, $3, $4, $5, $6, 'success', NULL, $7) \
         RETURNING id",
    )
    .bind(watchlist.trade_date)
    .bind(watchlist.generated_at)
    .bind(watchlist.market_state.regime.to_string())
    .bind(watchlist.market_state.up_limit_count as i32)
    .bind(watchlist.market_state.prev_down_limit_count as i32)
    .bind(watchlist.market_state.max_streak as i32)
    .bind(payload)
    .fetch_one(&mut *tx)
    .await
    .context("insert watchlist_snapshots failed")?;

    for (position, candidate) in watchlist.entries.iter().enumerate() {
        let matched = candidate.matched.as_ref();
        sqlx::query(
            "INSERT INTO watchlist_items \
             (snapshot_id, position, code, name, streak, popularity_score, popularity_rank, \
              logic_name, logic_strength, benefit_tier, position_tier, rationale) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(snapshot_id)
        .bind(position as i32 + 1)
        .bind(&candidate.event.code)
        .bind(&candidate.event.name)
        .bind(candidate.event.streak as i32)
        .bind(candidate.popularity_score)
        .bind(candidate.rank as i32)
        .bind(matched.map(|m| m.entry_name.as_str()))
        .bind(matched.map(|m| m.strength as i16))
        .bind(format!("{:?}", candidate.benefit_tier))
        .bind(candidate.position_tier.map(|t| format!("{t:?}")))
        .bind(&candidate.rationale)
        .execute(&mut *tx)
        .await
        .context("insert watchlist_items failed")?;
    }

    for excluded in &watchlist.excluded {
        sqlx::query(
            "INSERT INTO watchlist_excluded (snapshot_id, code, name, streak, popularity_rank, reason) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(snapshot_id)
        .bind(&excluded.code)
        .bind(&excluded.name)
        .bind(excluded.streak as i32)
        .bind(excluded.rank.map(|r| r as i32))
        .bind(excluded.reason.to_string())
        .execute(&mut *tx)
        .await
        .context("insert watchlist_excluded failed")?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(snapshot_id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    trade_date: NaiveDate,
    generated_at: chrono::DateTime<chrono::Utc>,
    error: &str,
) -> anyhow::Result<uuid::Uuid> {
    let snapshot_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO watchlist_snapshots \
         (trade_date, generated_at, regime, up_limit_count, prev_down_limit_count, max_streak, status, error, payload) \
         VALUES ($1, $2, NULL, NULL, NULL, NULL, 'error', $3, NULL) \
         RETURNING id",
    )
    .bind(trade_date)
    .bind(generated_at)
    .bind(error)
    .fetch_one(pool)
    .await
    .context("insert error watchlist_snapshots failed")?;

    Ok(snapshot_id)
}

/// The most recent successful watch-list payload, optionally pinned to a
/// trade date. None when nothing has been persisted yet.
pub async fn latest_payload(
    pool: &sqlx::PgPool,
    trade_date: Option<NaiveDate>,
) -> anyhow::Result<Option<serde_json::Value>> {
    let row: Option<(serde_json::Value,)> = match trade_date {
        Some(date) => {
            sqlx::query_as(
                "SELECT payload FROM watchlist_snapshots \
                 WHERE status = 'success' AND trade_date = $1 \
                 ORDER BY generated_at DESC LIMIT 1",
            )
            .bind(date)
            .fetch_optional(pool)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT payload FROM watchlist_snapshots \
                 WHERE status = 'success' \
                 ORDER BY trade_date DESC, generated_at DESC LIMIT 1",
            )
            .fetch_optional(pool)
            .await
        }
    }
    .context("select watchlist_snapshots failed")?;

    Ok(row.map(|(payload,)| payload))
}
