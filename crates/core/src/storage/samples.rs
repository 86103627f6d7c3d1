use crate::backtest::ledger::ProgressLedger;
use crate::domain::report::BacktestSample;
use anyhow::Context;
use chrono::NaiveDate;

/// Postgres-backed backtest ledger. Samples are stored whole as json with
/// (trade_date, code) as the key, so a re-run is a cheap existence check.
pub struct PgLedger {
    pool: sqlx::PgPool,
}

impl PgLedger {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Every stored sample whose date falls in `[start, end]`, oldest first.
    pub async fn samples_in_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<BacktestSample>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT payload FROM backtest_samples \
             WHERE trade_date >= $1 AND trade_date <= $2 \
             ORDER BY trade_date, code",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("select backtest_samples window failed")?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_value(payload).context("deserialize backtest sample failed")
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ProgressLedger for PgLedger {
    async fn has_sample(&self, trade_date: NaiveDate, code: &str) -> anyhow::Result<bool> {
        let found: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM backtest_samples WHERE trade_date = $1 AND code = $2",
        )
        .bind(trade_date)
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("select backtest_samples failed")?;
        Ok(found.is_some())
    }

    async fn append_sample(&self, sample: &BacktestSample) -> anyhow::Result<()> {
        let payload = serde_json::to_value(sample).context("serialize backtest sample failed")?;
        sqlx::query(
            "INSERT INTO backtest_samples (trade_date, code, incomplete, payload) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (trade_date, code) DO UPDATE \
             SET incomplete = EXCLUDED.incomplete, payload = EXCLUDED.payload",
        )
        .bind(sample.trade_date)
        .bind(&sample.code)
        .bind(sample.incomplete)
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("insert backtest_samples failed")?;
        Ok(())
    }

    async fn day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<bool> {
        let found: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM backtest_days WHERE trade_date = $1")
                .bind(trade_date)
                .fetch_optional(&self.pool)
                .await
                .context("select backtest_days failed")?;
        Ok(found.is_some())
    }

    async fn mark_day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO backtest_days (trade_date, completed_at) VALUES ($1, now()) \
             ON CONFLICT (trade_date) DO NOTHING",
        )
        .bind(trade_date)
        .execute(&self.pool)
        .await
        .context("insert backtest_days failed")?;
        Ok(())
    }

    async fn samples_for_day(
        &self,
        trade_date: NaiveDate,
    ) -> anyhow::Result<Vec<BacktestSample>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT payload FROM backtest_samples WHERE trade_date = $1 ORDER BY code",
        )
        .bind(trade_date)
        .fetch_all(&self.pool)
        .await
        .context("select backtest_samples failed")?;

        rows.into_iter()
            .map(|(payload,)| {
                serde_json::from_value(payload).context("deserialize backtest sample failed")
            })
            .collect()
    }
}
