use crate::domain::report::BacktestSample;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Mutex;

/// Durable backtest progress keyed by (trade date, stock code). The engine
/// consults it before every fetch so an interrupted run resumes where it
/// stopped instead of re-spending its call budget.
#[async_trait::async_trait]
pub trait ProgressLedger: Send + Sync {
    async fn has_sample(&self, trade_date: NaiveDate, code: &str) -> anyhow::Result<bool>;

    async fn append_sample(&self, sample: &BacktestSample) -> anyhow::Result<()>;

    /// All sampling for the date finished (including its skips).
    async fn day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<bool>;

    async fn mark_day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<()>;

    async fn samples_for_day(&self, trade_date: NaiveDate)
        -> anyhow::Result<Vec<BacktestSample>>;
}

/// In-memory ledger. Used by tests and by one-off runs where resumability
/// is not worth a database.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    samples: BTreeMap<(NaiveDate, String), BacktestSample>,
    complete_days: BTreeSet<NaiveDate>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_samples(&self) -> Vec<BacktestSample> {
        let inner = self.inner.lock().await;
        inner.samples.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl ProgressLedger for MemoryLedger {
    async fn has_sample(&self, trade_date: NaiveDate, code: &str) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.samples.contains_key(&(trade_date, code.to_string())))
    }

    async fn append_sample(&self, sample: &BacktestSample) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .samples
            .insert((sample.trade_date, sample.code.clone()), sample.clone());
        Ok(())
    }

    async fn day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.complete_days.contains(&trade_date))
    }

    async fn mark_day_complete(&self, trade_date: NaiveDate) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.complete_days.insert(trade_date);
        Ok(())
    }

    async fn samples_for_day(
        &self,
        trade_date: NaiveDate,
    ) -> anyhow::Result<Vec<BacktestSample>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .samples
            .range((trade_date, String::new())..)
            .take_while(|((d, _), _)| *d == trade_date)
            .map(|(_, s)| s.clone())
            .collect())
    }
}
