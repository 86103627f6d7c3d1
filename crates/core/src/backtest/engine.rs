use crate::backtest::ledger::ProgressLedger;
use crate::domain::event::LimitUpEvent;
use crate::domain::report::BacktestSample;
use crate::error;
use crate::ingest::provider::MarketDataProvider;
use crate::ingest::types::ForwardSessionsResponse;
use crate::screen::ranker;
use anyhow::Context;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const FORWARD_HORIZON: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct BacktestOptions {
    /// Trading days to sample, counted back from the end date.
    pub window_days: usize,
    /// Hard cap on samples across the whole window.
    pub sample_cap: usize,
    /// Concurrent forward-data fetches within one date.
    pub fetch_concurrency: usize,
    /// Attempts per fetch before a sample is written as incomplete.
    pub attempts: u32,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            window_days: 30,
            sample_cap: 100,
            fetch_concurrency: 4,
            attempts: 3,
        }
    }
}

impl BacktestOptions {
    pub fn from_env() -> Self {
        let mut opts = Self::default();
        if let Some(n) = env_parse::<usize>("BACKTEST_WINDOW_DAYS") {
            opts.window_days = n;
        }
        if let Some(n) = env_parse::<usize>("BACKTEST_SAMPLE_CAP") {
            opts.sample_cap = n;
        }
        if let Some(n) = env_parse::<usize>("BACKTEST_FETCH_CONCURRENCY") {
            opts.fetch_concurrency = n.clamp(1, 4);
        }
        opts
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Walks the historical window date by date, collecting forward outcomes
/// for the most popular events of each day. Dates are processed strictly in
/// order and one date's fetches all finish before the next date starts, so
/// the ledger always describes a clean prefix of the window.
pub struct BacktestEngine {
    provider: Arc<dyn MarketDataProvider>,
    ledger: Arc<dyn ProgressLedger>,
    options: BacktestOptions,
}

impl BacktestEngine {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        ledger: Arc<dyn ProgressLedger>,
        options: BacktestOptions,
    ) -> Self {
        Self {
            provider,
            ledger,
            options,
        }
    }

    pub async fn run(&self, end_date: NaiveDate) -> anyhow::Result<Vec<BacktestSample>> {
        anyhow::ensure!(self.options.window_days >= 1, "window must span at least one day");
        anyhow::ensure!(self.options.sample_cap >= 1, "sample cap must be at least 1");

        let days = self
            .provider
            .trading_days(end_date, self.options.window_days)
            .await
            .context("resolving backtest window")?;
        let per_date_quota = self.options.sample_cap.div_ceil(days.len()).max(1);

        tracing::info!(
            window = days.len(),
            sample_cap = self.options.sample_cap,
            per_date_quota,
            "backtest window resolved"
        );

        let mut samples: Vec<BacktestSample> = Vec::new();
        for date in days {
            if samples.len() >= self.options.sample_cap {
                break;
            }

            if self.ledger.day_complete(date).await? {
                let mut done = self.ledger.samples_for_day(date).await?;
                tracing::info!(%date, resumed = done.len(), "date already sampled; resuming");
                samples.append(&mut done);
                continue;
            }

            let budget = per_date_quota.min(self.options.sample_cap - samples.len());
            let mut day_samples = self.sample_date(date, budget).await?;
            self.ledger.mark_day_complete(date).await?;
            samples.append(&mut day_samples);
        }

        samples.truncate(self.options.sample_cap);
        let incomplete = samples.iter().filter(|s| s.incomplete).count();
        tracing::info!(
            total = samples.len(),
            incomplete,
            "backtest sampling finished"
        );
        Ok(samples)
    }

    /// Collects up to `budget` samples for one date, reloading whatever an
    /// interrupted earlier run already recorded for it. Returns the date's
    /// samples only after every fetch for it has finished.
    async fn sample_date(
        &self,
        date: NaiveDate,
        budget: usize,
    ) -> anyhow::Result<Vec<BacktestSample>> {
        let recorded = self.ledger.samples_for_day(date).await?;
        let recorded_codes: BTreeSet<String> = recorded.iter().map(|s| s.code.clone()).collect();
        if !recorded.is_empty() {
            tracing::info!(%date, reloaded = recorded.len(), "reloading samples from an interrupted run");
        }

        let events = match self.fetch_events(date).await {
            Ok(events) => events,
            Err(err) if error::is_retryable(&err) => {
                tracing::warn!(%date, error = %err, "no event data for date; skipping");
                return Ok(recorded);
            }
            Err(err) => return Err(err),
        };

        // The day's most popular events, same scoring as the screen.
        let ranked = ranker::rank(events).ranked;
        let picked: Vec<LimitUpEvent> = ranked
            .into_iter()
            .take(budget)
            .map(|c| c.event)
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.options.fetch_concurrency));
        let mut handles = Vec::with_capacity(picked.len());

        for event in picked {
            if recorded_codes.contains(&event.code) {
                tracing::debug!(%date, code = %event.code, "sample already recorded; skipping fetch");
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("fetch semaphore closed")?;
            let provider = Arc::clone(&self.provider);
            let ledger = Arc::clone(&self.ledger);
            let attempts = self.options.attempts;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let sample = build_sample(provider.as_ref(), &event, attempts).await;
                ledger.append_sample(&sample).await?;
                Ok::<BacktestSample, anyhow::Error>(sample)
            }));
        }

        let mut out = recorded;
        for handle in handles {
            let sample = handle.await.context("sample task panicked")??;
            out.push(sample);
        }
        Ok(out)
    }

    async fn fetch_events(&self, date: NaiveDate) -> anyhow::Result<Vec<LimitUpEvent>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.provider.limit_up_events(date).await {
                Ok(events) => return Ok(events),
                Err(err) => {
                    if attempt >= self.options.attempts || !error::is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(%date, attempt, ?backoff, error = %err, "event fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// Fetches forward sessions for one event and turns them into a sample. A
/// persistent fetch failure produces an incomplete sample rather than an
/// error, so one bad stock never sinks the window.
async fn build_sample(
    provider: &dyn MarketDataProvider,
    event: &LimitUpEvent,
    attempts: u32,
) -> BacktestSample {
    let mut attempt: u32 = 0;
    let forward = loop {
        attempt += 1;
        match provider
            .forward_sessions(&event.code, event.trade_date, FORWARD_HORIZON)
            .await
        {
            Ok(forward) => break Some(forward),
            Err(err) => {
                if attempt >= attempts || !error::is_retryable(&err) {
                    tracing::warn!(
                        code = %event.code,
                        trade_date = %event.trade_date,
                        error = %err,
                        "forward data unavailable; recording incomplete sample"
                    );
                    break None;
                }
                let backoff = Duration::from_secs(1 << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }
    };

    match forward {
        Some(forward) => sample_from_forward(event, &forward),
        None => BacktestSample::incomplete_from(event),
    }
}

fn sample_from_forward(event: &LimitUpEvent, forward: &ForwardSessionsResponse) -> BacktestSample {
    let ret_at = |n: usize| -> Option<f64> {
        if forward.base_close <= 0.0 {
            return None;
        }
        forward
            .sessions
            .get(n - 1)
            .map(|s| (s.close - forward.base_close) / forward.base_close)
    };

    let ret_1d = ret_at(1);
    let ret_3d = ret_at(3);
    let continued = forward.sessions.first().map(|s| s.limit_up);

    BacktestSample {
        code: event.code.clone(),
        name: event.name.clone(),
        trade_date: event.trade_date,
        limit_up_time: event.limit_up_time,
        streak: event.streak,
        industry: event.industry.clone(),
        ret_1d,
        ret_3d,
        continued,
        incomplete: ret_1d.is_none() || ret_3d.is_none(),
    }
}
