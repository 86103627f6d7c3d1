use crate::config::Settings;
use crate::domain::event::LimitUpEvent;
use crate::error::{self, EngineError};
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{
    DownLimitCountResponse, ForwardSessionsResponse, LimitUpDayResponse, TradingDaysResponse,
};
use anyhow::Context;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

const LIMIT_UP_PATH: &str = "/v1/limit_up_pool";
const DOWN_LIMIT_PATH: &str = "/v1/limit_down_count";
const TRADING_DAYS_PATH: &str = "/v1/trading_days";
const FORWARD_PATH: &str = "/v1/forward_sessions";

/// The market-data upstream, keyed by (stock, date). A black box to the
/// engine; failures surface as `DataUnavailable`/`RateLimitExceeded`.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// The most recent `count` trading days ending at `end`, ascending.
    async fn trading_days(&self, end: NaiveDate, count: usize) -> anyhow::Result<Vec<NaiveDate>>;

    async fn limit_up_events(&self, trade_date: NaiveDate) -> anyhow::Result<Vec<LimitUpEvent>>;

    async fn down_limit_count(&self, trade_date: NaiveDate) -> anyhow::Result<u32>;

    /// Price action on the `horizon` sessions after `trade_date`.
    async fn forward_sessions(
        &self,
        code: &str,
        trade_date: NaiveDate,
        horizon: usize,
    ) -> anyhow::Result<ForwardSessionsResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonMarketData {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
    limiter: Arc<RateLimiter>,
}

impl HttpJsonMarketData {
    pub fn from_settings(settings: &Settings, limiter: Arc<RateLimiter>) -> anyhow::Result<Self> {
        let base_url = settings.require_market_data_base_url()?.to_string();
        let api_key = settings.market_data_api_key.clone();

        let timeout_secs = std::env::var("MARKET_DATA_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("MARKET_DATA_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build market data http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
            limiter,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        self.limiter.acquire().await;

        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .context("market data request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read market data response")?;

        match status {
            StatusCode::NOT_FOUND => Err(anyhow::Error::new(EngineError::data_unavailable(
                format!("{path} {query:?}: upstream has no data"),
            ))),
            StatusCode::TOO_MANY_REQUESTS => Err(anyhow::Error::new(EngineError::rate_limited(
                format!("{path}: HTTP 429"),
            ))),
            s if !s.is_success() => anyhow::bail!("market data HTTP {s} on {path}: {text}"),
            _ => serde_json::from_str::<T>(&text)
                .with_context(|| format!("bad market data payload on {path}: {text}")),
        }
    }

    /// Bounded retry with exponential backoff, only for retryable causes.
    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<T> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(path, query).await {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries || !error::is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(path, attempt, ?backoff, error = %err, "market data fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketData {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn trading_days(&self, end: NaiveDate, count: usize) -> anyhow::Result<Vec<NaiveDate>> {
        let query = [
            ("end", end.to_string()),
            ("count", count.to_string()),
        ];
        match self
            .fetch::<TradingDaysResponse>(TRADING_DAYS_PATH, &query)
            .await
        {
            Ok(resp) => {
                anyhow::ensure!(
                    !resp.days.is_empty(),
                    "trading calendar returned no days ending {end}"
                );
                Ok(resp.days)
            }
            Err(err) if error::is_retryable(&err) => {
                // Calendar endpoint down: fall back to weekday enumeration
                // rather than aborting a whole backtest.
                tracing::warn!(error = %err, "trading calendar unavailable; using weekday fallback");
                Ok(crate::time::cn_market::recent_weekdays(end, count))
            }
            Err(err) => Err(err),
        }
    }

    async fn limit_up_events(&self, trade_date: NaiveDate) -> anyhow::Result<Vec<LimitUpEvent>> {
        let query = [("trade_date", trade_date.to_string())];
        let resp: LimitUpDayResponse = self.fetch(LIMIT_UP_PATH, &query).await?;
        anyhow::ensure!(
            resp.trade_date == trade_date,
            "limit-up pool date mismatch: expected {trade_date}, got {}",
            resp.trade_date
        );

        let mut events = Vec::with_capacity(resp.items.len());
        for item in resp.items {
            events.push(item.into_event(trade_date)?);
        }
        Ok(events)
    }

    async fn down_limit_count(&self, trade_date: NaiveDate) -> anyhow::Result<u32> {
        let query = [("trade_date", trade_date.to_string())];
        let resp: DownLimitCountResponse = self.fetch(DOWN_LIMIT_PATH, &query).await?;
        Ok(resp.count)
    }

    async fn forward_sessions(
        &self,
        code: &str,
        trade_date: NaiveDate,
        horizon: usize,
    ) -> anyhow::Result<ForwardSessionsResponse> {
        let query = [
            ("code", code.to_string()),
            ("trade_date", trade_date.to_string()),
            ("horizon", horizon.to_string()),
        ];
        self.fetch(FORWARD_PATH, &query).await
    }
}
