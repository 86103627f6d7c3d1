use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Token bucket gating every upstream call. The default ceiling sits below
/// the provider's published limit so a full backtest never trips it.
pub const DEFAULT_CALLS_PER_MINUTE: u32 = 180;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared across the screener's sequential fetches and the backtest worker
/// pool; the bucket is the only mutable state the workers share besides the
/// progress ledger.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    tokens_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn per_minute(calls: u32) -> Self {
        let calls = calls.max(1);
        Self {
            capacity: f64::from(calls),
            tokens_per_sec: f64::from(calls) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(calls),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_env() -> Self {
        let calls = std::env::var("MARKET_DATA_CALLS_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_CALLS_PER_MINUTE);
        Self::per_minute(calls)
    }

    /// Take one token immediately if available.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - bucket.tokens;
                Duration::from_secs_f64(deficit / self.tokens_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
