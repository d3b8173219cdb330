//! Token bucket and retry wrapper for upstream aggregator calls
//!
//! Every call first waits for a permit from the bucket (proactive), then
//! absorbs 429 and transient network failures with bounded retries
//! (reactive).

use crate::config::RateLimitConfig;
use crate::error::{EngineError, EngineResult};

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Token bucket state, tokens always within [0, max_tokens]
#[derive(Debug)]
struct RateLimiterState {
    tokens: f64,
    max_tokens: f64,
    last_refill: Instant,
    last_request_time: Option<Instant>,
}

impl RateLimiterState {
    fn refill(&mut self, now: Instant, refill_rate: f64) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).clamp(0.0, self.max_tokens);
        self.last_refill = now;
    }

    fn interval_wait(&self, now: Instant, min_interval: Duration) -> Duration {
        match self.last_request_time {
            Some(last) => min_interval.saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    pub fn new(config: RateLimitConfig) -> Self {
        let max_tokens = f64::from(config.max_tokens.max(1));
        Self {
            state: Mutex::new(RateLimiterState {
                tokens: max_tokens,
                max_tokens,
                last_refill: Instant::now(),
                last_request_time: None,
            }),
            config,
        }
    }

    /// A token is available and the minimum interval has elapsed
    pub async fn can_make_request(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.refill(now, self.config.refill_rate);
        state.tokens >= 1.0 && state.interval_wait(now, self.config.min_interval()).is_zero()
    }

    /// Atomically take a token and stamp the request time
    pub async fn consume_token(&self) -> bool {
        self.try_acquire().await.is_none()
    }

    /// Current token count
    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(Instant::now(), self.config.refill_rate);
        state.tokens
    }

    /// Wait until a permit is granted
    pub async fn acquire(&self) {
        while let Some(wait) = self.try_acquire().await {
            debug!("Rate limiter waiting {:?} for a permit", wait);
            sleep(wait).await;
        }
    }

    /// Take a permit, or return how long until one could be granted
    async fn try_acquire(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.refill(now, self.config.refill_rate);

        let interval_wait = state.interval_wait(now, self.config.min_interval());
        let token_wait = if state.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - state.tokens) / self.config.refill_rate)
        };

        if interval_wait.is_zero() && token_wait.is_zero() {
            state.tokens -= 1.0;
            state.last_request_time = Some(now);
            None
        } else {
            Some(interval_wait.max(token_wait).max(Duration::from_millis(1)))
        }
    }

    /// Run `call` behind the bucket, retrying 429s and transient failures.
    ///
    /// `retries` defaults to the configured maximum. A 429 sleeps for the
    /// server's retry-after (or the configured default) and becomes
    /// [`EngineError::TryAgainLater`] once retries run out. Transient errors
    /// sleep a fixed delay and are returned unchanged on exhaustion. Anything
    /// else is returned immediately.
    pub async fn execute_with_rate_limit<T, F, Fut>(&self, call: F, retries: Option<u32>) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.run(call, retries, true).await
    }

    /// Like [`RateLimiter::execute_with_rate_limit`], but transient errors go
    /// straight back to a caller that runs its own retry loop
    pub async fn execute_throttled<T, F, Fut>(&self, call: F, retries: Option<u32>) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.run(call, retries, false).await
    }

    async fn run<T, F, Fut>(&self, mut call: F, retries: Option<u32>, retry_transient: bool) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let max_retries = retries.unwrap_or(self.config.max_retries);
        let mut attempt: u32 = 0;

        loop {
            self.acquire().await;

            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limit() => {
                    crate::metrics::record_upstream_rate_limited();
                    if attempt >= max_retries {
                        warn!(
                            "Upstream still rate limiting after {} retries: {}",
                            max_retries, e
                        );
                        return Err(EngineError::TryAgainLater);
                    }
                    let wait = e
                        .retry_after()
                        .unwrap_or_else(|| self.config.default_retry_after());
                    warn!(
                        "Upstream rate limited (attempt {}/{}), retrying in {:?}",
                        attempt + 1,
                        max_retries + 1,
                        wait
                    );
                    sleep(wait).await;
                }
                Err(e) if retry_transient && e.is_transient() => {
                    if attempt >= max_retries {
                        warn!("Transient upstream error persisted after {} retries: {}", max_retries, e);
                        return Err(e);
                    }
                    let wait = self.config.transient_retry_delay();
                    warn!(
                        "Transient upstream error (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        max_retries + 1,
                        e,
                        wait
                    );
                    sleep(wait).await;
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
        }
    }
}
