// src/edgar/client.rs
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header;

use crate::utils::error::EdgarError;

/// Anything that can fetch a URL as text. The pipeline only talks to EDGAR
/// through this trait so that tests can substitute canned pages.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetches `url`, returning the body on a 2xx status.
    /// Non-success statuses come back as `EdgarError::Http`.
    async fn get_text(&self, url: &str) -> Result<String, EdgarError>;
}

/// Quota for the outbound request budget: one request every `1/rate`
/// seconds with no burst, so any one-second window sees at most `rate`
/// request starts. EDGAR's fair access policy caps clients at 10/s.
pub fn request_quota(rate_per_second: NonZeroU32) -> Quota {
    Quota::per_second(rate_per_second).allow_burst(NonZeroU32::MIN)
}

/// governor clock reading tokio's time source, so a paused test runtime
/// drives the limiter too.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Instant>>;

/// Wraps any [`Fetch`] so every request first waits for a token from one
/// shared limiter. Callers wait rather than fail.
pub struct RateLimited {
    inner: Arc<dyn Fetch>,
    limiter: DirectLimiter,
    clock: TokioClock,
}

impl RateLimited {
    pub fn new(inner: Arc<dyn Fetch>, rate_per_second: NonZeroU32) -> Self {
        let clock = TokioClock;
        Self {
            inner,
            limiter: RateLimiter::direct_with_clock(request_quota(rate_per_second), &clock),
            clock,
        }
    }

    /// Resolves once the budget has a token for one more request.
    pub async fn acquire(&self) {
        while let Err(not_until) = self.limiter.check() {
            tokio::time::sleep(not_until.wait_time_from(self.clock.now())).await;
        }
    }
}

#[async_trait]
impl Fetch for RateLimited {
    async fn get_text(&self, url: &str) -> Result<String, EdgarError> {
        self.acquire().await;
        self.inner.get_text(url).await
    }
}

/// A reqwest client configured for EDGAR interaction. It does no pacing of
/// its own; wrap it in [`RateLimited`].
pub struct EdgarClient {
    http: reqwest::Client,
    user_agent: String,
}

impl EdgarClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, EdgarError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent) // EDGAR rejects anonymous clients
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            user_agent: user_agent.to_string(),
        })
    }
}

#[async_trait]
impl Fetch for EdgarClient {
    async fn get_text(&self, url: &str) -> Result<String, EdgarError> {
        tracing::debug!(url, user_agent = %self.user_agent, "GET");
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "text/html,text/plain,*/*")
            .send()
            .await
            .map_err(|e| EdgarError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!(url, %status, "EDGAR refused the request - check User-Agent and rate limit");
            }
            return Err(EdgarError::Http {
                status,
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        tracing::trace!(url, bytes = body.len(), "Downloaded");
        Ok(body)
    }
}
