//! Source-specific price/financial adapters with a shared retry envelope.
//!
//! Grounded in `quotes::finnhub`/`quotes::twelvedata` for HTTP client setup
//! and JSON shapes, and in `original_source/stock_analysis/data/downloaders/base.py`
//! (`BaseDownloader._retry_with_backoff` / `_is_api_error_retryable`) for the
//! retry contract: exponential backoff on 429/502/503/504 and on
//! timeout/connection errors, immediate failure on anything else.

pub mod finnhub;
pub mod stooq;
pub mod twelvedata;
pub mod yfinance;

use crate::error::{PortfolioError, Result};
use crate::models::{FinancialStatement, PriceBar, Stock};
use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

#[async_trait]
pub trait StockDownloader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_stock_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>>;

    /// Default: providers without a financials endpoint are simply
    /// unsupported, not fatal — callers decide whether that's an error.
    async fn fetch_financial_data(
        &self,
        symbol: &str,
    ) -> Result<(Option<Stock>, Vec<FinancialStatement>)> {
        Err(PortfolioError::ProviderFatal(
            self.name().to_string(),
            format!("{} does not provide financial statements", self.name()),
        ))
    }
}

/// Runs `f` up to `max_retries` times with `base_delay * 2^attempt` backoff
/// plus a small jitter term, retrying only on `ProviderTransient`. Any other
/// error, or a transient error on the last attempt, is returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    base_delay_secs: f64,
    symbol: &str,
    provider: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(PortfolioError::ProviderTransient(p, msg)) if attempt + 1 < max_retries => {
                let delay = base_delay_secs * 2f64.powi(attempt as i32) + jitter_secs();
                log::warn!(
                    "{symbol} {provider} request failed ({msg}), retrying in {delay:.2}s (attempt {}/{max_retries})",
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                attempt += 1;
                let _ = p;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Up to 250ms of jitter, mirroring the source yfinance adapter's
/// `random.uniform(0, 0.25)` term on top of its throttle wait.
fn jitter_secs() -> f64 {
    rand::thread_rng().gen_range(0.0..0.25)
}

const RATE_LIMIT_MARKERS: [&str; 2] = ["rate limit", "too many requests"];

fn has_rate_limit_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classifies a reqwest transport/status error per the source's
/// `_is_api_error_retryable`: timeouts, connect errors, 429, 502/503/504,
/// or a "rate limit"/"too many requests" marker in the error text.
pub fn classify_http_error(provider: &str, err: &reqwest::Error) -> PortfolioError {
    let transient = err.is_timeout()
        || err.is_connect()
        || err
            .status()
            .map(|s| matches!(s.as_u16(), 429 | 502 | 503 | 504))
            .unwrap_or(false)
        || has_rate_limit_marker(&err.to_string());
    if transient {
        PortfolioError::ProviderTransient(provider.to_string(), err.to_string())
    } else {
        PortfolioError::ProviderFatal(provider.to_string(), err.to_string())
    }
}

/// Classifies an HTTP response per status code, or — since a provider can
/// return a rate-limit notice on a 200/403 instead of 429 — by a
/// case-insensitive "rate limit"/"too many requests" marker in the body.
pub fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> PortfolioError {
    if matches!(status.as_u16(), 429 | 502 | 503 | 504) || has_rate_limit_marker(body) {
        PortfolioError::ProviderTransient(provider.to_string(), format!("HTTP {status}: {body}"))
    } else {
        PortfolioError::ProviderFatal(provider.to_string(), format!("HTTP {status}: {body}"))
    }
}

/// Per-adapter outbound-request spacing (spec.md §4.2: "no two outbound
/// requests from the same adapter closer than `min_interval`"). Grounded in
/// `security::check_rate_limit`'s `Instant`-based window tracking and in the
/// source yfinance adapter's `_throttle`, which waits out the remainder of
/// `min_interval` plus a small jitter before releasing the next request.
pub struct Throttle {
    min_interval: Duration,
    last: AsyncMutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval_secs: f64) -> Self {
        Self {
            min_interval: Duration::from_secs_f64(min_interval_secs.max(0.0)),
            last: AsyncMutex::new(None),
        }
    }

    /// Sleeps until `min_interval` has elapsed since the previous call
    /// returned, then records this call as the new reference point.
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed + Duration::from_secs_f64(jitter_secs())).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_treats_429_as_transient() {
        let e = classify_status("FINNHUB", reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(e, PortfolioError::ProviderTransient(_, _)));
    }

    #[test]
    fn classify_status_treats_rate_limit_body_as_transient() {
        let e = classify_status("YFINANCE", reqwest::StatusCode::FORBIDDEN, "Rate limit exceeded, try later");
        assert!(matches!(e, PortfolioError::ProviderTransient(_, _)));
    }

    #[test]
    fn classify_status_treats_too_many_requests_text_as_transient() {
        let e = classify_status("STOOQ", reqwest::StatusCode::OK, "Too Many Requests - slow down");
        assert!(matches!(e, PortfolioError::ProviderTransient(_, _)));
    }

    #[test]
    fn classify_status_treats_plain_4xx_as_fatal() {
        let e = classify_status("FINNHUB", reqwest::StatusCode::UNAUTHORIZED, "invalid api key");
        assert!(matches!(e, PortfolioError::ProviderFatal(_, _)));
    }
}
