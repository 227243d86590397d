//! YFinance fallback downloader via Yahoo's public chart endpoint.
//!
//! Ported from `quotes::yahoo::fetch_historical`/`parse_historical_quotes`:
//! same `query1.finance.yahoo.com/v8/finance/chart` endpoint, unix-timestamp
//! range, and `chart.result[0].{timestamp, indicators.quote[0]}` shape.
//! Reserved as a fallback per spec.md §4.2 — the strategy selector never
//! reaches for it directly.

use super::{StockDownloader, Throttle};
use crate::error::{PortfolioError, Result};
use crate::models::PriceBar;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

pub struct YFinanceDownloader {
    client: Client,
    throttle: Throttle,
}

impl YFinanceDownloader {
    pub fn new(timeout_secs: u64, min_interval_secs: f64) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        );
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| PortfolioError::ProviderFatal("YFINANCE".into(), e.to_string()))?;
        Ok(Self { client, throttle: Throttle::new(min_interval_secs) })
    }
}

#[async_trait]
impl StockDownloader for YFinanceDownloader {
    fn name(&self) -> &'static str {
        "YFINANCE"
    }

    async fn fetch_stock_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let from_ts = start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let to_ts = end.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();
        let url = format!(
            "{BASE_URL}/{}?period1={from_ts}&period2={to_ts}&interval=1d&events=history",
            urlencoding::encode(symbol),
        );
        log::info!("downloading {symbol} from YFinance ({start}..{end})");

        self.throttle.wait().await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| super::classify_http_error("YFINANCE", &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::classify_http_error("YFINANCE", &e))?;
        if !status.is_success() {
            return Err(super::classify_status("YFINANCE", status, &body));
        }
        let data: Value = serde_json::from_str(&body)
            .map_err(|e| PortfolioError::ProviderFatal("YFINANCE".into(), e.to_string()))?;

        if let Some(err) = data.get("chart").and_then(|c| c.get("error")).filter(|e| !e.is_null()) {
            return Err(PortfolioError::ProviderFatal(
                "YFINANCE".into(),
                format!("{symbol}: {err}"),
            ));
        }
        parse_chart(symbol, &data)
    }
}

fn parse_chart(symbol: &str, data: &Value) -> Result<Vec<PriceBar>> {
    let chart = data
        .get("chart")
        .and_then(|c| c.get("result"))
        .and_then(|r| r.get(0))
        .ok_or_else(|| PortfolioError::ProviderFatal("YFINANCE".into(), "invalid response".into()))?;

    let timestamps = chart
        .get("timestamp")
        .and_then(Value::as_array)
        .ok_or_else(|| PortfolioError::ProviderFatal("YFINANCE".into(), "missing timestamps".into()))?;

    let quote = chart
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0))
        .ok_or_else(|| PortfolioError::ProviderFatal("YFINANCE".into(), "missing quote data".into()))?;
    let adj_close = chart
        .get("indicators")
        .and_then(|i| i.get("adjclose"))
        .and_then(|a| a.get(0))
        .and_then(|a| a.get("adjclose"))
        .and_then(Value::as_array);

    let get_series = |key: &str| -> Vec<Option<f64>> {
        quote
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(Value::as_f64).collect())
            .unwrap_or_default()
    };
    let opens = get_series("open");
    let highs = get_series("high");
    let lows = get_series("low");
    let closes = get_series("close");

    let mut bars = Vec::new();
    for (i, ts) in timestamps.iter().enumerate() {
        let Some(ts) = ts.as_i64() else { continue };
        let Some(date) = chrono::DateTime::from_timestamp(ts, 0).map(|d| d.date_naive()) else {
            continue;
        };
        let Some(close) = closes.get(i).copied().flatten() else {
            continue;
        };
        let to_dec = |v: Option<f64>| v.and_then(|v| Decimal::try_from(v).ok()).unwrap_or_default();
        let close_dec = Decimal::try_from(close).unwrap_or_default();
        let adj = adj_close
            .and_then(|a| a.get(i))
            .and_then(Value::as_f64)
            .and_then(|v| Decimal::try_from(v).ok())
            .unwrap_or(close_dec);

        bars.push(PriceBar {
            symbol: symbol.to_uppercase(),
            date,
            open: to_dec(opens.get(i).copied().flatten()),
            high: to_dec(highs.get(i).copied().flatten()),
            low: to_dec(lows.get(i).copied().flatten()),
            close: close_dec,
            adj_close: adj,
            volume: 0,
        });
    }
    if bars.is_empty() {
        return Err(PortfolioError::ProviderFatal(
            "YFINANCE".into(),
            format!("{symbol}: no historical data"),
        ));
    }
    Ok(bars)
}
