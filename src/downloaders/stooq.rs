//! Stooq downloader: full daily OHLCV history, no financials.
//!
//! Grounded in `original_source/.../downloaders/stooq.py`, which fetches
//! through `pandas_datareader`'s `stooq` backend; that backend itself pulls
//! `https://stooq.com/q/d/l/?s=<symbol>.us&i=d`, a plain CSV endpoint, which
//! is what's used directly here. Also borrows the Yahoo adapter's
//! `create_client`/error-logging shape from `quotes::yahoo`.

use super::{StockDownloader, Throttle};
use crate::error::{PortfolioError, Result};
use crate::models::{FinancialStatement, PriceBar, Stock};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

const BASE_URL: &str = "https://stooq.com/q/d/l/";

pub struct StooqDownloader {
    client: Client,
    throttle: Throttle,
}

impl StooqDownloader {
    pub fn new(timeout_secs: u64, min_interval_secs: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PortfolioError::ProviderFatal("STOOQ".into(), e.to_string()))?;
        Ok(Self { client, throttle: Throttle::new(min_interval_secs) })
    }

    /// `AAPL` -> `aapl.us`; symbols that already carry a suffix pass through.
    fn wire_symbol(symbol: &str) -> String {
        let lower = symbol.to_lowercase();
        if lower.ends_with(".us") {
            lower
        } else {
            format!("{lower}.us")
        }
    }
}

#[async_trait]
impl StockDownloader for StooqDownloader {
    fn name(&self) -> &'static str {
        "STOOQ"
    }

    async fn fetch_stock_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        let wire_symbol = Self::wire_symbol(symbol);
        let url = format!(
            "{BASE_URL}?s={}&d1={}&d2={}&i=d",
            urlencoding::encode(&wire_symbol),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        );
        log::info!("downloading {symbol} from Stooq ({start}..{end})");

        self.throttle.wait().await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| super::classify_http_error("STOOQ", &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::classify_http_error("STOOQ", &e))?;
        if !status.is_success() {
            return Err(super::classify_status("STOOQ", status, &body));
        }
        if body.trim() == "No data" || body.trim().is_empty() {
            return Err(PortfolioError::ProviderFatal(
                "STOOQ".into(),
                format!("no historical data for {symbol}"),
            ));
        }

        parse_csv(symbol, &body)
    }
}

/// Stooq's CSV header is `Date,Open,High,Low,Close,Volume`; close doubles
/// as adjusted close since Stooq's series is already split/dividend
/// adjusted (mirrors the Python adapter's `adj_close = close` choice).
fn parse_csv(symbol: &str, body: &str) -> Result<Vec<PriceBar>> {
    let mut lines = body.lines();
    let header = lines.next().unwrap_or_default();
    if !header.starts_with("Date,") {
        return Err(PortfolioError::ProviderFatal(
            "STOOQ".into(),
            format!("unexpected Stooq CSV header: {header}"),
        ));
    }

    let mut bars = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() < 6 {
            continue;
        }
        let date = NaiveDate::parse_from_str(cols[0], "%Y-%m-%d")
            .map_err(|e| PortfolioError::ProviderFatal("STOOQ".into(), e.to_string()))?;
        let parse = |s: &str| -> Result<Decimal> {
            Decimal::from_str(s)
                .map_err(|e| PortfolioError::ProviderFatal("STOOQ".into(), format!("{s}: {e}")))
        };
        let open = parse(cols[1])?;
        let high = parse(cols[2])?;
        let low = parse(cols[3])?;
        let close = parse(cols[4])?;
        let volume: i64 = cols[5].parse().unwrap_or(0);

        bars.push(PriceBar {
            symbol: symbol.to_uppercase(),
            date,
            open,
            high,
            low,
            close,
            adj_close: close,
            volume,
        });
    }
    if bars.is_empty() {
        return Err(PortfolioError::ProviderFatal(
            "STOOQ".into(),
            format!("no historical data for {symbol}"),
        ));
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_symbol_appends_us_suffix() {
        assert_eq!(StooqDownloader::wire_symbol("AAPL"), "aapl.us");
        assert_eq!(StooqDownloader::wire_symbol("aapl.US"), "aapl.us");
    }

    #[test]
    fn parse_csv_reads_ohlcv_rows() {
        let csv = "Date,Open,High,Low,Close,Volume\n2024-01-10,150.0,152.5,149.0,151.0,1000000\n";
        let bars = parse_csv("AAPL", csv).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, Decimal::from_str("151.0").unwrap());
        assert_eq!(bars[0].adj_close, bars[0].close);
    }

    #[test]
    fn parse_csv_rejects_no_data_marker() {
        assert!(parse_csv("ZZZZ", "No data").is_err());
    }
}
