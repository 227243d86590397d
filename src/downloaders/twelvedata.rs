//! Twelve Data fallback downloader.
//!
//! Ported from `quotes::twelvedata`: same `time_series` endpoint and
//! `{meta, values:[{datetime,open,high,low,close,volume}]}` response shape,
//! and the same Yahoo-style-suffix-to-exchange-code `convert_symbol` table.
//! Reserved as a fallback per spec.md §4.2.

use super::{StockDownloader, Throttle};
use crate::error::{PortfolioError, Result};
use crate::models::PriceBar;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

const BASE_URL: &str = "https://api.twelvedata.com";

pub struct TwelveDataDownloader {
    client: Client,
    api_key: String,
    throttle: Throttle,
}

impl TwelveDataDownloader {
    pub fn new(api_key: String, timeout_secs: u64, min_interval_secs: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PortfolioError::ProviderFatal("TWELVEDATA".into(), e.to_string()))?;
        Ok(Self { client, api_key, throttle: Throttle::new(min_interval_secs) })
    }
}

/// `NESN.SW` -> `NESN:SIX`, `AAPL` unchanged (unrecognized suffixes pass
/// through verbatim rather than being stripped).
pub fn convert_symbol(symbol: &str) -> String {
    let Some(pos) = symbol.rfind('.') else {
        return symbol.to_string();
    };
    let base = &symbol[..pos];
    let suffix = &symbol[pos + 1..];
    let exchange = match suffix.to_uppercase().as_str() {
        "SW" => "SIX",
        "DE" => "XETR",
        "F" => "FSX",
        "PA" => "XPAR",
        "AS" => "XAMS",
        "MI" => "XMIL",
        "MC" => "XMAD",
        "L" => "LSE",
        "TO" => "TSX",
        "AX" => "ASX",
        "HK" => "HKEX",
        _ => return symbol.to_string(),
    };
    format!("{base}:{exchange}")
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    values: Option<Vec<TimeSeriesValue>>,
    code: Option<i32>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

#[async_trait]
impl StockDownloader for TwelveDataDownloader {
    fn name(&self) -> &'static str {
        "TWELVEDATA"
    }

    async fn fetch_stock_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        if self.api_key.trim().is_empty() {
            return Err(PortfolioError::ProviderFatal(
                "TWELVEDATA".into(),
                "missing TWELVE_DATA_API_KEY".into(),
            ));
        }
        let wire_symbol = convert_symbol(symbol);
        let url = format!(
            "{BASE_URL}/time_series?symbol={}&interval=1day&start_date={}&end_date={}&apikey={}",
            wire_symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
            self.api_key,
        );
        log::info!("downloading {symbol} from Twelve Data ({start}..{end})");

        self.throttle.wait().await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| super::classify_http_error("TWELVEDATA", &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::classify_http_error("TWELVEDATA", &e))?;
        if !status.is_success() {
            return Err(super::classify_status("TWELVEDATA", status, &body));
        }
        let data: TimeSeriesResponse = serde_json::from_str(&body)
            .map_err(|e| PortfolioError::ProviderFatal("TWELVEDATA".into(), e.to_string()))?;

        if let Some(code) = data.code {
            let msg = data.message.unwrap_or_else(|| format!("error code {code}"));
            return Err(PortfolioError::ProviderFatal("TWELVEDATA".into(), msg));
        }
        let values = data.values.ok_or_else(|| {
            PortfolioError::ProviderFatal("TWELVEDATA".into(), format!("{symbol}: no time series data"))
        })?;

        let mut bars: Vec<PriceBar> = values
            .iter()
            .filter_map(|v| {
                let date = NaiveDate::parse_from_str(&v.datetime, "%Y-%m-%d").ok()?;
                Some(PriceBar {
                    symbol: symbol.to_uppercase(),
                    date,
                    open: Decimal::from_str(&v.open).ok()?,
                    high: Decimal::from_str(&v.high).ok()?,
                    low: Decimal::from_str(&v.low).ok()?,
                    close: Decimal::from_str(&v.close).ok()?,
                    adj_close: Decimal::from_str(&v.close).ok()?,
                    volume: v.volume.as_ref().and_then(|s| s.parse().ok()).unwrap_or(0),
                })
            })
            .collect();
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_symbol_maps_known_suffixes() {
        assert_eq!(convert_symbol("NESN.SW"), "NESN:SIX");
        assert_eq!(convert_symbol("BMW.DE"), "BMW:XETR");
        assert_eq!(convert_symbol("AAPL"), "AAPL");
    }
}
