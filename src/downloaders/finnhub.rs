//! Finnhub downloader: incremental daily candles plus financial statements.
//!
//! Candle parsing follows `quotes::finnhub` almost verbatim (parallel
//! `t,o,h,l,c,v` arrays, `s == "ok"` guard). Financial-statement parsing is
//! new: grounded in `original_source/.../downloaders/finnhub.py`'s
//! `_parse_reported_rows`, which walks `/stock/financials-reported`'s
//! `data[{year, period, endDate, report: {ic, bs, cf}}]` rows, newest
//! period first, building one `{metric_name: value}` map per statement
//! type. `/stock/profile2` fills in `Stock` metadata; failure there is
//! non-fatal, matching the Python adapter's "best effort" profile call.

use super::{StockDownloader, Throttle};
use crate::error::{PortfolioError, Result};
use crate::models::{FinancialStatement, PriceBar, Stock, StatementType};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const BASE_URL: &str = "https://finnhub.io/api/v1";

pub struct FinnhubDownloader {
    client: Client,
    api_key: String,
    throttle: Throttle,
}

impl FinnhubDownloader {
    pub fn new(api_key: String, timeout_secs: u64, min_interval_secs: f64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PortfolioError::ProviderFatal("FINNHUB".into(), e.to_string()))?;
        Ok(Self { client, api_key, throttle: Throttle::new(min_interval_secs) })
    }

    fn require_key(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(PortfolioError::ProviderFatal(
                "FINNHUB".into(),
                "missing Finnhub API key (FINNHUB_API_KEY / FINNHUB_TOKEN)".into(),
            ));
        }
        Ok(())
    }

    async fn get_json(&self, path: &str, extra: &[(&str, String)]) -> Result<Value> {
        let mut url = format!("{BASE_URL}/{path}?token={}", self.api_key);
        for (k, v) in extra {
            url.push_str(&format!("&{k}={}", urlencoding::encode(v)));
        }
        self.throttle.wait().await;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| super::classify_http_error("FINNHUB", &e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| super::classify_http_error("FINNHUB", &e))?;
        if !status.is_success() {
            return Err(super::classify_status("FINNHUB", status, &body));
        }
        serde_json::from_str(&body)
            .map_err(|e| PortfolioError::ProviderFatal("FINNHUB".into(), e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    c: Option<Vec<f64>>,
    h: Option<Vec<f64>>,
    l: Option<Vec<f64>>,
    o: Option<Vec<f64>>,
    t: Option<Vec<i64>>,
    v: Option<Vec<i64>>,
    s: String,
}

#[async_trait]
impl StockDownloader for FinnhubDownloader {
    fn name(&self) -> &'static str {
        "FINNHUB"
    }

    async fn fetch_stock_data(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PriceBar>> {
        self.require_key()?;
        let from_ts = start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        let to_ts = end.and_hms_opt(23, 59, 59).unwrap().and_utc().timestamp();

        log::info!("downloading {symbol} from Finnhub ({start}..{end})");
        let value = self
            .get_json(
                "stock/candle",
                &[
                    ("symbol", symbol.to_string()),
                    ("resolution", "D".to_string()),
                    ("from", from_ts.to_string()),
                    ("to", to_ts.to_string()),
                ],
            )
            .await?;
        let data: CandleResponse = serde_json::from_value(value)
            .map_err(|e| PortfolioError::ProviderFatal("FINNHUB".into(), e.to_string()))?;

        if data.s != "ok" {
            return Err(PortfolioError::ProviderFatal(
                "FINNHUB".into(),
                format!("candle status for {symbol}: {}", data.s),
            ));
        }
        let t = data
            .t
            .ok_or_else(|| PortfolioError::ProviderFatal("FINNHUB".into(), format!("{symbol}: no price data")))?;
        if t.is_empty() {
            return Err(PortfolioError::ProviderFatal(
                "FINNHUB".into(),
                format!("{symbol}: no price data"),
            ));
        }
        let o = data.o.unwrap_or_default();
        let h = data.h.unwrap_or_default();
        let l = data.l.unwrap_or_default();
        let c = data.c.unwrap_or_default();
        let v = data.v.unwrap_or_default();

        let mut bars = Vec::with_capacity(t.len());
        for (i, ts) in t.iter().enumerate() {
            let date = chrono::DateTime::from_timestamp(*ts, 0)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    PortfolioError::ProviderFatal("FINNHUB".into(), format!("bad timestamp {ts}"))
                })?;
            let close = *c.get(i).ok_or_else(|| {
                PortfolioError::ProviderFatal("FINNHUB".into(), "missing close".into())
            })?;
            bars.push(PriceBar {
                symbol: symbol.to_uppercase(),
                date,
                open: Decimal::try_from(*o.get(i).unwrap_or(&close)).unwrap_or_default(),
                high: Decimal::try_from(*h.get(i).unwrap_or(&close)).unwrap_or_default(),
                low: Decimal::try_from(*l.get(i).unwrap_or(&close)).unwrap_or_default(),
                close: Decimal::try_from(close).unwrap_or_default(),
                adj_close: Decimal::try_from(close).unwrap_or_default(),
                volume: *v.get(i).unwrap_or(&0),
            });
        }
        Ok(bars)
    }

    async fn fetch_financial_data(
        &self,
        symbol: &str,
    ) -> Result<(Option<Stock>, Vec<FinancialStatement>)> {
        self.require_key()?;

        let profile = self
            .get_json("stock/profile2", &[("symbol", symbol.to_string())])
            .await
            .unwrap_or(Value::Null);
        let stock = if profile.is_object() {
            Some(Stock {
                symbol: symbol.to_uppercase(),
                company_name: profile.get("name").and_then(Value::as_str).map(str::to_string),
                sector: profile
                    .get("finnhubIndustry")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                industry: profile
                    .get("finnhubIndustry")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                market_cap: profile
                    .get("marketCapitalization")
                    .and_then(Value::as_f64)
                    .and_then(|v| Decimal::try_from(v).ok()),
                employees: profile
                    .get("employeeTotal")
                    .and_then(Value::as_f64)
                    .map(|v| v as i64),
                description: profile.get("weburl").and_then(Value::as_str).map(str::to_string),
            })
        } else {
            None
        };

        let reported = self
            .get_json("stock/financials-reported", &[("symbol", symbol.to_string())])
            .await?;
        let rows = reported
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let statements = parse_reported_rows(symbol, &rows)?;
        if statements.is_empty() {
            return Err(PortfolioError::ProviderFatal(
                "FINNHUB".into(),
                format!("{symbol}: empty financial statements"),
            ));
        }
        Ok((stock, statements))
    }
}

fn row_end_date(row: &Value) -> Option<NaiveDate> {
    for key in ["endDate", "reportDate", "period"] {
        if let Some(s) = row.get(key).and_then(Value::as_str) {
            if s.len() >= 10 {
                if let Ok(d) = NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d") {
                    return Some(d);
                }
            }
        }
    }
    let year = row.get("year").and_then(Value::as_i64)?;
    NaiveDate::from_ymd_opt(year as i32, 12, 31)
}

fn parse_reported_rows(symbol: &str, rows: &[Value]) -> Result<Vec<FinancialStatement>> {
    let sections = [
        ("ic", StatementType::IncomeStatement),
        ("bs", StatementType::BalanceSheet),
        ("cf", StatementType::CashFlow),
    ];
    let mut statements = Vec::new();

    for row in rows {
        let period = match row_end_date(row) {
            Some(d) => d,
            None => continue,
        };
        let report = row.get("report");
        for (key, statement_type) in sections {
            let Some(entries) = report.and_then(|r| r.get(key)).and_then(Value::as_array) else {
                continue;
            };
            for entry in entries {
                let name = entry
                    .get("label")
                    .or_else(|| entry.get("concept"))
                    .or_else(|| entry.get("field"))
                    .or_else(|| entry.get("name"))
                    .and_then(Value::as_str);
                let Some(name) = name else { continue };
                let value = entry
                    .get("value")
                    .and_then(Value::as_f64)
                    .and_then(|v| Decimal::try_from(v).ok());
                statements.push(FinancialStatement {
                    symbol: symbol.to_uppercase(),
                    statement_type,
                    period,
                    metric_name: name.to_string(),
                    metric_value: value,
                });
            }
        }
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reported_rows_builds_one_statement_per_metric_per_period() {
        let rows: Vec<Value> = serde_json::from_str(
            r#"[{"year":2023,"endDate":"2023-12-31","report":{"ic":[{"label":"Revenue","value":100.0}]}}]"#,
        )
        .unwrap();
        let stmts = parse_reported_rows("AAPL", &rows).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].statement_type, StatementType::IncomeStatement);
        assert_eq!(stmts[0].metric_name, "Revenue");
    }

    #[test]
    fn row_end_date_falls_back_to_year() {
        let row: Value = serde_json::from_str(r#"{"year":2022}"#).unwrap();
        assert_eq!(row_end_date(&row), NaiveDate::from_ymd_opt(2022, 12, 31));
    }
}
