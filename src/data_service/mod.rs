//! Strategy selection: picks bulk vs incremental ingestion per symbol,
//! drives downloader → storage, and assesses data quality.
//!
//! Grounded in `original_source/stock_analysis/data/data_service.py`
//! (`download_and_store_stock_data`'s `raw_last` branching and Finnhub
//! -> Stooq fallback) and `.../data/models/quality_models.py`
//! (`DataQuality.assess_data_quality`'s weighted completeness score).

use crate::config::Config;
use crate::db::{DateRange, Storage};
use crate::downloaders::{finnhub::FinnhubDownloader, stooq::StooqDownloader, StockDownloader};
use crate::error::{PortfolioError, Result};
use crate::models::DownloadStatus;
use chrono::{NaiveDate, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    SkipAlreadyCurrent,
    StooqBulk,
    FinnhubIncremental,
    StooqIncrementalFallback,
    StooqBulkThresholdExceeded,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SkipAlreadyCurrent => "skip_already_current",
            Strategy::StooqBulk => "stooq_bulk",
            Strategy::FinnhubIncremental => "finnhub_incremental",
            Strategy::StooqIncrementalFallback => "stooq_incremental_fallback",
            Strategy::StooqBulkThresholdExceeded => "stooq_bulk_threshold_exceeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub symbol: String,
    pub success: bool,
    pub no_new_data: bool,
    pub used_strategy: Option<Strategy>,
    pub data_points: usize,
    pub error: Option<String>,
}

pub struct DataService<'a> {
    storage: &'a Storage,
    config: &'a Config,
    stooq: StooqDownloader,
    finnhub: Option<FinnhubDownloader>,
}

impl<'a> DataService<'a> {
    pub fn new(storage: &'a Storage, config: &'a Config) -> Result<Self> {
        let min_interval = config.downloader.rate_limit_delay_secs;
        let stooq = StooqDownloader::new(config.downloader.timeout_secs, min_interval)?;
        let finnhub = Config::finnhub_api_key()
            .map(|key| FinnhubDownloader::new(key, config.downloader.timeout_secs, min_interval))
            .transpose()?;
        Ok(Self {
            storage,
            config,
            stooq,
            finnhub,
        })
    }

    /// Mirrors `download_and_store_stock_data`'s branch on `raw_last`.
    pub async fn download_and_store_stock_data(
        &self,
        symbol: &str,
        start_date: Option<NaiveDate>,
    ) -> Result<IngestResult> {
        self.storage.upsert_stock(symbol, None)?;
        let raw_last = self.storage.get_last_price_date(symbol)?;
        let today = Utc::now().date_naive();

        if let Some(last) = raw_last {
            if last >= today {
                self.storage.record_download_log(symbol, "stock_price", DownloadStatus::Skipped, 0, None)?;
                return Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: true,
                    no_new_data: true,
                    used_strategy: Some(Strategy::SkipAlreadyCurrent),
                    data_points: 0,
                    error: None,
                });
            }
        }

        let default_start = NaiveDate::parse_from_str(&self.config.default_start_date.0, "%Y-%m-%d")
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        let actual_start = match raw_last {
            Some(last) => last.succ_opt().unwrap_or(last),
            None => start_date.unwrap_or(default_start),
        };

        let (strategy, bars) = match raw_last {
            None => {
                let bars = self.stooq.fetch_stock_data(symbol, actual_start, today).await;
                (Strategy::StooqBulk, bars)
            }
            Some(last) => {
                let days_since = (today - last).num_days();
                if days_since <= self.config.downloader.stock_incremental_threshold_days {
                    match &self.finnhub {
                        Some(finnhub) => {
                            match self.run_with_retries("FINNHUB", symbol, || {
                                finnhub.fetch_stock_data(symbol, actual_start, today)
                            })
                            .await
                            {
                                Ok(bars) => (Strategy::FinnhubIncremental, Ok(bars)),
                                Err(e) => {
                                    log::warn!("{symbol}: Finnhub incremental failed ({e}), falling back to Stooq");
                                    let bars = self.stooq.fetch_stock_data(symbol, actual_start, today).await;
                                    (Strategy::StooqIncrementalFallback, bars)
                                }
                            }
                        }
                        None => {
                            let bars = self.stooq.fetch_stock_data(symbol, actual_start, today).await;
                            (Strategy::StooqIncrementalFallback, bars)
                        }
                    }
                } else {
                    let bars = self.stooq.fetch_stock_data(symbol, actual_start, today).await;
                    (Strategy::StooqBulkThresholdExceeded, bars)
                }
            }
        };

        match bars {
            Ok(bars) => {
                let n = self.storage.store_price_bars(symbol, &bars)?;
                self.storage.record_download_log(
                    symbol,
                    "stock_price",
                    DownloadStatus::Success,
                    n as i64,
                    None,
                )?;
                Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: true,
                    no_new_data: n == 0,
                    used_strategy: Some(strategy),
                    data_points: n,
                    error: None,
                })
            }
            Err(e) => {
                self.storage.record_download_log(
                    symbol,
                    "stock_price",
                    DownloadStatus::Failed,
                    0,
                    Some(&e.to_string()),
                )?;
                Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: false,
                    no_new_data: false,
                    used_strategy: Some(strategy),
                    data_points: 0,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    async fn run_with_retries<T, F, Fut>(&self, provider: &str, symbol: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        crate::downloaders::retry_with_backoff(
            self.config.downloader.max_retries,
            self.config.downloader.base_delay_secs,
            symbol,
            provider,
            f,
        )
        .await
    }

    /// Refreshes financial statements unless the latest stored period is
    /// within `financial_refresh_days` of today.
    pub async fn download_and_store_financial_data(&self, symbol: &str) -> Result<IngestResult> {
        self.storage.upsert_stock(symbol, None)?;
        let today = Utc::now().date_naive();
        if let Some(last_period) = self.storage.get_last_financial_period(symbol)? {
            let age_days = (today - last_period).num_days();
            if age_days <= self.config.downloader.financial_refresh_days {
                return Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: true,
                    no_new_data: true,
                    used_strategy: None,
                    data_points: 0,
                    error: None,
                });
            }
        }

        let Some(finnhub) = &self.finnhub else {
            return Err(PortfolioError::ProviderFatal(
                "FINNHUB".into(),
                "financial downloader requires FINNHUB_API_KEY".into(),
            ));
        };
        match finnhub.fetch_financial_data(symbol).await {
            Ok((stock, statements)) if !statements.is_empty() => {
                if let Some(meta) = &stock {
                    self.storage.upsert_stock(symbol, Some(meta))?;
                }
                let n = self.storage.store_financial_statements(symbol, &statements)?;
                self.storage.record_download_log(
                    symbol,
                    "financial_statements",
                    DownloadStatus::Success,
                    n as i64,
                    None,
                )?;
                Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: true,
                    no_new_data: false,
                    used_strategy: None,
                    data_points: n,
                    error: None,
                })
            }
            Ok(_) => {
                let err = format!("{symbol}: empty financial statement set, not written");
                self.storage.record_download_log(
                    symbol,
                    "financial_statements",
                    DownloadStatus::Failed,
                    0,
                    Some(&err),
                )?;
                Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: false,
                    no_new_data: false,
                    used_strategy: None,
                    data_points: 0,
                    error: Some(err),
                })
            }
            Err(e) => {
                self.storage.record_download_log(
                    symbol,
                    "financial_statements",
                    DownloadStatus::Failed,
                    0,
                    Some(&e.to_string()),
                )?;
                Ok(IngestResult {
                    symbol: symbol.to_string(),
                    success: false,
                    no_new_data: false,
                    used_strategy: None,
                    data_points: 0,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Iterates `symbols` with a fixed inter-request delay; per-symbol
    /// failures never abort the batch.
    pub async fn batch_download(&self, symbols: &[String]) -> BatchResult {
        let mut results = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            let result = self.download_and_store_stock_data(symbol, None).await;
            results.push(result.unwrap_or_else(|e| IngestResult {
                symbol: symbol.clone(),
                success: false,
                no_new_data: false,
                used_strategy: None,
                data_points: 0,
                error: Some(e.to_string()),
            }));
            if i + 1 < symbols.len() {
                tokio::time::sleep(Duration::from_secs(
                    self.config.batch.delay_between_requests_secs,
                ))
                .await;
            }
        }
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        BatchResult {
            total: results.len(),
            successful,
            failed,
            results,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<IngestResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
    F,
}

impl QualityGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGrade::A => "A",
            QualityGrade::B => "B",
            QualityGrade::C => "C",
            QualityGrade::D => "D",
            QualityGrade::F => "F",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataQuality {
    pub data_completeness: f64,
    pub grade: QualityGrade,
}

/// Pure function: `0.6*stock_completeness + 0.4*financial_completeness`.
pub fn assess_data_quality(stock_points: usize, min_points: u32, has_financials: bool) -> DataQuality {
    let stock_completeness = if min_points == 0 {
        1.0
    } else {
        (stock_points as f64 / min_points as f64).min(1.0)
    };
    let financial_completeness = if has_financials { 1.0 } else { 0.0 };
    let data_completeness = 0.6 * stock_completeness + 0.4 * financial_completeness;
    let grade = match data_completeness {
        x if x >= 0.9 => QualityGrade::A,
        x if x >= 0.7 => QualityGrade::B,
        x if x >= 0.5 => QualityGrade::C,
        x if x >= 0.3 => QualityGrade::D,
        _ => QualityGrade::F,
    };
    DataQuality {
        data_completeness,
        grade,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_grade_thresholds_match_spec() {
        assert_eq!(assess_data_quality(100, 100, true).grade, QualityGrade::A);
        assert_eq!(assess_data_quality(0, 100, false).grade, QualityGrade::F);
        let q = assess_data_quality(50, 100, true);
        assert!((q.data_completeness - 0.7).abs() < 1e-9);
        assert_eq!(q.grade, QualityGrade::B);
    }
}
