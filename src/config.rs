//! Configuration management.
//!
//! Mirrors the original `DataServiceConfig` dataclass hierarchy
//! (`DownloaderConfig`, `DatabaseConfig`, `BatchConfig`,
//! `DataQualityConfig`) plus a `PipelineConfig` for the analytics
//! operators. Defaults match the Python source exactly; values are
//! loaded from an optional `stockfolio.toml` and then overridden by
//! environment variables, the same layering the teacher app uses for
//! `.env`-backed settings.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub timeout_secs: u64,
    pub rate_limit_delay_secs: f64,
    pub financial_refresh_days: i64,
    pub stock_incremental_threshold_days: i64,
    pub financial_downloader: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 30.0,
            timeout_secs: 120,
            rate_limit_delay_secs: 1.0,
            financial_refresh_days: 90,
            stock_incremental_threshold_days: 100,
            financial_downloader: "finnhub".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub db_path: String,
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_path: "stockfolio.db".to_string(),
            connection_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub delay_between_requests_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delay_between_requests_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataQualityConfig {
    pub min_data_points: u32,
    pub completeness_threshold: f64,
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            min_data_points: 100,
            completeness_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled_operators: Vec<String>,
    pub drop_alert_days: i64,
    pub drop_alert_threshold: f64,
    pub drop_alert_7d_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled_operators: vec!["ma".into(), "rsi".into(), "drop_alert".into()],
            drop_alert_days: 1,
            drop_alert_threshold: 15.0,
            drop_alert_7d_threshold: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub default_start_date: DefaultStartDate,
    pub downloader: DownloaderConfig,
    pub database: DatabaseConfig,
    pub batch: BatchConfig,
    pub quality: DataQualityConfig,
    pub pipeline: PipelineConfig,
}

/// Newtype so `Default` can supply the spec's `2000-01-01` literal while
/// still round-tripping through TOML as a plain string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultStartDate(pub String);

impl Default for DefaultStartDate {
    fn default() -> Self {
        DefaultStartDate("2000-01-01".to_string())
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                toml::from_str(&text)?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCKFOLIO_DB_PATH") {
            self.database.db_path = path;
        }
        if let Ok(v) = std::env::var("STOCKFOLIO_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.downloader.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("STOCKFOLIO_STOCK_INCREMENTAL_THRESHOLD_DAYS") {
            if let Ok(n) = v.parse() {
                self.downloader.stock_incremental_threshold_days = n;
            }
        }
        if let Ok(v) = std::env::var("STOCKFOLIO_FINANCIAL_REFRESH_DAYS") {
            if let Ok(n) = v.parse() {
                self.downloader.financial_refresh_days = n;
            }
        }
        if let Ok(v) = std::env::var("STOCKFOLIO_BATCH_DELAY_SECS") {
            if let Ok(n) = v.parse() {
                self.batch.delay_between_requests_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STOCKFOLIO_DEFAULT_START_DATE") {
            self.default_start_date = DefaultStartDate(v);
        }
    }

    pub fn finnhub_api_key() -> Option<String> {
        std::env::var("FINNHUB_API_KEY")
            .or_else(|_| std::env::var("FINNHUB_TOKEN"))
            .ok()
    }

    pub fn twelve_data_api_key() -> Option<String> {
        std::env::var("TWELVE_DATA_API_KEY").ok()
    }

    pub fn watchlist() -> Vec<String> {
        std::env::var("WATCHLIST")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.downloader.max_retries, 3);
        assert_eq!(cfg.downloader.stock_incremental_threshold_days, 100);
        assert_eq!(cfg.downloader.financial_refresh_days, 90);
        assert_eq!(cfg.default_start_date.0, "2000-01-01");
        assert_eq!(cfg.batch.delay_between_requests_secs, 2);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("STOCKFOLIO_MAX_RETRIES", "7");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.downloader.max_retries, 7);
        std::env::remove_var("STOCKFOLIO_MAX_RETRIES");
    }
}
