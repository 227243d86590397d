//! Read-side adapters over [`Storage`] shaped for analytics consumption.
//!
//! Grounded in `original_source/stock_analysis/analysis/data/{price_repository,
//! financial_repository}.py`: a price repository normalizing OHLCV rows into
//! a time-indexed frame, and a financial repository pivoting raw statement
//! rows into a metric×period table. Both are thin, read-only wrappers; they
//! carry no caching beyond what `Storage` itself does, since this is a
//! single-process, single-user system per spec.md §5.

use crate::db::{DateRange, Storage};
use crate::error::Result;
use crate::models::{FinancialStatement, PriceBar, StatementType};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl From<TimeRange> for DateRange {
    fn from(r: TimeRange) -> Self {
        DateRange { start: r.start, end: r.end }
    }
}

/// Time-indexed OHLCV frame: one row per trading day, ascending by date.
#[derive(Debug, Clone, Default)]
pub struct OhlcvFrame {
    pub rows: Vec<PriceBar>,
}

impl OhlcvFrame {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn closes(&self) -> Vec<rust_decimal::Decimal> {
        self.rows.iter().map(|r| r.close).collect()
    }
}

pub struct PriceRepository<'a> {
    storage: &'a Storage,
}

impl<'a> PriceRepository<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub fn exists(&self, symbol: &str) -> Result<bool> {
        Ok(self.storage.get_last_price_date(symbol)?.is_some())
    }

    pub fn get_ohlcv(&self, symbol: &str, range: TimeRange) -> Result<OhlcvFrame> {
        let rows = self.storage.get_stock_data(symbol, range.into())?;
        Ok(OhlcvFrame { rows })
    }
}

/// `metric_name -> (period -> value)`, pivoted from the row-shaped
/// statement table, newest period last (ascending, matching storage order).
#[derive(Debug, Clone, Default)]
pub struct FinancialPivot {
    pub periods: Vec<NaiveDate>,
    pub metrics: BTreeMap<String, Vec<Option<rust_decimal::Decimal>>>,
}

impl FinancialPivot {
    pub fn latest_period(&self) -> Option<NaiveDate> {
        self.periods.last().copied()
    }

    pub fn latest(&self, metric: &str) -> Option<rust_decimal::Decimal> {
        self.metrics.get(metric).and_then(|v| v.last().copied().flatten())
    }
}

pub struct FinancialRepository<'a> {
    storage: &'a Storage,
}

impl<'a> FinancialRepository<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub fn get_statements(
        &self,
        symbol: &str,
        statement_type: StatementType,
    ) -> Result<Vec<FinancialStatement>> {
        self.storage.get_financial_pivot(symbol, statement_type)
    }

    pub fn get_pivot(&self, symbol: &str, statement_type: StatementType) -> Result<FinancialPivot> {
        let rows = self.get_statements(symbol, statement_type)?;
        let mut periods: Vec<NaiveDate> = rows.iter().map(|r| r.period).collect();
        periods.sort();
        periods.dedup();

        let mut metrics: BTreeMap<String, Vec<Option<rust_decimal::Decimal>>> = BTreeMap::new();
        for row in &rows {
            let idx = periods.iter().position(|p| *p == row.period).unwrap();
            let slot = metrics
                .entry(row.metric_name.clone())
                .or_insert_with(|| vec![None; periods.len()]);
            slot[idx] = row.metric_value;
        }
        Ok(FinancialPivot { periods, metrics })
    }
}
