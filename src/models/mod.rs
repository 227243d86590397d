//! Core entities shared by storage, ledger and analytics.
//!
//! Modeled as tagged records rather than the dict-shaped rows the source
//! system passes around; sum types (`Result<T, PortfolioError>`) carry
//! failures instead of `{error: ...}` maps.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tolerance used for all quantity comparisons (§4.5, §8).
pub fn qty_epsilon() -> Decimal {
    Decimal::new(1, 4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<Decimal>,
    pub employees: Option<i64>,
    pub description: Option<String>,
}

impl Stock {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            company_name: None,
            sector: None,
            industry: None,
            market_cap: None,
            employees: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Close,
    AdjClose,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

impl PriceBar {
    /// Validates the OHLC invariants from §3: `low <= min(open,close)`,
    /// `high >= max(open,close)`, all prices positive.
    pub fn validate(&self) -> crate::error::Result<()> {
        let zero = Decimal::ZERO;
        if self.open <= zero || self.high <= zero || self.low <= zero || self.close <= zero {
            return Err(crate::error::PortfolioError::Validation(format!(
                "{} {}: all prices must be > 0",
                self.symbol, self.date
            )));
        }
        if self.low > self.open.min(self.close) {
            return Err(crate::error::PortfolioError::Validation(format!(
                "{} {}: low must be <= min(open,close)",
                self.symbol, self.date
            )));
        }
        if self.high < self.open.max(self.close) {
            return Err(crate::error::PortfolioError::Validation(format!(
                "{} {}: high must be >= max(open,close)",
                self.symbol, self.date
            )));
        }
        if self.volume < 0 {
            return Err(crate::error::PortfolioError::Validation(format!(
                "{} {}: volume must be >= 0",
                self.symbol, self.date
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    IncomeStatement,
    BalanceSheet,
    CashFlow,
}

impl StatementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::IncomeStatement => "income_statement",
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "income_statement" => Some(StatementType::IncomeStatement),
            "balance_sheet" => Some(StatementType::BalanceSheet),
            "cash_flow" => Some(StatementType::CashFlow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub symbol: String,
    pub statement_type: StatementType,
    pub period: NaiveDate,
    pub metric_name: String,
    pub metric_value: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(TransactionType::Buy),
            "SELL" => Some(TransactionType::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub external_id: Option<String>,
    pub symbol: String,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
    pub platform: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Dividend-reinvestment lots are tagged with this substring in `notes`
/// per the observed (not structured) convention; see Open Question in
/// spec.md §9.
pub const DRIP_MARKER: &str = "Dividend Reinvestment";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLot {
    pub id: i64,
    pub symbol: String,
    pub transaction_id: i64,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub cost_basis: Decimal,
    pub purchase_date: NaiveDate,
    pub is_closed: bool,
    pub notes: Option<String>,
}

impl PositionLot {
    pub fn is_drip(&self) -> bool {
        self.notes
            .as_deref()
            .map(|n| n.contains(DRIP_MARKER))
            .unwrap_or(false)
    }

    pub fn total_cost(&self) -> Decimal {
        self.remaining_quantity * self.cost_basis
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleAllocation {
    pub id: i64,
    pub sale_transaction_id: i64,
    pub lot_id: i64,
    pub quantity_sold: Decimal,
    pub cost_basis: Decimal,
    pub sale_price: Decimal,
    pub realized_pnl: Decimal,
}

impl SaleAllocation {
    pub fn new(
        sale_transaction_id: i64,
        lot_id: i64,
        quantity_sold: Decimal,
        cost_basis: Decimal,
        sale_price: Decimal,
    ) -> Self {
        let realized_pnl = (sale_price - cost_basis) * quantity_sold;
        Self {
            id: 0,
            sale_transaction_id,
            lot_id,
            quantity_sold,
            cost_basis,
            sale_price,
            realized_pnl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPnL {
    pub symbol: String,
    pub valuation_date: NaiveDate,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub realized_pnl: Decimal,
    pub realized_pnl_pct: Decimal,
    pub total_cost: Decimal,
    pub price_date: Option<NaiveDate>,
    pub is_stale_price: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    Success,
    Failed,
    Skipped,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Success => "success",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLog {
    pub id: i64,
    pub symbol: String,
    pub download_type: String,
    pub status: DownloadStatus,
    pub data_points: i64,
    pub error_message: Option<String>,
    pub details: Option<String>,
    pub download_timestamp: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_bar_rejects_non_positive_prices() {
        let bar = PriceBar {
            symbol: "AAPL".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            open: dec!(0),
            high: dec!(10),
            low: dec!(1),
            close: dec!(5),
            adj_close: dec!(5),
            volume: 100,
        };
        assert!(bar.validate().is_err());
    }

    #[test]
    fn price_bar_rejects_bad_low_high() {
        let mut bar = PriceBar {
            symbol: "AAPL".into(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            open: dec!(10),
            high: dec!(12),
            low: dec!(11),
            close: dec!(10),
            adj_close: dec!(10),
            volume: 100,
        };
        assert!(bar.validate().is_err(), "low > min(open,close)");
        bar.low = dec!(9);
        bar.high = dec!(9);
        assert!(bar.validate().is_err(), "high < max(open,close)");
    }

    #[test]
    fn drip_detection_uses_notes_substring() {
        let lot = PositionLot {
            id: 1,
            symbol: "AAPL".into(),
            transaction_id: 1,
            original_quantity: dec!(1),
            remaining_quantity: dec!(1),
            cost_basis: dec!(1),
            purchase_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            is_closed: false,
            notes: Some("Dividend Reinvestment on 2024-01-01".into()),
        };
        assert!(lot.is_drip());
    }

    #[test]
    fn sale_allocation_computes_realized_pnl() {
        let alloc = SaleAllocation::new(1, 1, dec!(10), dec!(100), dec!(110));
        assert_eq!(alloc.realized_pnl, dec!(100));
    }
}
