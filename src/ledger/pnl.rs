//! Daily P&L valuation: per-symbol, per-date unrealized/realized P&L from
//! active lots and a resolved market price.
//!
//! Grounded in `original_source/stock_analysis/trading/services/pnl_calculator.py`
//! (`PnLCalculator.calculate_daily_pnl`'s stale-price fallback and the
//! placeholder-completion path run after a BUY/SELL writes a zeroed row).

use crate::db::{DateRange, Storage};
use crate::error::Result;
use crate::models::{DailyPnL, PositionLot, PriceField};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

pub struct PnlCalculator<'a> {
    storage: &'a Storage,
    field: PriceField,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedPrice {
    price: Decimal,
    price_date: NaiveDate,
    is_stale: bool,
}

/// Ascending-by-date price series for one symbol, prefetched once so batch
/// runs resolve every date's price without a per-date query.
struct PriceSeries {
    points: Vec<(NaiveDate, Decimal)>,
}

impl PriceSeries {
    fn fetch(storage: &Storage, symbol: &str, end: NaiveDate) -> Result<Self> {
        let bars = storage.get_stock_data(symbol, DateRange { start: None, end: Some(end) })?;
        let points = bars
            .into_iter()
            .map(|b| (b.date, b.close))
            .collect();
        Ok(Self { points })
    }

    fn resolve(&self, date: NaiveDate) -> Option<ResolvedPrice> {
        match self.points.binary_search_by_key(&date, |(d, _)| *d) {
            Ok(idx) => Some(ResolvedPrice {
                price: self.points[idx].1,
                price_date: date,
                is_stale: false,
            }),
            Err(idx) if idx > 0 => {
                let (d, p) = self.points[idx - 1];
                Some(ResolvedPrice { price: p, price_date: d, is_stale: true })
            }
            Err(_) => None,
        }
    }

    fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|(d, _)| *d)
    }
}

impl<'a> PnlCalculator<'a> {
    pub fn new(storage: &'a Storage, field: PriceField) -> Self {
        Self { storage, field }
    }

    /// Computes and upserts the `(symbol, date)` row. Returns `None` (and
    /// writes nothing) when no price at all can be resolved for the date.
    pub fn calculate_for_date(&self, symbol: &str, date: NaiveDate) -> Result<Option<DailyPnL>> {
        let Some(resolved) = self.resolve_price_direct(symbol, date)? else {
            return Ok(None);
        };
        let lots = self.storage.get_active_lots_as_of(symbol, date)?;
        let existing = self.storage.get_daily_pnl(symbol, date)?;
        let row = self.build_row(symbol, date, &lots, resolved, existing.as_ref())?;
        self.storage.upsert_daily_pnl(&row)?;
        self.check_consistency(symbol, date, &row)?;
        Ok(Some(row))
    }

    fn resolve_price_direct(&self, symbol: &str, date: NaiveDate) -> Result<Option<ResolvedPrice>> {
        if let Some(p) = self.storage.get_stock_price_for_date(symbol, date, self.field)? {
            return Ok(Some(ResolvedPrice { price: p, price_date: date, is_stale: false }));
        }
        if let Some((d, p)) = self.storage.get_latest_stock_price_before(symbol, date, self.field)? {
            return Ok(Some(ResolvedPrice { price: p, price_date: d, is_stale: true }));
        }
        Ok(None)
    }

    fn build_row(
        &self,
        symbol: &str,
        date: NaiveDate,
        lots: &[PositionLot],
        resolved: ResolvedPrice,
        existing: Option<&DailyPnL>,
    ) -> Result<DailyPnL> {
        let quantity: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
        let non_drip: Vec<&PositionLot> = lots.iter().filter(|l| !l.is_drip()).collect();
        let total_cost: Decimal = non_drip.iter().map(|l| l.total_cost()).sum();
        let non_drip_quantity: Decimal = non_drip.iter().map(|l| l.remaining_quantity).sum();
        let avg_cost = if non_drip_quantity > Decimal::ZERO {
            total_cost / non_drip_quantity
        } else {
            Decimal::ZERO
        };
        let market_value = quantity * resolved.price;
        let unrealized_pnl = market_value - total_cost;
        let unrealized_pnl_pct = if total_cost > Decimal::ZERO {
            unrealized_pnl / total_cost
        } else {
            Decimal::ZERO
        };

        let realized_pnl = existing.map(|r| r.realized_pnl).unwrap_or(Decimal::ZERO);
        let realized_pnl_pct = if total_cost > Decimal::ZERO {
            realized_pnl / total_cost
        } else {
            Decimal::ZERO
        };

        if let Some(existing) = existing {
            let was_placeholder = existing.is_stale_price || existing.market_price.is_zero();
            if was_placeholder {
                let expected = self.storage.sum_realized_pnl_for_date(symbol, date)?;
                if (expected - existing.realized_pnl).abs() > crate::models::qty_epsilon()
                    && !expected.is_zero()
                {
                    log::warn!(
                        "{symbol} {date}: placeholder realized_pnl {} does not match sale \
                         allocations booked that day ({expected}); preserving stored value",
                        existing.realized_pnl
                    );
                }
            }
        }

        Ok(DailyPnL {
            symbol: symbol.to_uppercase(),
            valuation_date: date,
            quantity,
            avg_cost,
            market_price: resolved.price,
            market_value,
            unrealized_pnl,
            unrealized_pnl_pct,
            realized_pnl,
            realized_pnl_pct,
            total_cost,
            price_date: Some(resolved.price_date),
            is_stale_price: resolved.is_stale,
        })
    }

    #[cfg(debug_assertions)]
    fn check_consistency(&self, symbol: &str, date: NaiveDate, row: &DailyPnL) -> Result<()> {
        let recomputed = row.quantity * row.market_price - row.total_cost;
        let diff = (recomputed - row.unrealized_pnl).abs();
        if diff > Decimal::new(1, 2) {
            log::warn!(
                "{symbol} {date}: unrealized_pnl consistency check failed \
                 (stored {}, recomputed {recomputed}, diff {diff})",
                row.unrealized_pnl
            );
        }
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    fn check_consistency(&self, _symbol: &str, _date: NaiveDate, _row: &DailyPnL) -> Result<()> {
        Ok(())
    }

    /// Batch run over `symbols` across `[start, end]`. When
    /// `only_trading_days` is set, restricts the date set to the union of
    /// dates with a stored price for any of `symbols`; otherwise walks
    /// every calendar day. Prices are prefetched per symbol up front so the
    /// per-date loop never re-queries `stock_prices`.
    pub fn calculate_batch(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
        only_trading_days: bool,
    ) -> Result<BatchPnlSummary> {
        let mut written = 0usize;
        let mut skipped = 0usize;

        for symbol in symbols {
            let series = PriceSeries::fetch(self.storage, symbol, end)?;
            let dates: Vec<NaiveDate> = if only_trading_days {
                series
                    .dates()
                    .filter(|d| *d >= start && *d <= end)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            } else {
                let mut out = Vec::new();
                let mut d = start;
                while d <= end {
                    out.push(d);
                    match d.succ_opt() {
                        Some(next) => d = next,
                        None => break,
                    }
                }
                out
            };

            for date in dates {
                let Some(resolved) = series.resolve(date) else {
                    skipped += 1;
                    continue;
                };
                let lots = self.storage.get_active_lots_as_of(symbol, date)?;
                let existing = self.storage.get_daily_pnl(symbol, date)?;
                let row = self.build_row(symbol, date, &lots, resolved, existing.as_ref())?;
                self.storage.upsert_daily_pnl(&row)?;
                self.check_consistency(symbol, date, &row)?;
                written += 1;
            }
        }

        Ok(BatchPnlSummary { written, skipped })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPnlSummary {
    pub written: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Storage;
    use crate::ledger::{BuyRequest, Ledger};
    use crate::models::PriceBar;
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, date: &str, close: Decimal) -> PriceBar {
        PriceBar {
            symbol: symbol.into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            adj_close: close,
            volume: 1000,
        }
    }

    #[test]
    fn unrealized_pnl_matches_quantity_times_price_minus_cost() {
        let storage = Storage::open_in_memory().unwrap();
        let ledger = Ledger::new(&storage);
        ledger
            .record_buy(BuyRequest {
                symbol: "AAPL".into(),
                quantity: dec!(10),
                price: dec!(100),
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                external_id: None,
                platform: None,
                notes: None,
            })
            .unwrap();
        storage
            .store_price_bars("AAPL", &[bar("AAPL", "2024-01-10", dec!(120))])
            .unwrap();

        let calc = PnlCalculator::new(&storage, PriceField::Close);
        let row = calc
            .calculate_for_date("AAPL", NaiveDate::from_ymd_opt(2024, 1, 10).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(row.quantity, dec!(10));
        assert_eq!(row.total_cost, dec!(1000));
        assert_eq!(row.market_value, dec!(1200));
        assert_eq!(row.unrealized_pnl, dec!(200));
        assert!(!row.is_stale_price);
    }

    #[test]
    fn missing_price_on_date_falls_back_to_latest_before_and_marks_stale() {
        let storage = Storage::open_in_memory().unwrap();
        let ledger = Ledger::new(&storage);
        ledger
            .record_buy(BuyRequest {
                symbol: "AAPL".into(),
                quantity: dec!(5),
                price: dec!(50),
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                external_id: None,
                platform: None,
                notes: None,
            })
            .unwrap();
        storage
            .store_price_bars("AAPL", &[bar("AAPL", "2024-01-05", dec!(55))])
            .unwrap();

        let calc = PnlCalculator::new(&storage, PriceField::Close);
        let row = calc
            .calculate_for_date("AAPL", NaiveDate::from_ymd_opt(2024, 1, 8).unwrap())
            .unwrap()
            .unwrap();
        assert!(row.is_stale_price);
        assert_eq!(row.market_price, dec!(55));
        assert_eq!(row.price_date, Some(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
    }

    #[test]
    fn no_price_at_all_skips_the_date() {
        let storage = Storage::open_in_memory().unwrap();
        let ledger = Ledger::new(&storage);
        ledger
            .record_buy(BuyRequest {
                symbol: "AAPL".into(),
                quantity: dec!(5),
                price: dec!(50),
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                external_id: None,
                platform: None,
                notes: None,
            })
            .unwrap();
        let calc = PnlCalculator::new(&storage, PriceField::Close);
        let row = calc
            .calculate_for_date("AAPL", NaiveDate::from_ymd_opt(2024, 1, 8).unwrap())
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn batch_only_trading_days_restricts_to_union_of_price_dates() {
        let storage = Storage::open_in_memory().unwrap();
        let ledger = Ledger::new(&storage);
        ledger
            .record_buy(BuyRequest {
                symbol: "AAPL".into(),
                quantity: dec!(5),
                price: dec!(50),
                transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                external_id: None,
                platform: None,
                notes: None,
            })
            .unwrap();
        storage
            .store_price_bars(
                "AAPL",
                &[
                    bar("AAPL", "2024-01-02", dec!(51)),
                    bar("AAPL", "2024-01-04", dec!(53)),
                ],
            )
            .unwrap();

        let calc = PnlCalculator::new(&storage, PriceField::Close);
        let summary = calc
            .calculate_batch(
                &["AAPL".to_string()],
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                true,
            )
            .unwrap();
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped, 0);
    }
}
