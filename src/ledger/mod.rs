//! Lot-tracking ledger: records buys/sells as immutable lots and allocates
//! sales against them via a pluggable cost-basis matcher.
//!
//! Grounded in `original_source/.../trading/services/lot_transaction_service.py`
//! for the BUY/SELL transaction boundaries, and in the teacher's
//! `fifo::build_fifo_lots` for the "everything happens inside one
//! `rusqlite::Transaction`, commit on success" discipline.

pub mod matchers;
pub mod pnl;

use crate::db::Storage;
use crate::error::{PortfolioError, Result};
use crate::models::{qty_epsilon, DailyPnL, PositionLot, SaleAllocation, Transaction, TransactionType};
use chrono::{NaiveDate, Utc};
use matchers::MatchMethod;
use rust_decimal::Decimal;

fn validate_transaction_fields(
    symbol: &str,
    quantity: Decimal,
    price: Decimal,
    date: NaiveDate,
) -> Result<()> {
    if symbol.is_empty() || symbol.len() > 20 {
        return Err(PortfolioError::Validation(format!(
            "symbol must be 1-20 chars, got '{symbol}'"
        )));
    }
    if quantity <= Decimal::ZERO {
        return Err(PortfolioError::Validation("quantity must be > 0".into()));
    }
    if price <= Decimal::ZERO {
        return Err(PortfolioError::Validation("price must be > 0".into()));
    }
    if date > Utc::now().date_naive() {
        return Err(PortfolioError::Validation(format!(
            "transaction date {date} is in the future"
        )));
    }
    Ok(())
}

pub struct BuyRequest {
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
    pub external_id: Option<String>,
    pub platform: Option<String>,
    pub notes: Option<String>,
}

pub struct SellRequest {
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub transaction_date: NaiveDate,
    pub external_id: Option<String>,
    pub platform: Option<String>,
    pub notes: Option<String>,
    pub method: MatchMethod,
    /// Required when `method == SpecificLot`.
    pub specific_lots: Option<Vec<(i64, Decimal)>>,
}

pub struct Ledger<'a> {
    storage: &'a Storage,
}

impl<'a> Ledger<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// One PositionLot created 1:1 from the BUY transaction. Idempotent on
    /// `external_id`: a repeat of an already-recorded external_id is a
    /// no-op that returns the existing transaction id before any lot is
    /// touched. The transaction row and its lot are written inside one
    /// atomic `storage.transaction`, so a failure partway through never
    /// leaves an orphaned transaction with no lot.
    pub fn record_buy(&self, req: BuyRequest) -> Result<i64> {
        validate_transaction_fields(&req.symbol, req.quantity, req.price, req.transaction_date)?;
        self.storage.upsert_stock(&req.symbol, None)?;
        self.storage.ensure_ledger_tables()?;

        if let Some(ref ext) = req.external_id {
            if let Some(existing) = self.storage.get_transaction_id_by_external_id(ext)? {
                return Ok(existing);
            }
        }

        let txn = Transaction {
            id: 0,
            external_id: req.external_id,
            symbol: req.symbol.clone(),
            transaction_type: TransactionType::Buy,
            quantity: req.quantity,
            price: req.price,
            transaction_date: req.transaction_date,
            platform: req.platform,
            notes: req.notes,
            created_at: Utc::now().naive_utc(),
        };

        self.storage.transaction(|tx| {
            let txn_id = self.storage.insert_transaction_tx(tx, &txn)?;
            let lot = PositionLot {
                id: 0,
                symbol: req.symbol.clone(),
                transaction_id: txn_id,
                original_quantity: req.quantity,
                remaining_quantity: req.quantity,
                cost_basis: req.price,
                purchase_date: req.transaction_date,
                is_closed: false,
                notes: txn.notes.clone(),
            };
            self.storage.create_position_lot(tx, &lot)?;
            Ok(txn_id)
        })
    }

    /// Matches the SELL against active lots, allocates realized P&L per
    /// lot, and updates (or creates a placeholder for) the symbol's
    /// DailyPnL row for the transaction date.
    ///
    /// The `external_id` short-circuit runs first, before lots are even
    /// fetched: replaying a SELL whose position has since been fully
    /// consumed must return the original transaction id, not
    /// `InsufficientPosition`. Everything past that check — the
    /// transaction row, sale allocations, lot updates and DailyPnL — is
    /// written inside one atomic `storage.transaction`.
    pub fn record_sell(&self, req: SellRequest) -> Result<i64> {
        validate_transaction_fields(&req.symbol, req.quantity, req.price, req.transaction_date)?;
        self.storage.ensure_ledger_tables()?;

        if let Some(ref ext) = req.external_id {
            if let Some(existing) = self.storage.get_transaction_id_by_external_id(ext)? {
                return Ok(existing);
            }
        }

        let active_lots = self
            .storage
            .get_active_lots_as_of(&req.symbol, req.transaction_date)?;
        let total_available: Decimal = active_lots.iter().map(|l| l.remaining_quantity).sum();
        if total_available < req.quantity - qty_epsilon() {
            return Err(PortfolioError::InsufficientPosition {
                symbol: req.symbol.clone(),
                requested: req.quantity,
                available: total_available,
            });
        }

        let matches = matchers::match_lots(
            req.method,
            &active_lots,
            req.quantity,
            req.specific_lots.as_deref(),
        )?;

        let txn = Transaction {
            id: 0,
            external_id: req.external_id,
            symbol: req.symbol.clone(),
            transaction_type: TransactionType::Sell,
            quantity: req.quantity,
            price: req.price,
            transaction_date: req.transaction_date,
            platform: req.platform,
            notes: req.notes,
            created_at: Utc::now().naive_utc(),
        };

        self.storage.transaction(|tx| {
            let txn_id = self.storage.insert_transaction_tx(tx, &txn)?;
            let mut total_realized = Decimal::ZERO;
            for (lot, quantity_sold) in &matches {
                let alloc = SaleAllocation::new(
                    txn_id,
                    lot.id,
                    *quantity_sold,
                    lot.cost_basis,
                    req.price,
                );
                self.storage.create_sale_allocation(tx, &alloc)?;
                total_realized += alloc.realized_pnl;

                let remaining = lot.remaining_quantity - quantity_sold;
                let is_closed = remaining <= qty_epsilon();
                self.storage.update_lot_remaining(tx, lot.id, remaining, is_closed)?;
            }

            self.apply_realized_pnl(tx, &req.symbol, req.transaction_date, total_realized)?;
            Ok(txn_id)
        })
    }

    /// Mirrors the BUY/SELL spec: add to an existing row's `realized_pnl`,
    /// or synthesize the zeroed-market-side placeholder row described in
    /// §4.4 when none exists yet.
    fn apply_realized_pnl(
        &self,
        tx: &rusqlite::Connection,
        symbol: &str,
        date: NaiveDate,
        realized_delta: Decimal,
    ) -> Result<()> {
        if let Some(mut row) = self.storage.get_daily_pnl_tx(tx, symbol, date)? {
            row.realized_pnl += realized_delta;
            row.realized_pnl_pct = if row.total_cost > Decimal::ZERO {
                row.realized_pnl / row.total_cost
            } else {
                Decimal::ZERO
            };
            self.storage.upsert_daily_pnl_tx(tx, &row)?;
            return Ok(());
        }

        let lots = self.storage.get_active_lots_as_of_tx(tx, symbol, date)?;
        let quantity: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
        let non_drip: Vec<&PositionLot> = lots.iter().filter(|l| !l.is_drip()).collect();
        let total_cost: Decimal = non_drip.iter().map(|l| l.total_cost()).sum();
        let non_drip_quantity: Decimal = non_drip.iter().map(|l| l.remaining_quantity).sum();
        let avg_cost = if non_drip_quantity > Decimal::ZERO {
            total_cost / non_drip_quantity
        } else {
            Decimal::ZERO
        };

        let placeholder = DailyPnL {
            symbol: symbol.to_string(),
            valuation_date: date,
            quantity,
            avg_cost,
            market_price: Decimal::ZERO,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            realized_pnl: realized_delta,
            realized_pnl_pct: if total_cost > Decimal::ZERO {
                realized_delta / total_cost
            } else {
                Decimal::ZERO
            },
            total_cost,
            price_date: None,
            is_stale_price: true,
        };
        self.storage.upsert_daily_pnl_tx(tx, &placeholder)
    }
}
