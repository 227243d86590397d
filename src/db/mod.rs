//! Storage layer: schema ownership, transactional upserts, typed reads.
//!
//! Grounded in the teacher's `db::init_database` (WAL mode, idempotent
//! `CREATE TABLE IF NOT EXISTS`) and `fifo::build_fifo_lots` (scoped
//! `Connection` access, prepared-statement query patterns). The teacher
//! keeps one `Mutex<Option<Connection>>` behind a `once_cell::Lazy`
//! global; this layer keeps the same single-writer discipline but as an
//! owned `Storage` value so callers can open more than one database (the
//! teacher's tests open a `:memory:` db per test the same way).
//!
//! Storage has zero knowledge of ledger/analytics *semantics* — only the
//! schema and typed CRUD in spec.md §3/§4.1 — per the layering fix noted
//! in spec.md §9 (the source has a storage<->trading cyclic import).

mod schema;

use crate::error::{PortfolioError, Result};
use crate::models::*;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

fn dec_to_sql(d: Decimal) -> String {
    d.to_string()
}

fn sql_to_dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s)
        .map_err(|e| PortfolioError::Corrupt(format!("invalid decimal '{s}': {e}")))
}

fn opt_dec_to_sql(d: Option<Decimal>) -> Option<String> {
    d.map(dec_to_sql)
}

/// `(symbol, date)` range filter for price queries.
#[derive(Debug, Clone, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct SaleAllocationFilter {
    pub sale_transaction_id: Option<i64>,
    pub lot_id: Option<i64>,
}

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Opens (creating if missing) the database at `path` and ensures the
    /// core tables exist. Ledger tables are created lazily.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .or_else(|_| conn.execute_batch("PRAGMA foreign_keys=ON;"))?;
        conn.execute_batch(schema::CORE_TABLES_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Idempotent; called before any ledger operation so `Storage::open`
    /// alone never pays for tables a read-only/analytics caller won't use.
    pub(crate) fn ensure_ledger_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(schema::LEDGER_TABLES_SQL)?;
        Ok(())
    }

    /// Scoped write transaction: commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx);
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // tx is dropped here, rolling back implicitly.
                Err(e)
            }
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    // ---------------------------------------------------------------
    // Stocks
    // ---------------------------------------------------------------

    pub fn upsert_stock(&self, symbol: &str, meta: Option<&Stock>) -> Result<()> {
        let symbol = symbol.to_uppercase();
        if symbol.is_empty() || symbol.len() > 20 {
            return Err(PortfolioError::Validation(format!(
                "symbol must be 1-20 chars, got '{symbol}'"
            )));
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stocks (symbol) VALUES (?1) ON CONFLICT(symbol) DO NOTHING",
                params![symbol],
            )?;
            if let Some(meta) = meta {
                conn.execute(
                    "UPDATE stocks SET company_name = COALESCE(?2, company_name),
                        sector = COALESCE(?3, sector),
                        industry = COALESCE(?4, industry),
                        market_cap = COALESCE(?5, market_cap),
                        employees = COALESCE(?6, employees),
                        description = COALESCE(?7, description),
                        updated_at = CURRENT_TIMESTAMP
                     WHERE symbol = ?1",
                    params![
                        symbol,
                        meta.company_name,
                        meta.sector,
                        meta.industry,
                        opt_dec_to_sql(meta.market_cap),
                        meta.employees,
                        meta.description,
                    ],
                )?;
            }
            Ok(())
        })
    }

    // ---------------------------------------------------------------
    // Prices
    // ---------------------------------------------------------------

    pub fn store_price_bars(&self, symbol: &str, bars: &[PriceBar]) -> Result<usize> {
        for bar in bars {
            bar.validate()?;
        }
        self.upsert_stock(symbol, None)?;
        self.transaction(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO stock_prices (symbol, date, open, high, low, close, volume, adj_close)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(symbol, date) DO UPDATE SET
                    open=excluded.open, high=excluded.high, low=excluded.low,
                    close=excluded.close, volume=excluded.volume, adj_close=excluded.adj_close",
            )?;
            let mut n = 0;
            for bar in bars {
                stmt.execute(params![
                    symbol.to_uppercase(),
                    bar.date.to_string(),
                    dec_to_sql(bar.open),
                    dec_to_sql(bar.high),
                    dec_to_sql(bar.low),
                    dec_to_sql(bar.close),
                    bar.volume,
                    dec_to_sql(bar.adj_close),
                ])?;
                n += 1;
            }
            Ok(n)
        })
    }

    pub fn get_stock_data(&self, symbol: &str, range: DateRange) -> Result<Vec<PriceBar>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT symbol, date, open, high, low, close, volume, adj_close
                 FROM stock_prices WHERE symbol = ?1",
            );
            if range.start.is_some() {
                sql.push_str(" AND date >= ?2");
            }
            if range.end.is_some() {
                sql.push_str(if range.start.is_some() {
                    " AND date <= ?3"
                } else {
                    " AND date <= ?2"
                });
            }
            sql.push_str(" ORDER BY date ASC");
            let mut stmt = conn.prepare(&sql)?;
            let symbol = symbol.to_uppercase();
            let rows = match (range.start, range.end) {
                (Some(s), Some(e)) => stmt.query_map(
                    params![symbol, s.to_string(), e.to_string()],
                    Self::map_price_bar,
                )?,
                (Some(s), None) => {
                    stmt.query_map(params![symbol, s.to_string()], Self::map_price_bar)?
                }
                (None, Some(e)) => {
                    stmt.query_map(params![symbol, e.to_string()], Self::map_price_bar)?
                }
                (None, None) => stmt.query_map(params![symbol], Self::map_price_bar)?,
            };
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    fn map_price_bar(row: &rusqlite::Row) -> rusqlite::Result<Result<PriceBar>> {
        let date: String = row.get(1)?;
        Ok((|| -> Result<PriceBar> {
            Ok(PriceBar {
                symbol: row.get(0)?,
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                open: sql_to_dec(&row.get::<_, String>(2)?)?,
                high: sql_to_dec(&row.get::<_, String>(3)?)?,
                low: sql_to_dec(&row.get::<_, String>(4)?)?,
                close: sql_to_dec(&row.get::<_, String>(5)?)?,
                volume: row.get(6)?,
                adj_close: sql_to_dec(&row.get::<_, String>(7)?)?,
            })
        })())
    }

    pub fn get_last_price_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        self.with_conn(|conn| {
            let date: Option<String> = conn
                .query_row(
                    "SELECT MAX(date) FROM stock_prices WHERE symbol = ?1",
                    params![symbol.to_uppercase()],
                    |r| r.get(0),
                )
                .optional()?
                .flatten();
            date.map(|d| {
                NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))
            })
            .transpose()
        })
    }

    pub fn get_stock_price_for_date(
        &self,
        symbol: &str,
        date: NaiveDate,
        field: PriceField,
    ) -> Result<Option<Decimal>> {
        let column = match field {
            PriceField::Close => "close",
            PriceField::AdjClose => "adj_close",
        };
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {column} FROM stock_prices WHERE symbol = ?1 AND date = ?2"
            );
            let value: Option<String> = conn
                .query_row(&sql, params![symbol.to_uppercase(), date.to_string()], |r| {
                    r.get(0)
                })
                .optional()?;
            value.map(|v| sql_to_dec(&v)).transpose()
        })
    }

    pub fn get_latest_stock_price_before(
        &self,
        symbol: &str,
        date: NaiveDate,
        field: PriceField,
    ) -> Result<Option<(NaiveDate, Decimal)>> {
        let column = match field {
            PriceField::Close => "close",
            PriceField::AdjClose => "adj_close",
        };
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT date, {column} FROM stock_prices
                 WHERE symbol = ?1 AND date <= ?2 AND {column} IS NOT NULL
                 ORDER BY date DESC LIMIT 1"
            );
            let row: Option<(String, String)> = conn
                .query_row(&sql, params![symbol.to_uppercase(), date.to_string()], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })
                .optional()?;
            row.map(|(d, v)| {
                let date = NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?;
                Ok((date, sql_to_dec(&v)?))
            })
            .transpose()
        })
    }

    // ---------------------------------------------------------------
    // Financial statements
    // ---------------------------------------------------------------

    pub fn store_financial_statements(
        &self,
        symbol: &str,
        stmts: &[FinancialStatement],
    ) -> Result<usize> {
        if stmts.is_empty() {
            return Ok(0);
        }
        self.upsert_stock(symbol, None)?;
        self.transaction(|tx| {
            let mut n = 0;
            for stmt in stmts {
                let table = match stmt.statement_type {
                    StatementType::IncomeStatement => "income_statement",
                    StatementType::BalanceSheet => "balance_sheet",
                    StatementType::CashFlow => "cash_flow",
                };
                let sql = format!(
                    "INSERT INTO {table} (symbol, period, metric_name, metric_value)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(symbol, period, metric_name) DO UPDATE SET metric_value = excluded.metric_value"
                );
                tx.execute(
                    &sql,
                    params![
                        symbol.to_uppercase(),
                        stmt.period.to_string(),
                        stmt.metric_name,
                        opt_dec_to_sql(stmt.metric_value),
                    ],
                )?;
                n += 1;
            }
            Ok(n)
        })
    }

    pub fn get_last_financial_period(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        self.with_conn(|conn| {
            let mut latest: Option<NaiveDate> = None;
            for table in ["income_statement", "balance_sheet", "cash_flow"] {
                let sql = format!("SELECT MAX(period) FROM {table} WHERE symbol = ?1");
                let period: Option<String> = conn
                    .query_row(&sql, params![symbol.to_uppercase()], |r| r.get(0))
                    .optional()?
                    .flatten();
                if let Some(p) = period {
                    let d = NaiveDate::parse_from_str(&p, "%Y-%m-%d")
                        .map_err(|e| PortfolioError::Corrupt(e.to_string()))?;
                    latest = Some(latest.map_or(d, |l| l.max(d)));
                }
            }
            Ok(latest)
        })
    }

    pub fn get_financial_pivot(
        &self,
        symbol: &str,
        statement_type: StatementType,
    ) -> Result<Vec<FinancialStatement>> {
        let table = match statement_type {
            StatementType::IncomeStatement => "income_statement",
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::CashFlow => "cash_flow",
        };
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT symbol, period, metric_name, metric_value FROM {table}
                 WHERE symbol = ?1 ORDER BY period ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![symbol.to_uppercase()], |r| {
                let period: String = r.get(1)?;
                let value: Option<String> = r.get(3)?;
                Ok((r.get::<_, String>(0)?, period, r.get::<_, String>(2)?, value))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (symbol, period, metric_name, value) = row?;
                out.push(FinancialStatement {
                    symbol,
                    statement_type,
                    period: NaiveDate::parse_from_str(&period, "%Y-%m-%d")
                        .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                    metric_name,
                    metric_value: value.map(|v| sql_to_dec(&v)).transpose()?,
                });
            }
            Ok(out)
        })
    }

    // ---------------------------------------------------------------
    // Transactions, lots, allocations (ledger)
    // ---------------------------------------------------------------

    /// Inserts `txn`, or returns the existing row id if its `external_id`
    /// was already recorded (idempotent upsert per spec.md §4.1/§7). Runs
    /// against an already-open `Connection` so callers fold it into a
    /// larger atomic transaction alongside the lot or allocations it funds.
    /// Callers must have already ensured the ledger tables exist and the
    /// stock row is present, since both take the storage lock themselves
    /// and would deadlock if invoked from inside `tx`.
    pub fn insert_transaction_tx(&self, tx: &rusqlite::Connection, txn: &Transaction) -> Result<i64> {
        if let Some(ref ext) = txn.external_id {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM transactions WHERE external_id = ?1",
                    params![ext],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }
        tx.execute(
            "INSERT INTO transactions
                (external_id, symbol, transaction_type, quantity, price, transaction_date, platform, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                txn.external_id,
                txn.symbol.to_uppercase(),
                txn.transaction_type.as_str(),
                dec_to_sql(txn.quantity),
                dec_to_sql(txn.price),
                txn.transaction_date.to_string(),
                txn.platform,
                txn.notes,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    pub fn get_transaction_id_by_external_id(&self, external_id: &str) -> Result<Option<i64>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT id FROM transactions WHERE external_id = ?1",
                    params![external_id],
                    |r| r.get(0),
                )
                .optional()?)
        })
    }

    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, external_id, symbol, transaction_type, quantity, price,
                        transaction_date, platform, notes, created_at
                 FROM transactions WHERE id = ?1",
                params![id],
                Self::map_transaction,
            )
            .optional()?
            .transpose()
        })
    }

    fn map_transaction(row: &rusqlite::Row) -> rusqlite::Result<Result<Transaction>> {
        let date: String = row.get(6)?;
        let created: String = row.get(9)?;
        let ttype: String = row.get(3)?;
        Ok((|| -> Result<Transaction> {
            Ok(Transaction {
                id: row.get(0)?,
                external_id: row.get(1)?,
                symbol: row.get(2)?,
                transaction_type: TransactionType::from_str(&ttype)
                    .ok_or_else(|| PortfolioError::Corrupt(format!("bad txn type {ttype}")))?,
                quantity: sql_to_dec(&row.get::<_, String>(4)?)?,
                price: sql_to_dec(&row.get::<_, String>(5)?)?,
                transaction_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                platform: row.get(7)?,
                notes: row.get(8)?,
                created_at: parse_sqlite_timestamp(&created)?,
            })
        })())
    }

    pub fn create_position_lot(&self, tx: &Connection, lot: &PositionLot) -> Result<i64> {
        tx.execute(
            "INSERT INTO position_lots
                (symbol, transaction_id, original_quantity, remaining_quantity,
                 cost_basis, purchase_date, is_closed, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                lot.symbol.to_uppercase(),
                lot.transaction_id,
                dec_to_sql(lot.original_quantity),
                dec_to_sql(lot.remaining_quantity),
                dec_to_sql(lot.cost_basis),
                lot.purchase_date.to_string(),
                lot.is_closed as i64,
                lot.notes,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    pub fn update_lot_remaining(
        &self,
        tx: &Connection,
        lot_id: i64,
        remaining: Decimal,
        is_closed: bool,
    ) -> Result<()> {
        tx.execute(
            "UPDATE position_lots SET remaining_quantity = ?2, is_closed = ?3, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?1",
            params![lot_id, dec_to_sql(remaining), is_closed as i64],
        )?;
        Ok(())
    }

    pub fn create_sale_allocation(&self, tx: &Connection, alloc: &SaleAllocation) -> Result<i64> {
        tx.execute(
            "INSERT INTO sale_allocations
                (sale_transaction_id, lot_id, quantity_sold, cost_basis, sale_price, realized_pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                alloc.sale_transaction_id,
                alloc.lot_id,
                dec_to_sql(alloc.quantity_sold),
                dec_to_sql(alloc.cost_basis),
                dec_to_sql(alloc.sale_price),
                dec_to_sql(alloc.realized_pnl),
            ],
        )?;
        Ok(tx.last_insert_rowid())
    }

    pub fn get_sale_allocations(&self, filter: SaleAllocationFilter) -> Result<Vec<SaleAllocation>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT id, sale_transaction_id, lot_id, quantity_sold, cost_basis, sale_price, realized_pnl
                 FROM sale_allocations WHERE 1=1",
            );
            if filter.sale_transaction_id.is_some() {
                sql.push_str(" AND sale_transaction_id = ?1");
            }
            if filter.lot_id.is_some() {
                sql.push_str(if filter.sale_transaction_id.is_some() {
                    " AND lot_id = ?2"
                } else {
                    " AND lot_id = ?1"
                });
            }
            let mut stmt = conn.prepare(&sql)?;
            let rows = match (filter.sale_transaction_id, filter.lot_id) {
                (Some(s), Some(l)) => stmt.query_map(params![s, l], Self::map_sale_allocation)?,
                (Some(s), None) => stmt.query_map(params![s], Self::map_sale_allocation)?,
                (None, Some(l)) => stmt.query_map(params![l], Self::map_sale_allocation)?,
                (None, None) => stmt.query_map(params![], Self::map_sale_allocation)?,
            };
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    fn map_sale_allocation(row: &rusqlite::Row) -> rusqlite::Result<Result<SaleAllocation>> {
        Ok((|| -> Result<SaleAllocation> {
            Ok(SaleAllocation {
                id: row.get(0)?,
                sale_transaction_id: row.get(1)?,
                lot_id: row.get(2)?,
                quantity_sold: sql_to_dec(&row.get::<_, String>(3)?)?,
                cost_basis: sql_to_dec(&row.get::<_, String>(4)?)?,
                sale_price: sql_to_dec(&row.get::<_, String>(5)?)?,
                realized_pnl: sql_to_dec(&row.get::<_, String>(6)?)?,
            })
        })())
    }

    /// Distinct symbols with at least one lot ever recorded, for commands
    /// that enumerate positions without a caller-supplied symbol list.
    pub fn list_symbols_with_lots(&self) -> Result<Vec<String>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT symbol FROM position_lots ORDER BY symbol ASC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    pub fn get_position_lots(&self, symbol: &str, active_only: bool) -> Result<Vec<PositionLot>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            let sql = if active_only {
                "SELECT id, symbol, transaction_id, original_quantity, remaining_quantity,
                        cost_basis, purchase_date, is_closed, notes
                 FROM position_lots WHERE symbol = ?1 AND is_closed = 0
                 ORDER BY purchase_date ASC, id ASC"
            } else {
                "SELECT id, symbol, transaction_id, original_quantity, remaining_quantity,
                        cost_basis, purchase_date, is_closed, notes
                 FROM position_lots WHERE symbol = ?1
                 ORDER BY purchase_date ASC, id ASC"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![symbol.to_uppercase()], Self::map_position_lot)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Active lots as of `on_or_before` (used by the P&L calculator, which
    /// must include lots bought on or before the valuation date).
    pub fn get_active_lots_as_of(&self, symbol: &str, on_or_before: NaiveDate) -> Result<Vec<PositionLot>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, symbol, transaction_id, original_quantity, remaining_quantity,
                        cost_basis, purchase_date, is_closed, notes
                 FROM position_lots
                 WHERE symbol = ?1 AND is_closed = 0 AND purchase_date <= ?2
                 ORDER BY purchase_date ASC, id ASC",
            )?;
            let rows = stmt.query_map(
                params![symbol.to_uppercase(), on_or_before.to_string()],
                Self::map_position_lot,
            )?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    /// Same as [`Storage::get_active_lots_as_of`] but runs against an
    /// already-open `Connection` — for use from inside a caller's own
    /// `transaction` closure, where the outer `Mutex` is already held.
    pub fn get_active_lots_as_of_tx(
        &self,
        tx: &Connection,
        symbol: &str,
        on_or_before: NaiveDate,
    ) -> Result<Vec<PositionLot>> {
        let mut stmt = tx.prepare(
            "SELECT id, symbol, transaction_id, original_quantity, remaining_quantity,
                    cost_basis, purchase_date, is_closed, notes
             FROM position_lots
             WHERE symbol = ?1 AND is_closed = 0 AND purchase_date <= ?2
             ORDER BY purchase_date ASC, id ASC",
        )?;
        let rows = stmt.query_map(
            params![symbol.to_uppercase(), on_or_before.to_string()],
            Self::map_position_lot,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    fn map_position_lot(row: &rusqlite::Row) -> rusqlite::Result<Result<PositionLot>> {
        let date: String = row.get(6)?;
        Ok((|| -> Result<PositionLot> {
            Ok(PositionLot {
                id: row.get(0)?,
                symbol: row.get(1)?,
                transaction_id: row.get(2)?,
                original_quantity: sql_to_dec(&row.get::<_, String>(3)?)?,
                remaining_quantity: sql_to_dec(&row.get::<_, String>(4)?)?,
                cost_basis: sql_to_dec(&row.get::<_, String>(5)?)?,
                purchase_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                is_closed: row.get::<_, i64>(7)? != 0,
                notes: row.get(8)?,
            })
        })())
    }

    pub fn get_lot(&self, tx: &Connection, lot_id: i64) -> Result<Option<PositionLot>> {
        tx.query_row(
            "SELECT id, symbol, transaction_id, original_quantity, remaining_quantity,
                    cost_basis, purchase_date, is_closed, notes
             FROM position_lots WHERE id = ?1",
            params![lot_id],
            Self::map_position_lot,
        )
        .optional()?
        .transpose()
    }

    /// Sum of `realized_pnl` booked by sales whose `transaction_date` is
    /// `date`, for `symbol`. Used by the P&L calculator's placeholder-
    /// completion consistency check, not as the source of truth for
    /// `daily_pnl.realized_pnl` (which accumulates across all prior dates).
    pub fn sum_realized_pnl_for_date(&self, symbol: &str, date: NaiveDate) -> Result<Decimal> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sa.realized_pnl
                 FROM sale_allocations sa
                 JOIN transactions t ON t.id = sa.sale_transaction_id
                 WHERE t.symbol = ?1 AND t.transaction_date = ?2",
            )?;
            let rows = stmt.query_map(params![symbol.to_uppercase(), date.to_string()], |r| {
                r.get::<_, String>(0)
            })?;
            let mut total = Decimal::ZERO;
            for row in rows {
                total += sql_to_dec(&row?)?;
            }
            Ok(total)
        })
    }

    // ---------------------------------------------------------------
    // Daily P&L
    // ---------------------------------------------------------------

    pub fn upsert_daily_pnl(&self, row: &DailyPnL) -> Result<()> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO daily_pnl
                    (symbol, valuation_date, quantity, avg_cost, market_price, market_value,
                     unrealized_pnl, unrealized_pnl_pct, realized_pnl, realized_pnl_pct,
                     total_cost, price_date, is_stale_price)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                 ON CONFLICT(symbol, valuation_date) DO UPDATE SET
                    quantity=excluded.quantity, avg_cost=excluded.avg_cost,
                    market_price=excluded.market_price, market_value=excluded.market_value,
                    unrealized_pnl=excluded.unrealized_pnl, unrealized_pnl_pct=excluded.unrealized_pnl_pct,
                    realized_pnl=excluded.realized_pnl, realized_pnl_pct=excluded.realized_pnl_pct,
                    total_cost=excluded.total_cost, price_date=excluded.price_date,
                    is_stale_price=excluded.is_stale_price",
                params![
                    row.symbol.to_uppercase(),
                    row.valuation_date.to_string(),
                    dec_to_sql(row.quantity),
                    dec_to_sql(row.avg_cost),
                    dec_to_sql(row.market_price),
                    dec_to_sql(row.market_value),
                    dec_to_sql(row.unrealized_pnl),
                    dec_to_sql(row.unrealized_pnl_pct),
                    dec_to_sql(row.realized_pnl),
                    dec_to_sql(row.realized_pnl_pct),
                    dec_to_sql(row.total_cost),
                    row.price_date.map(|d| d.to_string()),
                    row.is_stale_price as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_daily_pnl(&self, symbol: &str, date: NaiveDate) -> Result<Option<DailyPnL>> {
        self.ensure_ledger_tables()?;
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT symbol, valuation_date, quantity, avg_cost, market_price, market_value,
                        unrealized_pnl, unrealized_pnl_pct, realized_pnl, realized_pnl_pct,
                        total_cost, price_date, is_stale_price
                 FROM daily_pnl WHERE symbol = ?1 AND valuation_date = ?2",
                params![symbol.to_uppercase(), date.to_string()],
                Self::map_daily_pnl,
            )
            .optional()?
            .transpose()
        })
    }

    /// Used by the ledger's placeholder-completion path to mutate the
    /// existing row's connection-scoped state within the same write
    /// transaction as the SELL.
    pub fn get_daily_pnl_tx(
        &self,
        tx: &Connection,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyPnL>> {
        tx.query_row(
            "SELECT symbol, valuation_date, quantity, avg_cost, market_price, market_value,
                    unrealized_pnl, unrealized_pnl_pct, realized_pnl, realized_pnl_pct,
                    total_cost, price_date, is_stale_price
             FROM daily_pnl WHERE symbol = ?1 AND valuation_date = ?2",
            params![symbol.to_uppercase(), date.to_string()],
            Self::map_daily_pnl,
        )
        .optional()?
        .transpose()
    }

    pub fn upsert_daily_pnl_tx(&self, tx: &Connection, row: &DailyPnL) -> Result<()> {
        tx.execute(
            "INSERT INTO daily_pnl
                (symbol, valuation_date, quantity, avg_cost, market_price, market_value,
                 unrealized_pnl, unrealized_pnl_pct, realized_pnl, realized_pnl_pct,
                 total_cost, price_date, is_stale_price)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(symbol, valuation_date) DO UPDATE SET
                quantity=excluded.quantity, avg_cost=excluded.avg_cost,
                market_price=excluded.market_price, market_value=excluded.market_value,
                unrealized_pnl=excluded.unrealized_pnl, unrealized_pnl_pct=excluded.unrealized_pnl_pct,
                realized_pnl=excluded.realized_pnl, realized_pnl_pct=excluded.realized_pnl_pct,
                total_cost=excluded.total_cost, price_date=excluded.price_date,
                is_stale_price=excluded.is_stale_price",
            params![
                row.symbol.to_uppercase(),
                row.valuation_date.to_string(),
                dec_to_sql(row.quantity),
                dec_to_sql(row.avg_cost),
                dec_to_sql(row.market_price),
                dec_to_sql(row.market_value),
                dec_to_sql(row.unrealized_pnl),
                dec_to_sql(row.unrealized_pnl_pct),
                dec_to_sql(row.realized_pnl),
                dec_to_sql(row.realized_pnl_pct),
                dec_to_sql(row.total_cost),
                row.price_date.map(|d| d.to_string()),
                row.is_stale_price as i64,
            ],
        )?;
        Ok(())
    }

    fn map_daily_pnl(row: &rusqlite::Row) -> rusqlite::Result<Result<DailyPnL>> {
        let date: String = row.get(1)?;
        let price_date: Option<String> = row.get(11)?;
        Ok((|| -> Result<DailyPnL> {
            Ok(DailyPnL {
                symbol: row.get(0)?,
                valuation_date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                quantity: sql_to_dec(&row.get::<_, String>(2)?)?,
                avg_cost: sql_to_dec(&row.get::<_, String>(3)?)?,
                market_price: sql_to_dec(&row.get::<_, String>(4)?)?,
                market_value: sql_to_dec(&row.get::<_, String>(5)?)?,
                unrealized_pnl: sql_to_dec(&row.get::<_, String>(6)?)?,
                unrealized_pnl_pct: sql_to_dec(&row.get::<_, String>(7)?)?,
                realized_pnl: sql_to_dec(&row.get::<_, String>(8)?)?,
                realized_pnl_pct: sql_to_dec(&row.get::<_, String>(9)?)?,
                total_cost: sql_to_dec(&row.get::<_, String>(10)?)?,
                price_date: price_date
                    .map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d"))
                    .transpose()
                    .map_err(|e| PortfolioError::Corrupt(e.to_string()))?,
                is_stale_price: row.get::<_, i64>(12)? != 0,
            })
        })())
    }

    // ---------------------------------------------------------------
    // Download log
    // ---------------------------------------------------------------

    pub fn record_download_log(
        &self,
        symbol: &str,
        download_type: &str,
        status: DownloadStatus,
        data_points: i64,
        error_message: Option<&str>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO download_logs (symbol, download_type, status, data_points, error_message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    symbol.to_uppercase(),
                    download_type,
                    status.as_str(),
                    data_points,
                    error_message,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }
}

fn parse_sqlite_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| Ok(Utc::now().naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn store_and_read_price_bars_roundtrip_exactly() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .store_price_bars("aapl", &[bar("AAPL", "2024-01-10", dec!(150.1234))])
            .unwrap();
        let rows = storage
            .get_stock_data("AAPL", DateRange::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, dec!(150.1234));
    }

    #[test]
    fn upsert_price_bar_replaces_on_conflict() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .store_price_bars("AAPL", &[bar("AAPL", "2024-01-10", dec!(150))])
            .unwrap();
        storage
            .store_price_bars("AAPL", &[bar("AAPL", "2024-01-10", dec!(160))])
            .unwrap();
        let rows = storage
            .get_stock_data("AAPL", DateRange::default())
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].close, dec!(160));
    }

    #[test]
    fn record_transaction_is_idempotent_on_external_id() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = Transaction {
            id: 0,
            external_id: Some("X".into()),
            symbol: "AAPL".into(),
            transaction_type: TransactionType::Buy,
            quantity: dec!(10),
            price: dec!(150),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            platform: None,
            notes: None,
            created_at: Utc::now().naive_utc(),
        };
        let id1 = storage.record_transaction(&txn).unwrap();
        let id2 = storage.record_transaction(&txn).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn get_last_price_date_returns_none_when_empty() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(storage.get_last_price_date("AAPL").unwrap().is_none());
    }

    #[test]
    fn stale_price_lookup_finds_most_recent_before_date() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .store_price_bars("AAPL", &[bar("AAPL", "2024-01-10", dec!(150))])
            .unwrap();
        let (date, price) = storage
            .get_latest_stock_price_before(
                "AAPL",
                NaiveDate::from_ymd_opt(2024, 1, 11).unwrap(),
                PriceField::Close,
            )
            .unwrap()
            .unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        assert_eq!(price, dec!(150));
    }
}
