//! Table and index definitions.
//!
//! Column layout follows the original SQLite schema manager 1:1 (see
//! `sqlite_schema.py` / `StorageConfig.get_core_indexes`), translated to
//! the entities of spec.md §3. Money/quantity/price columns are `TEXT`
//! holding a `rust_decimal::Decimal` string representation rather than
//! `REAL`, so no binary-float rounding is ever introduced by storage.

/// Tables that exist from the moment a connection is opened.
pub const CORE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stocks (
    symbol TEXT PRIMARY KEY,
    company_name TEXT,
    sector TEXT,
    industry TEXT,
    market_cap TEXT,
    employees INTEGER,
    description TEXT,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS stock_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    date TEXT NOT NULL,
    open TEXT,
    high TEXT,
    low TEXT,
    close TEXT,
    volume INTEGER,
    adj_close TEXT,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol),
    UNIQUE(symbol, date)
);
CREATE INDEX IF NOT EXISTS idx_stock_prices_symbol_date ON stock_prices(symbol, date);

CREATE TABLE IF NOT EXISTS income_statement (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    period TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    metric_value TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol),
    UNIQUE(symbol, period, metric_name)
);
CREATE INDEX IF NOT EXISTS idx_income_statement_symbol_period ON income_statement(symbol, period);
CREATE INDEX IF NOT EXISTS idx_income_statement_metric ON income_statement(metric_name);

CREATE TABLE IF NOT EXISTS balance_sheet (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    period TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    metric_value TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol),
    UNIQUE(symbol, period, metric_name)
);
CREATE INDEX IF NOT EXISTS idx_balance_sheet_symbol_period ON balance_sheet(symbol, period);
CREATE INDEX IF NOT EXISTS idx_balance_sheet_metric ON balance_sheet(metric_name);

CREATE TABLE IF NOT EXISTS cash_flow (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    period TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    metric_value TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol),
    UNIQUE(symbol, period, metric_name)
);
CREATE INDEX IF NOT EXISTS idx_cash_flow_symbol_period ON cash_flow(symbol, period);
CREATE INDEX IF NOT EXISTS idx_cash_flow_metric ON cash_flow(metric_name);

CREATE TABLE IF NOT EXISTS download_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    download_type TEXT NOT NULL,
    status TEXT NOT NULL,
    data_points INTEGER DEFAULT 0,
    error_message TEXT,
    details TEXT,
    download_timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol)
);
CREATE INDEX IF NOT EXISTS idx_download_logs_symbol ON download_logs(symbol);
"#;

/// Tables created lazily the first time a ledger operation runs.
pub const LEDGER_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT,
    symbol TEXT NOT NULL,
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('BUY','SELL')),
    quantity TEXT NOT NULL,
    price TEXT NOT NULL,
    transaction_date TEXT NOT NULL,
    platform TEXT,
    notes TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol),
    UNIQUE(external_id)
);
CREATE INDEX IF NOT EXISTS idx_transactions_symbol_date ON transactions(symbol, transaction_date);

CREATE TABLE IF NOT EXISTS position_lots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    transaction_id INTEGER NOT NULL,
    original_quantity TEXT NOT NULL,
    remaining_quantity TEXT NOT NULL,
    cost_basis TEXT NOT NULL,
    purchase_date TEXT NOT NULL,
    is_closed INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE RESTRICT,
    FOREIGN KEY (symbol) REFERENCES stocks(symbol) ON DELETE RESTRICT
);
CREATE INDEX IF NOT EXISTS idx_position_lots_symbol_closed_date
    ON position_lots(symbol, is_closed, purchase_date);
CREATE INDEX IF NOT EXISTS idx_position_lots_symbol_closed_date_desc_id
    ON position_lots(symbol, is_closed, purchase_date DESC, id);
CREATE INDEX IF NOT EXISTS idx_position_lots_transaction ON position_lots(transaction_id);

CREATE TABLE IF NOT EXISTS sale_allocations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sale_transaction_id INTEGER NOT NULL,
    lot_id INTEGER NOT NULL,
    quantity_sold TEXT NOT NULL,
    cost_basis TEXT NOT NULL,
    sale_price TEXT NOT NULL,
    realized_pnl TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (sale_transaction_id) REFERENCES transactions(id) ON DELETE RESTRICT,
    FOREIGN KEY (lot_id) REFERENCES position_lots(id) ON DELETE RESTRICT
);
CREATE INDEX IF NOT EXISTS idx_sale_allocations_sale_txn ON sale_allocations(sale_transaction_id);
CREATE INDEX IF NOT EXISTS idx_sale_allocations_lot ON sale_allocations(lot_id);

CREATE TABLE IF NOT EXISTS daily_pnl (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol TEXT NOT NULL,
    valuation_date TEXT NOT NULL,
    quantity TEXT NOT NULL,
    avg_cost TEXT NOT NULL,
    market_price TEXT NOT NULL,
    market_value TEXT NOT NULL,
    unrealized_pnl TEXT NOT NULL,
    unrealized_pnl_pct TEXT NOT NULL,
    realized_pnl TEXT NOT NULL DEFAULT '0',
    realized_pnl_pct TEXT NOT NULL DEFAULT '0',
    total_cost TEXT NOT NULL,
    price_date TEXT,
    is_stale_price INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(symbol, valuation_date)
);
CREATE INDEX IF NOT EXISTS idx_daily_pnl_symbol_date ON daily_pnl(symbol, valuation_date);
"#;
