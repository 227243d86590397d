//! `clap`-derived command surface. Illustrative per spec.md §6: flags are
//! shaped for the operations the rest of the crate implements, not frozen
//! to an external collaborator's exact wording.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stockfolio", version, about = "Portfolio ledger and market-data analytics")]
pub struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "stockfolio.db")]
    pub db_path: String,

    /// Path to an optional TOML config file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Download and store price/financial data for one or more symbols.
    Download {
        #[arg(short, long = "symbol", required = true)]
        symbols: Vec<String>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long, conflicts_with = "financial_only")]
        comprehensive: bool,
        #[arg(long, conflicts_with = "comprehensive")]
        financial_only: bool,
    },
    /// Print stored OHLCV rows for a symbol.
    Query {
        #[arg(short, long = "symbol")]
        symbol: String,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run the analytics pipeline for one or more symbols.
    Analyze {
        #[arg(short, long = "symbol", required = true)]
        symbols: Vec<String>,
        #[arg(long = "operator")]
        operators: Vec<String>,
        #[arg(long)]
        start_date: Option<NaiveDate>,
        #[arg(long)]
        end_date: Option<NaiveDate>,
        #[arg(long)]
        output: Option<String>,
    },
    /// Record a BUY, creating one position lot.
    Buy {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        quantity: rust_decimal::Decimal,
        #[arg(short, long)]
        price: rust_decimal::Decimal,
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Record a SELL, allocating against active lots.
    Sell {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        quantity: rust_decimal::Decimal,
        #[arg(short, long)]
        price: rust_decimal::Decimal,
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(long, default_value = "fifo")]
        basis: String,
        /// `lot=ID:QTY,…`, required when `--basis specific`.
        #[arg(long)]
        specific_lots: Option<String>,
        #[arg(long)]
        external_id: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List open/all position lots, grouped by symbol.
    Positions {
        #[arg(short, long)]
        symbol: Option<String>,
    },
    /// List position lots for a symbol.
    Lots {
        #[arg(short, long)]
        symbol: String,
        #[arg(long)]
        all: bool,
    },
    /// List sale allocations, optionally filtered by a sale transaction.
    Sales {
        #[arg(long)]
        sale_transaction_id: Option<i64>,
        #[arg(long)]
        lot_id: Option<i64>,
    },
    /// Recompute and store `daily_pnl` for one symbol/date.
    CalculatePnl {
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long)]
        date: NaiveDate,
    },
    /// Recompute `daily_pnl` across a date range for a batch of symbols.
    BatchCalculate {
        #[arg(short, long = "symbol", required = true)]
        symbols: Vec<String>,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        #[arg(long)]
        only_trading_days: bool,
    },
}
