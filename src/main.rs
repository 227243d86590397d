//! Command-line entry point. Converts `PortfolioError` into the exit codes
//! documented in spec.md §6/§7 (0 success, 1 business, 2 storage, 3 other)
//! and prints a single-line error category/message on failure, per §7's
//! "never leaves the ledger in an intermediate state" requirement (every
//! mutation below happens inside one `Ledger`/`Storage` call).

use clap::Parser;
use rust_decimal::Decimal;
use std::process::ExitCode;
use stockfolio::analytics::runner::Runner;
use stockfolio::cli::{Cli, Command};
use stockfolio::config::Config;
use stockfolio::data_service::DataService;
use stockfolio::db::{DateRange, SaleAllocationFilter, Storage};
use stockfolio::error::{PortfolioError, Result};
use stockfolio::ledger::matchers::MatchMethod;
use stockfolio::ledger::pnl::PnlCalculator;
use stockfolio::ledger::{BuyRequest, Ledger, SellRequest};
use stockfolio::models::PriceField;
use stockfolio::repositories::{FinancialRepository, PriceRepository, TimeRange};

fn parse_specific_lots(raw: &str) -> Result<Vec<(i64, Decimal)>> {
    raw.split(',')
        .map(|part| {
            let (id_part, qty_part) = part
                .split_once(':')
                .and_then(|(a, b)| a.strip_prefix("lot=").map(|a| (a, b)))
                .ok_or_else(|| {
                    PortfolioError::Validation(format!("invalid --specific-lots entry '{part}'"))
                })?;
            let id: i64 = id_part
                .parse()
                .map_err(|_| PortfolioError::Validation(format!("invalid lot id '{id_part}'")))?;
            let qty: Decimal = qty_part
                .parse()
                .map_err(|_| PortfolioError::Validation(format!("invalid lot quantity '{qty_part}'")))?;
            Ok((id, qty))
        })
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", e.class());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref().map(std::path::Path::new))
        .map_err(|e| PortfolioError::Validation(e.to_string()))?;
    let storage = Storage::open(&cli.db_path)?;

    match cli.command {
        Command::Download { symbols, start_date, comprehensive, financial_only } => {
            let service = DataService::new(&storage, &config)?;
            for symbol in &symbols {
                if !financial_only {
                    match service.download_and_store_stock_data(symbol, start_date).await {
                        Ok(r) => println!(
                            "{symbol}: {} points via {:?} (new_data={})",
                            r.data_points, r.used_strategy, !r.no_new_data
                        ),
                        Err(e) => eprintln!("{symbol}: price download failed: {e}"),
                    }
                }
                if comprehensive || financial_only {
                    match service.download_and_store_financial_data(symbol).await {
                        Ok(r) => println!(
                            "{symbol}: {} financial rows stored (new_data={})",
                            r.data_points, !r.no_new_data
                        ),
                        Err(e) => eprintln!("{symbol}: financial download failed: {e}"),
                    }
                }
            }
            Ok(())
        }

        Command::Query { symbol, start_date, end_date, limit } => {
            let rows = storage.get_stock_data(&symbol, DateRange { start: start_date, end: end_date })?;
            println!("{symbol}: {} rows", rows.len());
            let limit = limit.unwrap_or(5).min(rows.len());
            for bar in rows.iter().take(limit) {
                println!("  {} open={} close={} volume={}", bar.date, bar.open, bar.close, bar.volume);
            }
            if rows.len() > limit * 2 {
                println!("  ...");
                for bar in rows.iter().rev().take(limit).rev() {
                    println!("  {} open={} close={} volume={}", bar.date, bar.open, bar.close, bar.volume);
                }
            }
            Ok(())
        }

        Command::Analyze { symbols, operators, start_date, end_date, output } => {
            let prices = PriceRepository::new(&storage);
            let financial = FinancialRepository::new(&storage);
            let runner = Runner::new(&prices, &financial, &config);
            let enabled = if operators.is_empty() { config.pipeline.enabled_operators.clone() } else { operators };
            let range = TimeRange { start: start_date, end: end_date };
            let results = runner.run_for_symbols(&symbols, range, &enabled);
            let json = serde_json::to_string_pretty(&results)
                .map_err(|e| PortfolioError::Validation(e.to_string()))?;
            match output {
                Some(path) => std::fs::write(&path, json)?,
                None => println!("{json}"),
            }
            Ok(())
        }

        Command::Buy { symbol, quantity, price, date, external_id, platform, notes } => {
            let ledger = Ledger::new(&storage);
            let id = ledger.record_buy(BuyRequest {
                symbol,
                quantity,
                price,
                transaction_date: date,
                external_id,
                platform,
                notes,
            })?;
            println!("recorded buy transaction #{id}");
            Ok(())
        }

        Command::Sell { symbol, quantity, price, date, basis, specific_lots, external_id, platform, notes } => {
            let method = MatchMethod::from_str(&basis)
                .ok_or_else(|| PortfolioError::Validation(format!("unknown cost basis '{basis}'")))?;
            let specific_lots = specific_lots.as_deref().map(parse_specific_lots).transpose()?;
            let ledger = Ledger::new(&storage);
            let id = ledger.record_sell(SellRequest {
                symbol,
                quantity,
                price,
                transaction_date: date,
                external_id,
                platform,
                notes,
                method,
                specific_lots,
            })?;
            println!("recorded sell transaction #{id}");
            Ok(())
        }

        Command::Positions { symbol } => {
            let symbols = match symbol {
                Some(s) => vec![s],
                None => storage.list_symbols_with_lots()?,
            };
            for symbol in symbols {
                let lots = storage.get_position_lots(&symbol, true)?;
                let held: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
                if held.is_zero() {
                    continue;
                }
                println!("{symbol}: {held} shares across {} open lot(s)", lots.len());
            }
            Ok(())
        }

        Command::Lots { symbol, all } => {
            let lots = storage.get_position_lots(&symbol, !all)?;
            for lot in lots {
                println!(
                    "#{} {} qty={}/{} cost={} date={} closed={}",
                    lot.id, lot.symbol, lot.remaining_quantity, lot.original_quantity,
                    lot.cost_basis, lot.purchase_date, lot.is_closed
                );
            }
            Ok(())
        }

        Command::Sales { sale_transaction_id, lot_id } => {
            let allocations =
                storage.get_sale_allocations(SaleAllocationFilter { sale_transaction_id, lot_id })?;
            for alloc in allocations {
                println!(
                    "sale #{} lot #{} qty={} cost_basis={} sale_price={} realized_pnl={}",
                    alloc.sale_transaction_id, alloc.lot_id, alloc.quantity_sold,
                    alloc.cost_basis, alloc.sale_price, alloc.realized_pnl
                );
            }
            Ok(())
        }

        Command::CalculatePnl { symbol, date } => {
            let calc = PnlCalculator::new(&storage, PriceField::Close);
            match calc.calculate_for_date(&symbol, date)? {
                Some(row) => println!(
                    "{symbol} {date}: unrealized={} realized={} market_value={} stale={}",
                    row.unrealized_pnl, row.realized_pnl, row.market_value, row.is_stale_price
                ),
                None => println!("{symbol} {date}: no price available, nothing written"),
            }
            Ok(())
        }

        Command::BatchCalculate { symbols, start_date, end_date, only_trading_days } => {
            let calc = PnlCalculator::new(&storage, PriceField::Close);
            let summary = calc.calculate_batch(&symbols, start_date, end_date, only_trading_days)?;
            println!("wrote {} rows, skipped {} (no price)", summary.written, summary.skipped);
            Ok(())
        }
    }
}
