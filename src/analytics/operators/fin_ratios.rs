//! Financial ratios at the latest period common to income and balance
//! statements: net profit margin, ROE, debt ratio, and P/E when price and
//! share count are both available.
//!
//! Ported from `original_source/.../operators/fin_ratios.py`; the metric-name
//! alias lists are carried over verbatim since they encode real variance in
//! Finnhub's reported-statement labels across filers.

use super::{AnalysisContext, OpOutcome, Operator};
use crate::analytics::dec_to_f64;
use crate::models::StatementType;
use crate::repositories::FinancialPivot;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;

pub struct FinRatiosOperator;

fn get(pivot: &FinancialPivot, keys: &[&str], period: NaiveDate) -> Option<Decimal> {
    let idx = pivot.periods.iter().position(|p| *p == period)?;
    for key in keys {
        if let Some(series) = pivot.metrics.get(*key) {
            if let Some(v) = series.get(idx).copied().flatten() {
                return Some(v);
            }
        }
    }
    None
}

impl Operator for FinRatiosOperator {
    fn name(&self) -> &'static str {
        "fin_ratios"
    }

    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome {
        let Some(fin_repo) = ctx.financial else {
            return Err("financial_data_unavailable".into());
        };
        let inc = fin_repo
            .get_pivot(&ctx.symbol, StatementType::IncomeStatement)
            .map_err(|e| e.to_string())?;
        let bal = fin_repo
            .get_pivot(&ctx.symbol, StatementType::BalanceSheet)
            .map_err(|e| e.to_string())?;
        if inc.periods.is_empty() || bal.periods.is_empty() {
            return Err("financial_data_unavailable".into());
        }

        let latest = inc
            .periods
            .iter()
            .filter(|p| bal.periods.contains(p))
            .max()
            .copied()
            .or_else(|| inc.periods.last().copied());
        let Some(latest) = latest else {
            return Err("no_period".into());
        };

        let revenue = get(&inc, &["Revenue", "Revenue, Net", "Net sales", "Total Revenue"], latest)
            .unwrap_or(Decimal::ZERO);
        let net_income = get(
            &inc,
            &[
                "Net income",
                "Net Income",
                "Net Income (Loss) Attributable to Parent",
                "Net Income Loss",
            ],
            latest,
        )
        .unwrap_or(Decimal::ZERO);
        let total_equity = get(
            &bal,
            &[
                "Total shareholders' equity",
                "Stockholders' Equity Attributable to Parent",
                "Stockholders Equity",
                "Total Stockholder Equity",
                "Total Equity",
            ],
            latest,
        )
        .unwrap_or(Decimal::ZERO);
        let total_assets =
            get(&bal, &["Total assets", "Assets", "Total Assets"], latest).unwrap_or(Decimal::ZERO);
        let total_liab = get(
            &bal,
            &["Total liabilities", "Liabilities", "Total Liab", "Total Liabilities"],
            latest,
        )
        .unwrap_or(Decimal::ZERO);

        let mut ratios: BTreeMap<String, Decimal> = BTreeMap::new();
        if revenue > Decimal::ZERO {
            ratios.insert("net_profit_margin".into(), (net_income / revenue) * Decimal::from(100));
        }
        if total_equity > Decimal::ZERO {
            ratios.insert("roe".into(), (net_income / total_equity) * Decimal::from(100));
        }
        if total_assets > Decimal::ZERO {
            ratios.insert("debt_ratio".into(), (total_liab / total_assets) * Decimal::from(100));
        }

        let price = ctx.frame.rows.last().map(|r| r.close);
        let shares = get(
            &bal,
            &[
                "Common stock, shares outstanding (in shares)",
                "Common stock, shares issued (in shares)",
                "Weighted-average shares outstanding (in shares)",
                "Common Shares Outstanding",
                "Shares Outstanding",
            ],
            latest,
        );
        if let (Some(price), Some(shares)) = (price, shares) {
            if shares > Decimal::ZERO && !net_income.is_zero() {
                let eps = net_income / shares;
                if !eps.is_zero() {
                    ratios.insert("pe_ratio".into(), price / eps);
                }
            }
        }

        if ratios.is_empty() {
            return Err("insufficient_financials".into());
        }

        let f64_ratios: BTreeMap<String, f64> =
            ratios.iter().map(|(k, v)| (k.clone(), dec_to_f64(*v))).collect();
        let data = serde_json::Map::from_iter(
            f64_ratios.iter().map(|(k, v)| (k.clone(), json!(v))),
        );
        ctx.extras.fin_ratios = Some(f64_ratios);
        Ok(serde_json::Value::Object(data))
    }
}
