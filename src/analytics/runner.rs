//! Top-level entry point: runs the operator pipeline for a batch of symbols
//! against the stored price/financial data, producing one [`AnalysisResult`]
//! per symbol.
//!
//! Grounded in `original_source/.../pipeline/runner.py`'s
//! `run_analysis_for_symbols`/`_summarize`.

use super::engine::PipelineEngine;
use super::operators::build_operators;
use super::{AnalysisContext, AnalysisResult, AnalysisSummary, Metrics, OpError};
use crate::config::Config;
use crate::repositories::{FinancialRepository, PriceRepository, TimeRange};
use std::collections::BTreeMap;
use std::time::Instant;

pub struct Runner<'a> {
    prices: &'a PriceRepository<'a>,
    financial: &'a FinancialRepository<'a>,
    config: &'a Config,
}

impl<'a> Runner<'a> {
    pub fn new(
        prices: &'a PriceRepository<'a>,
        financial: &'a FinancialRepository<'a>,
        config: &'a Config,
    ) -> Self {
        Self { prices, financial, config }
    }

    pub fn run_for_symbols(
        &self,
        symbols: &[String],
        range: TimeRange,
        enabled_operators: &[String],
    ) -> BTreeMap<String, AnalysisResult> {
        let ops = build_operators(enabled_operators, &self.config.pipeline);
        let engine = PipelineEngine;
        let mut results = BTreeMap::new();

        for symbol in symbols {
            let started = Instant::now();
            let exists = match self.prices.exists(symbol) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("[{symbol}] lookup failed: {e}");
                    results.insert(symbol.clone(), AnalysisResult::skipped("lookup_failed", &e.to_string()));
                    continue;
                }
            };
            if !exists {
                log::warn!("[{symbol}] not found in database; skip");
                results.insert(
                    symbol.clone(),
                    AnalysisResult::skipped("symbol_not_in_database", "symbol not found"),
                );
                continue;
            }

            let frame = match self.prices.get_ohlcv(symbol, range) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("[{symbol}] ohlcv fetch failed: {e}");
                    results.insert(symbol.clone(), AnalysisResult::skipped("fetch_failed", &e.to_string()));
                    continue;
                }
            };
            if frame.is_empty() {
                log::warn!("[{symbol}] no OHLCV data in range; skip");
                results.insert(symbol.clone(), AnalysisResult::skipped("no_data", "no data in range"));
                continue;
            }

            let mut ctx = AnalysisContext {
                symbol: symbol.clone(),
                frame: &frame,
                config: &self.config.pipeline,
                financial: Some(self.financial),
                extras: Default::default(),
            };
            let op_results = engine.run(&mut ctx, &ops);
            let summary = summarize(&ctx, &op_results);
            let errors: Vec<OpError> =
                op_results.values().filter_map(|r| r.error.clone()).collect();

            let duration_ms = started.elapsed().as_millis() as i64;
            let result = AnalysisResult {
                operators: op_results,
                summary: summary.clone(),
                errors,
                metrics: Metrics { rows: frame.len(), duration_ms },
            };
            log_summary(symbol, &summary);
            results.insert(symbol.clone(), result);
        }

        results
    }
}

fn summarize(
    ctx: &AnalysisContext,
    op_results: &BTreeMap<String, super::OperatorResult>,
) -> AnalysisSummary {
    let mut trend = "unknown".to_string();
    if let (Some(last_close), Some(ma)) = (ctx.frame.closes().last().copied(), ctx.extras.ma.as_ref()) {
        if let Some(ma20) = ma.values.get(&20) {
            trend = if last_close > *ma20 { "up".into() } else { "down".into() };
        }
    }

    let rsi_signal = op_results
        .get("rsi")
        .filter(|r| r.error.is_none())
        .and_then(|r| r.data.as_ref())
        .and_then(|d| d.get("signal"))
        .and_then(|v| v.as_str())
        .unwrap_or("n/a")
        .to_string();

    let mut drop_alert = false;
    let mut drop_change = None;
    if let Some(drop) = op_results.get("drop_alert").filter(|r| r.error.is_none()) {
        if let Some(data) = &drop.data {
            drop_alert = data.get("is_alert").and_then(|v| v.as_bool()).unwrap_or(false);
            drop_change = data.get("percent_change").and_then(|v| v.as_f64());
        }
    }

    AnalysisSummary { trend, rsi_signal, drop_alert, drop_change }
}

fn log_summary(symbol: &str, summary: &AnalysisSummary) {
    log::info!(
        "[{symbol}] trend={} rsi={} drop_alert={} drop_change={:?}",
        summary.trend,
        summary.rsi_signal,
        summary.drop_alert,
        summary.drop_change
    );
}
