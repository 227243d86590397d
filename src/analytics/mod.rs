//! Analysis pipeline: per-symbol operators over an OHLCV frame, run with
//! per-operator error isolation and summarized into a JSON-shaped envelope.
//!
//! Grounded in `original_source/stock_analysis/analysis/{core/contracts.py,
//! pipeline/context.py}` for the `Error`/`OperatorResult`/`AnalysisSummary`/
//! `AnalysisResult` shapes, generalized from dict-shaped Python dataclasses
//! into tagged Rust structs per spec.md §9's "do not propagate dict-shaped
//! errors" design note.

pub mod engine;
pub mod operators;
pub mod runner;

use crate::config::PipelineConfig;
use crate::repositories::{FinancialRepository, OhlcvFrame};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

pub fn dec_to_f64(d: Decimal) -> f64 {
    use std::str::FromStr;
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct OpError {
    pub code: String,
    pub message: String,
    pub severity: String,
}

impl OpError {
    pub fn warn(code: &str, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), severity: "warn".into() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperatorResult {
    pub data: Option<serde_json::Value>,
    pub error: Option<OpError>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub trend: String,
    pub rsi_signal: String,
    pub drop_alert: bool,
    pub drop_change: Option<f64>,
}

impl AnalysisSummary {
    pub fn unknown() -> Self {
        Self { trend: "unknown".into(), rsi_signal: "n/a".into(), drop_alert: false, drop_change: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub rows: usize,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub operators: BTreeMap<String, OperatorResult>,
    pub summary: AnalysisSummary,
    pub errors: Vec<OpError>,
    pub metrics: Metrics,
}

impl AnalysisResult {
    pub fn skipped(code: &str, message: &str) -> Self {
        Self {
            operators: BTreeMap::new(),
            summary: AnalysisSummary::unknown(),
            errors: vec![OpError::warn(code, message)],
            metrics: Metrics { rows: 0, duration_ms: 0 },
        }
    }
}

/// Per-operator hand-off, replacing the source's mutable `ctx.extras` dict
/// with an explicit typed record populated monotonically as operators run.
#[derive(Debug, Clone, Default)]
pub struct Extras {
    pub ma: Option<MaOutput>,
    pub rsi: Option<RsiOutput>,
    pub fin_ratios: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct MaOutput {
    pub values: BTreeMap<usize, Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct RsiOutput {
    pub value: Decimal,
}

pub struct AnalysisContext<'a> {
    pub symbol: String,
    pub frame: &'a OhlcvFrame,
    pub config: &'a PipelineConfig,
    pub financial: Option<&'a FinancialRepository<'a>>,
    pub extras: Extras,
}
