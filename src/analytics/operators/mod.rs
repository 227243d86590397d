//! Built-in operators. Each implements [`Operator::run`], returning
//! `Ok(json-data)` on success or `Err(message)` to signal a recoverable
//! operator failure — the engine converts either into an `OperatorResult`.
//!
//! Grounded in `original_source/stock_analysis/analysis/operators/{base,
//! drop_alert,drop_alert_7d,fin_ratios,fin_health}.py`; `ma`/`rsi` are
//! specified directly by spec.md §4.7 (the source computes them ad hoc in
//! `cli/data_analyzer.py` rather than as standalone operator classes).

mod drop_alert;
mod fin_health;
mod fin_ratios;
mod ma;
mod rsi;

pub use drop_alert::DropAlertOperator;
pub use fin_health::FinHealthOperator;
pub use fin_ratios::FinRatiosOperator;
pub use ma::MovingAverageOperator;
pub use rsi::RsiOperator;

use super::AnalysisContext;

pub type OpOutcome = std::result::Result<serde_json::Value, String>;

pub trait Operator {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome;
}

/// Builds the operator chain for the given (ordered, possibly duplicated)
/// names, skipping unknown ones with a warning — matching
/// `pipeline/runner.py::build_operators`.
pub fn build_operators(names: &[String], cfg: &crate::config::PipelineConfig) -> Vec<Box<dyn Operator>> {
    let mut ops: Vec<Box<dyn Operator>> = Vec::with_capacity(names.len());
    for name in names {
        match name.as_str() {
            "ma" => ops.push(Box::new(MovingAverageOperator)),
            "rsi" => ops.push(Box::new(RsiOperator::default())),
            "drop_alert" => ops.push(Box::new(DropAlertOperator::new(
                "drop_alert",
                cfg.drop_alert_days,
                cfg.drop_alert_threshold,
            ))),
            "drop_alert_7d" => ops.push(Box::new(DropAlertOperator::new(
                "drop_alert_7d",
                7,
                cfg.drop_alert_7d_threshold,
            ))),
            "fin_ratios" => ops.push(Box::new(FinRatiosOperator)),
            "fin_health" => ops.push(Box::new(FinHealthOperator)),
            other => log::warn!("unknown operator '{other}', skipping"),
        }
    }
    ops
}
