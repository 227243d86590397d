//! Sequential operator engine with per-operator error isolation.
//!
//! Grounded in `original_source/stock_analysis/analysis/pipeline/engine.py`'s
//! `PipelineEngine.run`: each operator is timed and converted into an
//! `OperatorResult`; an operator-level failure never stops the remaining
//! operators from running.

use super::operators::Operator;
use super::{AnalysisContext, OpError, OperatorResult};
use std::collections::BTreeMap;
use std::time::Instant;

pub struct PipelineEngine;

impl PipelineEngine {
    pub fn run(
        &self,
        ctx: &mut AnalysisContext,
        operators: &[Box<dyn Operator>],
    ) -> BTreeMap<String, OperatorResult> {
        let mut results = BTreeMap::new();
        for op in operators {
            let start = Instant::now();
            log::info!("[{}] run operator: {}", ctx.symbol, op.name());
            let outcome = op.run(ctx);
            let duration_ms = start.elapsed().as_millis() as i64;
            let result = match outcome {
                Ok(data) => OperatorResult { data: Some(data), error: None, duration_ms },
                Err(message) => {
                    log::warn!("[{}] operator {} failed: {message}", ctx.symbol, op.name());
                    OperatorResult {
                        data: None,
                        error: Some(OpError {
                            code: "op_failed".into(),
                            message,
                            severity: "error".into(),
                        }),
                        duration_ms,
                    }
                }
            };
            results.insert(op.name().to_string(), result);
        }
        results
    }
}
