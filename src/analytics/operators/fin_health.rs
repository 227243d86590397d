//! Composite financial health score (0-80) over the ratios `fin_ratios`
//! already published to [`crate::analytics::Extras`], banded into a letter
//! grade A-F.
//!
//! Ported from `original_source/.../operators/fin_health.py`.

use super::{AnalysisContext, OpOutcome, Operator};
use serde_json::json;

pub struct FinHealthOperator;

fn band_roe(roe: f64) -> i64 {
    if roe > 15.0 {
        20
    } else if roe > 10.0 {
        15
    } else if roe > 5.0 {
        10
    } else {
        0
    }
}

fn band_debt_ratio(debt_ratio: f64) -> i64 {
    if debt_ratio < 30.0 {
        20
    } else if debt_ratio < 50.0 {
        15
    } else if debt_ratio < 70.0 {
        10
    } else {
        0
    }
}

fn band_net_profit_margin(margin: f64) -> i64 {
    if margin > 20.0 {
        20
    } else if margin > 10.0 {
        15
    } else if margin > 5.0 {
        10
    } else {
        0
    }
}

fn band_pe_ratio(pe: f64) -> i64 {
    if pe < 15.0 {
        15
    } else if pe < 25.0 {
        10
    } else if pe < 35.0 {
        5
    } else {
        0
    }
}

fn grade_for(score: i64) -> &'static str {
    if score >= 80 {
        "A"
    } else if score >= 60 {
        "B"
    } else if score >= 40 {
        "C"
    } else if score >= 20 {
        "D"
    } else {
        "F"
    }
}

impl Operator for FinHealthOperator {
    fn name(&self) -> &'static str {
        "fin_health"
    }

    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome {
        let Some(ratios) = ctx.extras.fin_ratios.as_ref() else {
            return Err("fin_ratios_unavailable".into());
        };

        let mut score = 0i64;
        if let Some(roe) = ratios.get("roe") {
            score += band_roe(*roe);
        }
        if let Some(debt_ratio) = ratios.get("debt_ratio") {
            score += band_debt_ratio(*debt_ratio);
        }
        if let Some(margin) = ratios.get("net_profit_margin") {
            score += band_net_profit_margin(*margin);
        }
        if let Some(pe) = ratios.get("pe_ratio") {
            if *pe > 0.0 {
                score += band_pe_ratio(*pe);
            }
        }

        Ok(json!({ "score": score, "grade": grade_for(score) }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::PriceBar;
    use crate::repositories::OhlcvFrame;
    use std::collections::BTreeMap;

    fn empty_frame() -> OhlcvFrame {
        OhlcvFrame { rows: Vec::<PriceBar>::new() }
    }

    #[test]
    fn strong_ratios_grade_a() {
        let frame = empty_frame();
        let cfg = PipelineConfig::default();
        let mut extras = crate::analytics::Extras::default();
        let mut ratios = BTreeMap::new();
        ratios.insert("roe".to_string(), 18.0);
        ratios.insert("debt_ratio".to_string(), 20.0);
        ratios.insert("net_profit_margin".to_string(), 25.0);
        ratios.insert("pe_ratio".to_string(), 12.0);
        extras.fin_ratios = Some(ratios);
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras,
        };
        let result = FinHealthOperator.run(&mut ctx).unwrap();
        assert_eq!(result["score"], json!(80));
        assert_eq!(result["grade"], json!("A"));
    }

    #[test]
    fn missing_ratios_errors() {
        let frame = empty_frame();
        let cfg = PipelineConfig::default();
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras: Default::default(),
        };
        assert!(FinHealthOperator.run(&mut ctx).is_err());
    }
}
