//! N-day drop alert: `(close_t - close_{t-days}) / close_{t-days} * 100`,
//! alerting when the drop is at least `threshold_pct`.
//!
//! Ported from `original_source/.../operators/{drop_alert,drop_alert_7d}.py`;
//! `drop_alert_7d` is the same operator with `days` pinned to 7, built via
//! [`DropAlertOperator::new`] rather than a subclass.

use super::{AnalysisContext, OpOutcome, Operator};
use crate::analytics::dec_to_f64;
use rust_decimal::Decimal;
use serde_json::json;

pub struct DropAlertOperator {
    op_name: &'static str,
    days: i64,
    threshold_pct: f64,
}

impl DropAlertOperator {
    pub fn new(op_name: &'static str, days: i64, threshold_pct: f64) -> Self {
        Self { op_name, days, threshold_pct }
    }
}

impl Operator for DropAlertOperator {
    fn name(&self) -> &'static str {
        self.op_name
    }

    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome {
        let closes = ctx.frame.closes();
        let days = self.days.max(0) as usize;
        if closes.len() < days + 1 {
            return Err("insufficient_data".into());
        }

        let current = closes[closes.len() - 1];
        let past = closes[closes.len() - 1 - days];
        let change = current - past;
        let percent = if !past.is_zero() {
            (change / past) * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        let percent_f64 = dec_to_f64(percent);
        let is_alert = percent_f64 <= -self.threshold_pct;

        Ok(json!({
            "days": self.days,
            "threshold": self.threshold_pct,
            "current_price": dec_to_f64(current),
            "past_price": dec_to_f64(past),
            "percent_change": percent_f64,
            "is_alert": is_alert,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::PriceBar;
    use crate::repositories::OhlcvFrame;
    use chrono::NaiveDate;

    fn frame_of_closes(values: &[i64]) -> OhlcvFrame {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| PriceBar {
                symbol: "AAPL".into(),
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                open: Decimal::from(*v),
                high: Decimal::from(*v),
                low: Decimal::from(*v),
                close: Decimal::from(*v),
                adj_close: Decimal::from(*v),
                volume: 1,
            })
            .collect();
        OhlcvFrame { rows }
    }

    #[test]
    fn twenty_percent_drop_over_one_day_alerts_at_fifteen_percent_threshold() {
        let mut values = vec![100i64; 21];
        values.push(80);
        let frame = frame_of_closes(&values);
        let cfg = PipelineConfig::default();
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras: Default::default(),
        };
        let op = DropAlertOperator::new("drop_alert", 1, 15.0);
        let result = op.run(&mut ctx).unwrap();
        assert_eq!(result["is_alert"], json!(true));
        assert_eq!(result["percent_change"], json!(-20.0));
    }
}
