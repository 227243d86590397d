//! RSI(14) via Wilder's smoothing, classified overbought/oversold/neutral.

use super::{AnalysisContext, OpOutcome, Operator};
use crate::analytics::{dec_to_f64, RsiOutput};
use rust_decimal::Decimal;
use serde_json::json;

pub struct RsiOperator {
    pub period: usize,
}

impl Default for RsiOperator {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Operator for RsiOperator {
    fn name(&self) -> &'static str {
        "rsi"
    }

    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome {
        let closes = ctx.frame.closes();
        if closes.len() < self.period + 1 {
            return Err("insufficient_data".into());
        }

        let mut gains = Vec::with_capacity(closes.len() - 1);
        let mut losses = Vec::with_capacity(closes.len() - 1);
        for pair in closes.windows(2) {
            let diff = pair[1] - pair[0];
            if diff > Decimal::ZERO {
                gains.push(diff);
                losses.push(Decimal::ZERO);
            } else {
                gains.push(Decimal::ZERO);
                losses.push(-diff);
            }
        }

        let n = Decimal::from(self.period as i64);
        let mut avg_gain: Decimal = gains[..self.period].iter().sum::<Decimal>() / n;
        let mut avg_loss: Decimal = losses[..self.period].iter().sum::<Decimal>() / n;
        let smoothing = Decimal::from((self.period - 1) as i64);
        for i in self.period..gains.len() {
            avg_gain = (avg_gain * smoothing + gains[i]) / n;
            avg_loss = (avg_loss * smoothing + losses[i]) / n;
        }

        let rsi = if avg_loss.is_zero() {
            Decimal::from(100)
        } else {
            let rs = avg_gain / avg_loss;
            Decimal::from(100) - (Decimal::from(100) / (Decimal::ONE + rs))
        };
        let signal = if rsi > Decimal::from(70) {
            "overbought"
        } else if rsi < Decimal::from(30) {
            "oversold"
        } else {
            "neutral"
        };

        ctx.extras.rsi = Some(RsiOutput { value: rsi });
        Ok(json!({ "rsi": dec_to_f64(rsi), "signal": signal }))
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
    fn strictly_rising_closes_saturate_rsi_near_100() {
        let closes: Vec<i64> = (0..20).map(|i| 100 + i).collect();
        let frame = frame_of_closes(&closes);
        let cfg = PipelineConfig::default();
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras: Default::default(),
        };
        let result = RsiOperator::default().run(&mut ctx).unwrap();
        assert_eq!(result["signal"], json!("overbought"));
    }

    #[test]
    fn too_few_closes_is_insufficient_data() {
        let frame = frame_of_closes(&[100, 101, 102]);
        let cfg = PipelineConfig::default();
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras: Default::default(),
        };
        assert!(RsiOperator::default().run(&mut ctx).is_err());
    }
}
