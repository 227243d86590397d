//! Moving averages over Close for window sizes {5,10,20,50}.

use super::{AnalysisContext, OpOutcome, Operator};
use crate::analytics::{dec_to_f64, MaOutput};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::BTreeMap;

const WINDOWS: [usize; 4] = [5, 10, 20, 50];

pub struct MovingAverageOperator;

impl Operator for MovingAverageOperator {
    fn name(&self) -> &'static str {
        "ma"
    }

    fn run(&self, ctx: &mut AnalysisContext) -> OpOutcome {
        let closes = ctx.frame.closes();
        if closes.is_empty() {
            return Err("insufficient_data".into());
        }

        let mut values = BTreeMap::new();
        let mut data = serde_json::Map::new();
        for window in WINDOWS {
            if closes.len() < window {
                continue;
            }
            let slice = &closes[closes.len() - window..];
            let sum: Decimal = slice.iter().sum();
            let avg = sum / Decimal::from(window as i64);
            values.insert(window, avg);
            data.insert(format!("ma_{window}"), json!(dec_to_f64(avg)));
        }
        if values.is_empty() {
            return Err("insufficient_data".into());
        }

        ctx.extras.ma = Some(MaOutput { values });
        Ok(serde_json::Value::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::models::PriceBar;
    use crate::repositories::OhlcvFrame;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

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
    fn ma5_is_simple_average_of_last_five_closes() {
        let frame = frame_of_closes(&[10, 10, 10, 10, 20]);
        let cfg = PipelineConfig::default();
        let mut ctx = AnalysisContext {
            symbol: "AAPL".into(),
            frame: &frame,
            config: &cfg,
            financial: None,
            extras: Default::default(),
        };
        let result = MovingAverageOperator.run(&mut ctx).unwrap();
        assert_eq!(result["ma_5"], json!(14.0));
        assert_eq!(ctx.extras.ma.unwrap().values[&5], dec!(14));
    }
}
