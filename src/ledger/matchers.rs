//! Cost-basis matchers: allocate a SELL quantity across active lots.
//!
//! Direct port of `original_source/.../trading/services/cost_basis_matcher.py`
//! (`FIFOMatcher`/`LIFOMatcher`/`SpecificLotMatcher`/`AverageCostMatcher`),
//! swapping the Python float tolerance (`0.0001`) for `models::qty_epsilon()`
//! and lists of `(lot_id, quantity)` tuples for typed matches.

use crate::error::{PortfolioError, Result};
use crate::models::{qty_epsilon, PositionLot};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMethod {
    Fifo,
    Lifo,
    SpecificLot,
    AverageCost,
}

impl MatchMethod {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().replace('-', "").replace('_', "").as_str() {
            "FIFO" => Some(Self::Fifo),
            "LIFO" => Some(Self::Lifo),
            "SPECIFICLOT" | "SPECIFIC" => Some(Self::SpecificLot),
            "AVERAGECOST" | "AVERAGE" => Some(Self::AverageCost),
            _ => None,
        }
    }
}

/// `(lot, quantity_taken_from_lot)`.
pub type Match = (PositionLot, Decimal);

fn validate_sufficient(lots: &[PositionLot], sell_quantity: Decimal) -> Result<()> {
    let total: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    if total < sell_quantity - qty_epsilon() {
        return Err(PortfolioError::InsufficientPosition {
            symbol: lots.first().map(|l| l.symbol.clone()).unwrap_or_default(),
            requested: sell_quantity,
            available: total,
        });
    }
    Ok(())
}

fn greedy_match(mut sorted_lots: Vec<PositionLot>, sell_quantity: Decimal) -> Vec<Match> {
    let eps = qty_epsilon();
    let mut matches = Vec::new();
    let mut remaining = sell_quantity;
    for lot in sorted_lots.drain(..) {
        if remaining <= eps {
            break;
        }
        if lot.remaining_quantity <= eps {
            continue;
        }
        let take = remaining.min(lot.remaining_quantity);
        remaining -= take;
        matches.push((lot, take));
    }
    matches
}

pub fn match_fifo(lots: &[PositionLot], sell_quantity: Decimal) -> Result<Vec<Match>> {
    validate_sufficient(lots, sell_quantity)?;
    let mut sorted = lots.to_vec();
    sorted.sort_by(|a, b| (a.purchase_date, a.id).cmp(&(b.purchase_date, b.id)));
    Ok(greedy_match(sorted, sell_quantity))
}

pub fn match_lifo(lots: &[PositionLot], sell_quantity: Decimal) -> Result<Vec<Match>> {
    validate_sufficient(lots, sell_quantity)?;
    let mut sorted = lots.to_vec();
    sorted.sort_by(|a, b| (b.purchase_date, b.id).cmp(&(a.purchase_date, a.id)));
    Ok(greedy_match(sorted, sell_quantity))
}

/// `specific` is the caller-supplied `[(lot_id, quantity)]`; every lot must
/// be in `lots` with enough remaining quantity, and the total must equal
/// `sell_quantity` exactly (within epsilon).
pub fn match_specific_lot(
    lots: &[PositionLot],
    specific: &[(i64, Decimal)],
    sell_quantity: Decimal,
) -> Result<Vec<Match>> {
    let eps = qty_epsilon();
    let mut matches = Vec::with_capacity(specific.len());
    let mut total = Decimal::ZERO;
    for &(lot_id, quantity) in specific {
        let lot = lots
            .iter()
            .find(|l| l.id == lot_id)
            .ok_or_else(|| PortfolioError::UnknownLot {
                symbol: lots.first().map(|l| l.symbol.clone()).unwrap_or_default(),
                lot_id,
            })?;
        if lot.remaining_quantity < quantity - eps {
            return Err(PortfolioError::InsufficientPosition {
                symbol: lot.symbol.clone(),
                requested: quantity,
                available: lot.remaining_quantity,
            });
        }
        matches.push((lot.clone(), quantity));
        total += quantity;
    }
    if (total - sell_quantity).abs() > eps {
        return Err(PortfolioError::Validation(format!(
            "specific-lot total {total} does not match sell quantity {sell_quantity}"
        )));
    }
    Ok(matches)
}

/// Proportional allocation by `remaining_quantity / total_active`; the last
/// lot absorbs any rounding remainder so the sum is exact.
pub fn match_average_cost(lots: &[PositionLot], sell_quantity: Decimal) -> Result<Vec<Match>> {
    validate_sufficient(lots, sell_quantity)?;
    let eps = qty_epsilon();
    let total_active: Decimal = lots.iter().map(|l| l.remaining_quantity).sum();
    let active: Vec<&PositionLot> = lots.iter().filter(|l| l.remaining_quantity > eps).collect();

    let mut matches = Vec::with_capacity(active.len());
    let mut remaining = sell_quantity;
    for (i, lot) in active.iter().enumerate() {
        if remaining <= eps {
            break;
        }
        let take = if i == active.len() - 1 {
            remaining
        } else {
            let ratio = lot.remaining_quantity / total_active;
            (sell_quantity * ratio).min(lot.remaining_quantity).min(remaining)
        };
        if take > eps {
            matches.push(((*lot).clone(), take));
            remaining -= take;
        }
    }
    if remaining > eps {
        return Err(PortfolioError::Validation(format!(
            "average-cost matcher could not allocate {remaining} of {sell_quantity}"
        )));
    }
    Ok(matches)
}

pub fn match_lots(
    method: MatchMethod,
    lots: &[PositionLot],
    sell_quantity: Decimal,
    specific: Option<&[(i64, Decimal)]>,
) -> Result<Vec<Match>> {
    match method {
        MatchMethod::Fifo => match_fifo(lots, sell_quantity),
        MatchMethod::Lifo => match_lifo(lots, sell_quantity),
        MatchMethod::AverageCost => match_average_cost(lots, sell_quantity),
        MatchMethod::SpecificLot => {
            let specific = specific.ok_or_else(|| {
                PortfolioError::Validation("specific-lot method requires lot selections".into())
            })?;
            match_specific_lot(lots, specific, sell_quantity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn lot(id: i64, date: &str, remaining: Decimal, cost: Decimal) -> PositionLot {
        PositionLot {
            id,
            symbol: "AAPL".into(),
            transaction_id: id,
            original_quantity: remaining,
            remaining_quantity: remaining,
            cost_basis: cost,
            purchase_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            is_closed: false,
            notes: None,
        }
    }

    #[test]
    fn fifo_consumes_oldest_lot_first() {
        let lots = vec![
            lot(1, "2024-02-01", dec!(10), dec!(100)),
            lot(2, "2024-01-01", dec!(10), dec!(90)),
        ];
        let matches = match_fifo(&lots, dec!(15)).unwrap();
        assert_eq!(matches[0].0.id, 2);
        assert_eq!(matches[0].1, dec!(10));
        assert_eq!(matches[1].0.id, 1);
        assert_eq!(matches[1].1, dec!(5));
    }

    #[test]
    fn lifo_consumes_newest_lot_first() {
        let lots = vec![
            lot(1, "2024-02-01", dec!(10), dec!(100)),
            lot(2, "2024-01-01", dec!(10), dec!(90)),
        ];
        let matches = match_lifo(&lots, dec!(5)).unwrap();
        assert_eq!(matches[0].0.id, 1);
        assert_eq!(matches[0].1, dec!(5));
    }

    #[test]
    fn insufficient_position_is_rejected() {
        let lots = vec![lot(1, "2024-01-01", dec!(5), dec!(100))];
        let err = match_fifo(&lots, dec!(10)).unwrap_err();
        assert!(matches!(err, PortfolioError::InsufficientPosition { .. }));
    }

    #[test]
    fn average_cost_allocates_proportionally_and_sums_exactly() {
        let lots = vec![
            lot(1, "2024-01-01", dec!(30), dec!(100)),
            lot(2, "2024-01-02", dec!(70), dec!(90)),
        ];
        let matches = match_average_cost(&lots, dec!(10)).unwrap();
        let total: Decimal = matches.iter().map(|(_, q)| *q).sum();
        assert_eq!(total, dec!(10));
    }

    #[test]
    fn specific_lot_requires_total_to_match_sell_quantity() {
        let lots = vec![lot(1, "2024-01-01", dec!(10), dec!(100))];
        let err = match_specific_lot(&lots, &[(1, dec!(5))], dec!(10)).unwrap_err();
        assert!(matches!(err, PortfolioError::Validation(_)));
    }
}
