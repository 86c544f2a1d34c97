//--------------------------------------------------------------------------------------------------
// MODULE OVERVIEW
//--------------------------------------------------------------------------------------------------
// Grid planner. Turns a price range into evenly spaced limit levels plus optional protective
// orders. Planning is pure; the pair engine places the resulting orders as one group.
//
// | Name             | Description                                                 |
// |------------------|-------------------------------------------------------------|
// | GridSpec         | Requested range, level count, quantity and protection       |
// | GridPlan         | Levels and protective orders to place                       |
// | plan             | Validates a spec and lays out its levels                    |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::models::types::{GroupRole, Side, TradingOrderKind};
use crate::domain::services::errors::{EngineError, EngineResult};

/// Which sides a grid may place levels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSide {
    /// Buy below the reference price, sell at or above it
    #[default]
    Both,
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub levels: usize,
    pub total_quantity: Decimal,
    #[serde(default)]
    pub side: GridSide,
    #[serde(default)]
    pub stop_loss_price: Option<Decimal>,
    #[serde(default)]
    pub take_profit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLevel {
    pub price: Decimal,
    pub side: Side,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveOrder {
    pub role: GroupRole,
    pub kind: TradingOrderKind,
    pub side: Side,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPlan {
    pub levels: Vec<GridLevel>,
    pub protective: Vec<ProtectiveOrder>,
}

/// Lays out `spec.levels` limit levels from `lower_price` to `upper_price` inclusive.
///
/// # Arguments
/// * `reference` - Book mid-price if known; the range midpoint is used otherwise
/// * `max_levels` - Configured ceiling on the level count
///
/// # Errors
/// `Validation` for fewer than two levels, too many levels, an empty or non-positive range,
/// a non-positive quantity, or non-positive protective prices.
pub fn plan(spec: &GridSpec, reference: Option<Decimal>, max_levels: usize) -> EngineResult<GridPlan> {
    if spec.levels < 2 {
        return Err(EngineError::Validation("a grid needs at least 2 levels".into()));
    }
    if spec.levels > max_levels {
        return Err(EngineError::Validation(format!("a grid may have at most {} levels", max_levels)));
    }
    if spec.lower_price <= Decimal::ZERO || spec.lower_price >= spec.upper_price {
        return Err(EngineError::Validation("grid bounds must satisfy 0 < lower < upper".into()));
    }
    if spec.total_quantity <= Decimal::ZERO {
        return Err(EngineError::Validation("grid quantity must be positive".into()));
    }
    for price in [spec.stop_loss_price, spec.take_profit_price].into_iter().flatten() {
        if price <= Decimal::ZERO {
            return Err(EngineError::Validation("protective prices must be positive".into()));
        }
    }

    let n = Decimal::from(spec.levels as u64);
    let step = (spec.upper_price - spec.lower_price) / (n - Decimal::ONE);
    let quantity = spec.total_quantity / n;
    let reference = reference.unwrap_or(spec.lower_price + (spec.upper_price - spec.lower_price) / Decimal::TWO);

    let levels = (0..spec.levels)
        .map(|i| {
            // Pin the top level so rounding in `step` never shifts it off the bound
            let price = if i + 1 == spec.levels {
                spec.upper_price
            } else {
                spec.lower_price + step * Decimal::from(i as u64)
            };
            let side = match spec.side {
                GridSide::Buy => Side::Buy,
                GridSide::Sell => Side::Sell,
                GridSide::Both if price < reference => Side::Buy,
                GridSide::Both => Side::Sell,
            };
            GridLevel { price, side, quantity }
        })
        .collect();

    let exit_side = match spec.side {
        GridSide::Sell => Side::Buy,
        GridSide::Buy | GridSide::Both => Side::Sell,
    };
    let mut protective = Vec::new();
    if let Some(stop) = spec.stop_loss_price {
        protective.push(ProtectiveOrder {
            role: GroupRole::StopLoss,
            kind: TradingOrderKind::StopLoss,
            side: exit_side,
            quantity: spec.total_quantity,
            limit_price: None,
            stop_price: Some(stop),
        });
    }
    if let Some(target) = spec.take_profit_price {
        protective.push(ProtectiveOrder {
            role: GroupRole::TakeProfit,
            kind: TradingOrderKind::Limit,
            side: exit_side,
            quantity: spec.total_quantity,
            limit_price: Some(target),
            stop_price: None,
        });
    }

    Ok(GridPlan { levels, protective })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn spec(levels: usize) -> GridSpec {
        GridSpec {
            lower_price: dec!(90),
            upper_price: dec!(110),
            levels,
            total_quantity: dec!(10),
            side: GridSide::Both,
            stop_loss_price: None,
            take_profit_price: None,
        }
    }

    #[test]
    fn test_even_spacing_and_split_quantity() {
        let plan = plan(&spec(5), None, 50).unwrap();
        let prices: Vec<_> = plan.levels.iter().map(|l| l.price).collect();
        assert_eq!(prices, vec![dec!(90), dec!(95), dec!(100), dec!(105), dec!(110)]);
        assert!(plan.levels.iter().all(|l| l.quantity == dec!(2)));
    }

    #[test]
    fn test_sides_split_around_reference() {
        let plan = plan(&spec(5), Some(dec!(101)), 50).unwrap();
        let sides: Vec<_> = plan.levels.iter().map(|l| l.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Buy, Side::Buy, Side::Sell, Side::Sell]);
    }

    #[test]
    fn test_single_side_and_protection() {
        let mut s = spec(3);
        s.side = GridSide::Sell;
        s.stop_loss_price = Some(dec!(120));
        s.take_profit_price = Some(dec!(80));

        let plan = plan(&s, None, 50).unwrap();
        assert!(plan.levels.iter().all(|l| l.side == Side::Sell));
        assert_eq!(plan.protective.len(), 2);
        assert!(plan.protective.iter().all(|p| p.side == Side::Buy && p.quantity == dec!(10)));
        assert_eq!(plan.protective[0].kind, TradingOrderKind::StopLoss);
        assert_eq!(plan.protective[1].limit_price, Some(dec!(80)));
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(plan(&spec(1), None, 50).is_err());
        assert!(plan(&spec(51), None, 50).is_err());

        let mut inverted = spec(3);
        inverted.lower_price = dec!(120);
        assert!(matches!(plan(&inverted, None, 50), Err(EngineError::Validation(_))));

        let mut empty = spec(3);
        empty.total_quantity = Decimal::ZERO;
        assert!(plan(&empty, None, 50).is_err());
    }
}
