//--------------------------------------------------------------------------------------------------
// FUNCTIONS
//--------------------------------------------------------------------------------------------------
// | Name          | Description                                               | Return Type     |
// |---------------|-----------------------------------------------------------|-----------------|
// | stop_for      | Stop level implied by a best price and an offset          | Decimal         |
// | evaluate      | Folds a price tick into the trailing state                | TrailingUpdate  |
//--------------------------------------------------------------------------------------------------

use rust_decimal::Decimal;

use crate::domain::models::types::{Side, TrailingOffset, TrailingState};

/// Outcome of feeding one price tick to a trailing stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingUpdate {
    pub best_price: Decimal,
    pub stop_price: Decimal,
    pub triggered: bool,
}

fn offset_amount(offset: TrailingOffset, best: Decimal) -> Decimal {
    match offset {
        TrailingOffset::Amount(amount) => amount,
        TrailingOffset::Percent(pct) => best / Decimal::ONE_HUNDRED * pct,
    }
}

/// A sell stop trails below the highest price, a buy stop above the lowest.
pub fn stop_for(side: Side, best: Decimal, offset: TrailingOffset) -> Decimal {
    match side {
        Side::Sell => best - offset_amount(offset, best),
        Side::Buy => best.saturating_add(offset_amount(offset, best)),
    }
}

/// Updates the best favourable price with `price` and reports whether the stop is crossed.
///
/// The first tick seen by an order without an activation price becomes its best price.
pub fn evaluate(side: Side, state: &mut TrailingState, price: Decimal) -> TrailingUpdate {
    let best = match (side, state.best_price) {
        (_, None) => price,
        (Side::Sell, Some(best)) => best.max(price),
        (Side::Buy, Some(best)) => best.min(price),
    };
    state.best_price = Some(best);

    let stop_price = stop_for(side, best, state.offset);
    let triggered = match side {
        Side::Sell => price <= stop_price,
        Side::Buy => price >= stop_price,
    };

    TrailingUpdate { best_price: best, stop_price, triggered }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state(offset: TrailingOffset, best: Option<Decimal>) -> TrailingState {
        TrailingState { offset, best_price: best }
    }

    #[test]
    fn test_sell_stop_follows_rising_price() {
        let mut st = state(TrailingOffset::Amount(dec!(5)), Some(dec!(100)));

        let up = evaluate(Side::Sell, &mut st, dec!(110));
        assert_eq!(up.best_price, dec!(110));
        assert_eq!(up.stop_price, dec!(105));
        assert!(!up.triggered);

        // A dip does not move the stop down
        let dip = evaluate(Side::Sell, &mut st, dec!(107));
        assert_eq!(dip.stop_price, dec!(105));
        assert!(!dip.triggered);

        let hit = evaluate(Side::Sell, &mut st, dec!(105));
        assert!(hit.triggered);
    }

    #[test]
    fn test_buy_stop_follows_falling_price() {
        let mut st = state(TrailingOffset::Percent(dec!(10)), Some(dec!(200)));

        let down = evaluate(Side::Buy, &mut st, dec!(150));
        assert_eq!(down.stop_price, dec!(165));
        assert!(!down.triggered);

        let hit = evaluate(Side::Buy, &mut st, dec!(170));
        assert_eq!(hit.best_price, dec!(150));
        assert!(hit.triggered);
    }

    #[test]
    fn test_first_tick_activates() {
        let mut st = state(TrailingOffset::Amount(dec!(2)), None);
        let first = evaluate(Side::Sell, &mut st, dec!(50));
        assert_eq!(st.best_price, Some(dec!(50)));
        assert_eq!(first.stop_price, dec!(48));
        assert!(!first.triggered);
    }

    #[test]
    fn test_buy_stop_saturates_at_extreme_prices() {
        let mut st = state(TrailingOffset::Percent(dec!(50)), None);
        let update = evaluate(Side::Buy, &mut st, Decimal::MAX);
        assert_eq!(update.stop_price, Decimal::MAX);
        assert!(update.triggered);
    }
}
