//! Price and quantity arithmetic shared by the placement policies.
//!
//! Percentages are expressed in percent (`1.0` means one percent).

use rust_decimal::Decimal;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Limit price `percentage` below `reference`.
pub fn buy_price(reference: Decimal, percentage: Decimal) -> Decimal {
    reference * (Decimal::ONE - percentage / HUNDRED)
}

/// Profit target `percentage` above the buy price.
pub fn sell_price(buy_price: Decimal, percentage: Decimal) -> Decimal {
    buy_price * (Decimal::ONE + percentage / HUNDRED)
}

/// Base quantity bought with `quote_amount` at `price`. `None` for a non-positive price.
pub fn order_quantity(quote_amount: Decimal, price: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    quote_amount.checked_div(price)
}

pub fn profit(buy_price: Decimal, sell_price: Decimal, quantity: Decimal) -> Decimal {
    (sell_price - buy_price) * quantity
}

/// Whether `price` lies within `tolerance_percentage` of `level`.
pub fn within_tolerance(price: Decimal, level: Decimal, tolerance_percentage: Decimal) -> bool {
    if level <= Decimal::ZERO {
        return false;
    }
    let band = level * tolerance_percentage / HUNDRED;
    (price - level).abs() <= band
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_price_is_exact() {
        assert_eq!(buy_price(dec!(100), dec!(1)), dec!(99.0));
        assert_eq!(buy_price(dec!(50000), dec!(2.5)), dec!(48750));
    }

    #[test]
    fn test_sell_price_is_exact() {
        assert_eq!(sell_price(dec!(99.0), dec!(2)), dec!(100.98));
    }

    #[test]
    fn test_order_quantity() {
        let qty = order_quantity(dec!(10), dec!(99.0)).unwrap();
        assert_eq!(qty.round_dp(5), dec!(0.10101));
        assert_eq!(order_quantity(dec!(10), dec!(0)), None);
        assert_eq!(order_quantity(dec!(10), dec!(-1)), None);
    }

    #[test]
    fn test_profit() {
        assert_eq!(profit(dec!(100), dec!(102), dec!(0.01)), dec!(0.02));
        assert_eq!(profit(dec!(100), dec!(98), dec!(0.5)), dec!(-1));
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(dec!(99.4), dec!(99), dec!(0.5)));
        assert!(!within_tolerance(dec!(98), dec!(99), dec!(0.5)));
        assert!(within_tolerance(dec!(99), dec!(99), dec!(0)));
        assert!(!within_tolerance(dec!(99.01), dec!(99), dec!(0)));
    }
}
