//! Pure pricing computations: volume tiers, promo discounts, card fee, and
//! the authoritative order total. No state, no I/O; defensive clamping of
//! untrusted inputs happens in the validation layer, not here.

use crate::models::ShippingMethod;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Descending quantity-discount tiers; the first matching threshold wins.
const VOLUME_TIERS: &[(i64, Decimal)] = &[
    (10, dec!(0.25)),
    (8, dec!(0.15)),
    (6, dec!(0.10)),
    (2, dec!(0.05)),
];

/// Card processing fee rate, applied on `subtotal - discount` before
/// shipping, uniformly at every call site.
const CARD_FEE_RATE: Decimal = dec!(0.05);

/// Rounds a monetary amount to 2 decimal places, half away from zero.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Quantity-tier discount as a fraction of the base price.
pub fn quantity_discount(quantity: i64) -> Decimal {
    for (threshold, fraction) in VOLUME_TIERS {
        if quantity >= *threshold {
            return *fraction;
        }
    }
    Decimal::ZERO
}

/// Per-unit price after the volume discount for the given quantity.
pub fn discounted_unit_price(base_price: Decimal, quantity: i64) -> Decimal {
    round2(base_price * (Decimal::ONE - quantity_discount(quantity)))
}

/// The unit price actually charged for a line: volume-discounted, or the raw
/// base price while a promo code is active (promo and volume discount are
/// mutually exclusive; a valid promo overrides the volume tier).
pub fn unit_price(base_price: Decimal, quantity: i64, promo_active: bool) -> Decimal {
    if promo_active {
        base_price
    } else {
        discounted_unit_price(base_price, quantity)
    }
}

/// Cart subtotal over `(base_price, quantity)` pairs.
pub fn cart_subtotal(lines: &[(Decimal, i64)], promo_active: bool) -> Decimal {
    round2(
        lines
            .iter()
            .map(|(base, qty)| unit_price(*base, *qty, promo_active) * Decimal::from(*qty))
            .sum(),
    )
}

/// Promo discount in dollars for a percentage off the (raw) subtotal.
pub fn promo_discount_amount(subtotal: Decimal, promo_percent: Decimal) -> Decimal {
    round2(subtotal * promo_percent / dec!(100))
}

/// Card fee on the discounted goods amount, shipping excluded.
pub fn card_fee(amount_before_fee: Decimal) -> Decimal {
    round2(amount_before_fee * CARD_FEE_RATE)
}

/// Flat shipping rates by method.
pub fn shipping_cost(method: ShippingMethod) -> Decimal {
    match method {
        ShippingMethod::Standard => dec!(15.00),
        ShippingMethod::Express => dec!(35.00),
    }
}

/// The authoritative order total.
pub fn order_total(
    subtotal: Decimal,
    shipping_cost: Decimal,
    discount_amount: Decimal,
    card_fee: Decimal,
) -> Decimal {
    round2(subtotal + shipping_cost - discount_amount + card_fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds_resolve_highest_first() {
        assert_eq!(quantity_discount(1), dec!(0));
        assert_eq!(quantity_discount(2), dec!(0.05));
        assert_eq!(quantity_discount(5), dec!(0.05));
        assert_eq!(quantity_discount(6), dec!(0.10));
        assert_eq!(quantity_discount(8), dec!(0.15));
        assert_eq!(quantity_discount(9), dec!(0.15));
        assert_eq!(quantity_discount(10), dec!(0.25));
        assert_eq!(quantity_discount(250), dec!(0.25));
    }

    #[test]
    fn unit_price_never_exceeds_base_and_is_monotone_across_tiers() {
        let base = dec!(70.99);
        let mut previous = discounted_unit_price(base, 1);
        assert_eq!(previous, base);

        for qty in 2..=12 {
            let price = discounted_unit_price(base, qty);
            assert!(price <= base);
            assert!(price <= previous, "price rose at qty {}", qty);
            previous = price;
        }
    }

    #[test]
    fn promo_suppresses_volume_discount() {
        // Scenario C: raw subtotal $200.00, 10% promo, quantity would
        // otherwise qualify for a volume tier.
        let lines = vec![(dec!(20.00), 10)];
        let subtotal = cart_subtotal(&lines, true);
        assert_eq!(subtotal, dec!(200.00));
        assert_eq!(promo_discount_amount(subtotal, dec!(10)), dec!(20.00));

        // Without the promo the volume tier kicks in instead.
        assert_eq!(cart_subtotal(&lines, false), dec!(150.00));
    }

    #[test]
    fn etransfer_express_total() {
        // Scenario A: single unit at $70.99, express shipping, no promo,
        // no card fee.
        let lines = vec![(dec!(70.99), 1)];
        let subtotal = cart_subtotal(&lines, false);
        assert_eq!(subtotal, dec!(70.99));

        let total = order_total(
            subtotal,
            shipping_cost(crate::models::ShippingMethod::Express),
            dec!(0),
            dec!(0),
        );
        assert_eq!(total, dec!(105.99));
    }

    #[test]
    fn card_total_with_volume_tier() {
        // Scenario B: 10 × $100.00 hits the 25% tier; the 5% card fee
        // applies to the discounted goods amount, then express shipping.
        assert_eq!(discounted_unit_price(dec!(100.00), 10), dec!(75.00));

        let lines = vec![(dec!(100.00), 10)];
        let subtotal = cart_subtotal(&lines, false);
        assert_eq!(subtotal, dec!(750.00));

        let fee = card_fee(subtotal - dec!(0));
        assert_eq!(fee, dec!(37.50));

        let total = order_total(
            subtotal,
            shipping_cost(crate::models::ShippingMethod::Express),
            dec!(0),
            fee,
        );
        assert_eq!(total, dec!(822.50));
    }

    #[test]
    fn rounding_is_half_up_at_two_decimals() {
        assert_eq!(round2(dec!(1.005)), dec!(1.01));
        assert_eq!(round2(dec!(1.004)), dec!(1.00));
        assert_eq!(round2(dec!(37.495)), dec!(37.50));
    }
}
