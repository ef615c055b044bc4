//! Property-based checks on the pricing engine.

use proptest::prelude::*;
use rust_decimal::Decimal;
use storefront_api::models::ShippingMethod;
use storefront_api::services::pricing;

fn price_strategy() -> impl Strategy<Value = Decimal> {
    // Prices in cents, one cent up to $10,000.00.
    (1i64..=1_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #[test]
    fn discounted_unit_price_never_exceeds_base(
        base in price_strategy(),
        qty in 1i64..=500,
    ) {
        let discounted = pricing::discounted_unit_price(base, qty);
        prop_assert!(discounted <= base);
        prop_assert!(discounted >= Decimal::ZERO);
    }

    #[test]
    fn unit_price_is_monotone_in_quantity(
        base in price_strategy(),
        qty in 1i64..=499,
    ) {
        // Crossing any tier boundary upward never raises the unit price.
        let here = pricing::discounted_unit_price(base, qty);
        let next = pricing::discounted_unit_price(base, qty + 1);
        prop_assert!(next <= here);
    }

    #[test]
    fn total_equation_holds_exactly(
        base in price_strategy(),
        qty in 1i64..=100,
        promo_percent in 0i64..=50,
    ) {
        let subtotal = pricing::cart_subtotal(&[(base, qty)], promo_percent > 0);
        let discount = if promo_percent > 0 {
            pricing::promo_discount_amount(subtotal, Decimal::from(promo_percent))
        } else {
            Decimal::ZERO
        };
        let fee = pricing::card_fee(subtotal - discount);
        let shipping = pricing::shipping_cost(ShippingMethod::Express);

        let total = pricing::order_total(subtotal, shipping, discount, fee);
        prop_assert_eq!(
            total,
            pricing::round2(subtotal + shipping - discount + fee)
        );
        prop_assert!(total >= Decimal::ZERO);
    }

    #[test]
    fn card_total_exceeds_etransfer_total_by_the_fee(
        base in price_strategy(),
        qty in 1i64..=100,
    ) {
        let subtotal = pricing::cart_subtotal(&[(base, qty)], false);
        let shipping = pricing::shipping_cost(ShippingMethod::Standard);
        let fee = pricing::card_fee(subtotal);

        let etransfer = pricing::order_total(subtotal, shipping, Decimal::ZERO, Decimal::ZERO);
        let card = pricing::order_total(subtotal, shipping, Decimal::ZERO, fee);
        prop_assert_eq!(card - etransfer, fee);
    }

    #[test]
    fn promo_subtotal_never_undercuts_volume_subtotal(
        base in price_strategy(),
        qty in 1i64..=100,
    ) {
        // The promo path charges raw base prices; the volume path charges
        // tier-discounted ones. Mutual exclusivity means the promo subtotal
        // is always at least the volume subtotal.
        let promo_subtotal = pricing::cart_subtotal(&[(base, qty)], true);
        let volume_subtotal = pricing::cart_subtotal(&[(base, qty)], false);
        prop_assert!(promo_subtotal >= volume_subtotal);
    }
}
