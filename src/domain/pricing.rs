//! Money arithmetic for display prices and order totals.

use rust_decimal::{Decimal, RoundingStrategy};

/// Price a shopper pays: the sale price when it undercuts the list price.
pub fn display_price(price: Decimal, sale_price: Option<Decimal>) -> Decimal {
    match sale_price {
        Some(sale) if sale < price => sale,
        _ => price,
    }
}

pub fn is_on_sale(price: Decimal, sale_price: Option<Decimal>) -> bool {
    matches!(sale_price, Some(sale) if sale < price)
}

/// Whole-percent discount, truncated.
pub fn discount_percent(price: Decimal, sale_price: Option<Decimal>) -> Decimal {
    match sale_price {
        Some(sale) if sale < price && price > Decimal::ZERO => {
            ((price - sale) / price * Decimal::ONE_HUNDRED).trunc()
        }
        _ => Decimal::ZERO,
    }
}

pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn line_total(unit_price: Decimal, quantity: u32) -> Decimal {
    round_cents(unit_price * Decimal::from(quantity))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingPolicy {
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub tax_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            free_shipping_threshold: Decimal::new(5000, 2),
            flat_shipping_fee: Decimal::new(999, 2),
            tax_rate: Decimal::new(85, 3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl PricingPolicy {
    /// Shipping is free at or above the threshold; tax applies to the subtotal only.
    pub fn totals(&self, subtotal: Decimal) -> OrderTotals {
        let subtotal = round_cents(subtotal);
        let shipping = if subtotal >= self.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.flat_shipping_fee
        };
        let tax = round_cents(subtotal * self.tax_rate);
        OrderTotals {
            subtotal,
            shipping,
            tax,
            total: subtotal + shipping + tax,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal literal")
    }

    #[test]
    fn sale_price_only_counts_when_lower() {
        assert_eq!(display_price(dec("20.00"), Some(dec("15.00"))), dec("15.00"));
        assert_eq!(display_price(dec("20.00"), Some(dec("20.00"))), dec("20.00"));
        assert_eq!(display_price(dec("20.00"), None), dec("20.00"));
        assert!(!is_on_sale(dec("20.00"), Some(dec("20.00"))));
    }

    #[test]
    fn discount_is_truncated_to_whole_percent() {
        assert_eq!(discount_percent(dec("30.00"), Some(dec("20.00"))), dec("33"));
        assert_eq!(discount_percent(dec("30.00"), None), Decimal::ZERO);
    }

    #[test]
    fn shipping_is_free_at_threshold() {
        let policy = PricingPolicy::default();
        let totals = policy.totals(dec("50.00"));
        assert_eq!(totals.shipping, Decimal::ZERO);
        assert_eq!(totals.tax, dec("4.25"));
        assert_eq!(totals.total, dec("54.25"));
    }

    #[test]
    fn flat_fee_below_threshold_and_tax_rounds_to_cents() {
        let policy = PricingPolicy::default();
        let totals = policy.totals(dec("19.99"));
        assert_eq!(totals.shipping, dec("9.99"));
        // 19.99 * 0.085 = 1.69915
        assert_eq!(totals.tax, dec("1.70"));
        assert_eq!(totals.total, dec("31.68"));
    }

    #[test]
    fn line_total_multiplies_quantity() {
        assert_eq!(line_total(dec("12.50"), 3), dec("37.50"));
    }
}
