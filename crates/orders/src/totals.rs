//! Order money arithmetic. All amounts are in the smallest currency unit.

use serde::{Deserialize, Serialize};

use storekeep_core::{DomainError, DomainResult, ValueObject};

/// Tax rate in basis points (1000 = 10 %).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Flat placeholder rate applied to every order.
    pub const DEFAULT: TaxRate = TaxRate(1000);

    pub fn from_basis_points(bps: u32) -> DomainResult<Self> {
        if bps > 10_000 {
            return Err(DomainError::validation("tax rate cannot exceed 100%"));
        }
        Ok(Self(bps))
    }

    pub fn basis_points(self) -> u32 {
        self.0
    }

    /// Tax on `amount`, rounded half up.
    pub fn tax_on(self, amount: i64) -> i64 {
        let raw = i128::from(amount) * i128::from(self.0);
        ((raw + 5_000) / 10_000) as i64
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ValueObject for TaxRate {}

/// The monetary columns of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub sub_total: i64,
    pub tax_amount: i64,
    pub shipping_cost: i64,
    pub discount_amount: i64,
    pub total_amount: i64,
}

impl OrderTotals {
    /// `total = sub_total + tax + shipping - discount`, with tax on the sub total.
    pub fn compute(
        line_totals: impl IntoIterator<Item = i64>,
        shipping_cost: i64,
        discount_amount: i64,
        tax_rate: TaxRate,
    ) -> DomainResult<Self> {
        if shipping_cost < 0 {
            return Err(DomainError::validation("shipping_cost cannot be negative"));
        }
        if discount_amount < 0 {
            return Err(DomainError::validation("discount_amount cannot be negative"));
        }

        let overflow = || DomainError::validation("order amount overflow");
        let sub_total = line_totals
            .into_iter()
            .try_fold(0i64, |acc, t| acc.checked_add(t))
            .ok_or_else(overflow)?;
        let tax_amount = tax_rate.tax_on(sub_total);
        let total_amount = sub_total
            .checked_add(tax_amount)
            .and_then(|t| t.checked_add(shipping_cost))
            .and_then(|t| t.checked_sub(discount_amount))
            .ok_or_else(overflow)?;

        if total_amount < 0 {
            return Err(DomainError::validation("discount exceeds order value"));
        }

        Ok(Self {
            sub_total,
            tax_amount,
            shipping_cost,
            discount_amount,
            total_amount,
        })
    }
}

impl ValueObject for OrderTotals {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_tax_on_sub_total() {
        let totals = OrderTotals::compute([2_000, 3_000], 500, 0, TaxRate::DEFAULT).unwrap();
        assert_eq!(totals.sub_total, 5_000);
        assert_eq!(totals.tax_amount, 500);
        assert_eq!(totals.total_amount, 6_000);
    }

    #[test]
    fn tax_rounds_half_up() {
        assert_eq!(TaxRate::DEFAULT.tax_on(5), 1);
        assert_eq!(TaxRate::DEFAULT.tax_on(4), 0);
    }

    #[test]
    fn discount_is_subtracted_but_cannot_go_below_zero() {
        let totals = OrderTotals::compute([1_000], 0, 100, TaxRate::DEFAULT).unwrap();
        assert_eq!(totals.total_amount, 1_000);

        let err = OrderTotals::compute([1_000], 0, 5_000, TaxRate::DEFAULT).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rate_above_hundred_percent_is_rejected() {
        assert!(TaxRate::from_basis_points(10_001).is_err());
        assert_eq!(TaxRate::from_basis_points(0).unwrap().tax_on(999), 0);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: total always equals the sum of its parts.
            #[test]
            fn total_is_sum_of_parts(
                lines in prop::collection::vec(0i64..1_000_000, 0..20),
                shipping in 0i64..10_000,
                bps in 0u32..=10_000,
            ) {
                let rate = TaxRate::from_basis_points(bps).unwrap();
                let t = OrderTotals::compute(lines.clone(), shipping, 0, rate).unwrap();
                prop_assert_eq!(t.sub_total, lines.iter().sum::<i64>());
                prop_assert_eq!(
                    t.total_amount,
                    t.sub_total + t.tax_amount + t.shipping_cost - t.discount_amount
                );
            }
        }
    }
}
